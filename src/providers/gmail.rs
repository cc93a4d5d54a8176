//! Gmail labels adapter
//!
//! Gmail has no real label hierarchy: `SUPPLIERS/Lennox` is a single label
//! whose name contains the separator, displayed nested by the client. Moving
//! a label is therefore a rename that keeps the id.

use async_trait::async_trait;
use label_templates::ColorSpec;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::http::ApiClient;
use super::{child_path, Capabilities, MailboxProvider, ProviderKind, RemoteNode};
use crate::types::error::{ProviderError, TaxonomyError};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me/";

pub struct GmailLabels {
    api: ApiClient,
    base_url: Url,
    caps: Capabilities,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Label {
    id: String,
    name: String,
    #[serde(default, rename = "type")]
    label_type: Option<String>,
    #[serde(default)]
    messages_total: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelColor<'a> {
    background_color: &'a str,
    text_color: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewLabel<'a> {
    name: &'a str,
    label_list_visibility: &'static str,
    message_list_visibility: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<LabelColor<'a>>,
}

#[derive(Debug, Serialize)]
struct RenameLabel<'a> {
    name: &'a str,
}

impl GmailLabels {
    pub fn new(access_token: &str) -> Result<Self, TaxonomyError> {
        let base_url = Url::parse(GMAIL_API)
            .map_err(|e| TaxonomyError::Config(format!("Invalid Gmail endpoint: {}", e)))?;
        Self::with_base_url(access_token, base_url)
    }

    /// Point the adapter at another endpoint (e.g. a local test server)
    pub fn with_base_url(access_token: &str, base_url: Url) -> Result<Self, TaxonomyError> {
        Ok(Self {
            api: ApiClient::new(access_token)?,
            base_url,
            caps: Capabilities::gmail(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Other(format!("Invalid Gmail URL '{}': {}", path, e)))
    }

    async fn all_user_labels(&self) -> Result<Vec<Label>, ProviderError> {
        let url = self.endpoint("labels")?;
        let list: LabelList = self.api.send_json(self.api.http.get(url)).await?;

        Ok(list
            .labels
            .into_iter()
            .filter(|l| l.label_type.as_deref() != Some("system"))
            .collect())
    }
}

#[async_trait]
impl MailboxProvider for GmailLabels {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    async fn list_children(
        &self,
        parent: Option<&RemoteNode>,
    ) -> Result<Vec<RemoteNode>, ProviderError> {
        let parent_depth = parent.map(|p| p.path.depth()).unwrap_or(0);

        let children = self
            .all_user_labels()
            .await?
            .into_iter()
            .filter_map(|label| {
                let path = self.caps.decode_path(&label.name);
                let is_child = path.depth() == parent_depth + 1
                    && parent.map_or(true, |p| {
                        path.segments()
                            .iter()
                            .zip(p.path.segments())
                            .all(|(a, b)| self.caps.names_equal(a, b))
                    });
                is_child.then(|| RemoteNode::new(label.id, path))
            })
            .collect();

        Ok(children)
    }

    async fn create_node(
        &self,
        parent: Option<&RemoteNode>,
        name: &str,
        color: Option<&ColorSpec>,
    ) -> Result<RemoteNode, ProviderError> {
        let path = child_path(parent, name);
        self.caps.check_node(&path)?;

        let full_name = self.caps.encode_path(&path);
        let body = NewLabel {
            name: &full_name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
            color: color.map(|c| LabelColor {
                background_color: &c.background,
                text_color: &c.text,
            }),
        };

        let url = self.endpoint("labels")?;
        let created: Label = self
            .api
            .send_json(self.api.http.post(url).json(&body))
            .await?;

        debug!("Created Gmail label {} ({})", created.name, created.id);
        Ok(RemoteNode::new(created.id, path))
    }

    async fn move_node(
        &self,
        node: &RemoteNode,
        new_parent: Option<&RemoteNode>,
        new_name: &str,
    ) -> Result<RemoteNode, ProviderError> {
        let path = child_path(new_parent, new_name);
        self.caps.check_node(&path)?;

        let full_name = self.caps.encode_path(&path);
        let url = self.endpoint(&format!("labels/{}", node.id))?;
        let renamed: Label = self
            .api
            .send_json(
                self.api
                    .http
                    .patch(url)
                    .json(&RenameLabel { name: &full_name }),
            )
            .await?;

        debug!("Renamed Gmail label {} to {}", renamed.id, renamed.name);
        Ok(RemoteNode::new(renamed.id, path))
    }

    async fn delete_node(&self, node: &RemoteNode) -> Result<(), ProviderError> {
        let url = self.endpoint(&format!("labels/{}", node.id))?;
        self.api.send_empty(self.api.http.delete(url)).await
    }

    async fn message_count(&self, node: &RemoteNode) -> Result<u64, ProviderError> {
        let url = self.endpoint(&format!("labels/{}", node.id))?;
        let label: Label = self.api.send_json(self.api.http.get(url)).await?;
        Ok(label.messages_total.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_list_parses_and_system_labels_flagged() {
        let json = r#"{
            "labels": [
                {"id": "INBOX", "name": "INBOX", "type": "system"},
                {"id": "Label_1", "name": "SUPPLIERS", "type": "user"},
                {"id": "Label_2", "name": "SUPPLIERS/Lennox", "type": "user", "messagesTotal": 12}
            ]
        }"#;

        let list: LabelList = serde_json::from_str(json).unwrap();
        assert_eq!(list.labels.len(), 3);
        assert_eq!(list.labels[0].label_type.as_deref(), Some("system"));
        assert_eq!(list.labels[2].messages_total, Some(12));
    }

    #[test]
    fn test_new_label_body() {
        let color = ColorSpec {
            background: "#16a766".into(),
            text: "#ffffff".into(),
        };
        let body = NewLabel {
            name: "BANKING/Invoice",
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
            color: Some(LabelColor {
                background_color: &color.background,
                text_color: &color.text,
            }),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["name"], "BANKING/Invoice");
        assert_eq!(json["labelListVisibility"], "labelShow");
        assert_eq!(json["color"]["backgroundColor"], "#16a766");
    }

    #[test]
    fn test_uncolored_label_omits_color() {
        let body = NewLabel {
            name: "MISC",
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
            color: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("color").is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_reserved_name_without_network() {
        let gmail = GmailLabels::new("token").unwrap();
        let err = gmail.create_node(None, "Inbox", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::CapabilityViolation(_)));
    }
}
