//! Outlook mail folder adapter (Microsoft Graph)
//!
//! Folders form a real tree keyed by id. Graph has no per-folder color, so
//! colors from the template are dropped here.

use async_trait::async_trait;
use label_templates::ColorSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::http::ApiClient;
use super::{child_path, Capabilities, MailboxProvider, ProviderKind, RemoteNode};
use crate::types::error::{ProviderError, TaxonomyError};

const GRAPH_API: &str = "https://graph.microsoft.com/v1.0/me/";

/// Well-known id of the top of the folder hierarchy
const ROOT_FOLDER: &str = "msgfolderroot";

const PAGE_SIZE: u32 = 100;

pub struct OutlookFolders {
    api: ApiClient,
    base_url: Url,
    caps: Capabilities,
}

#[derive(Debug, Deserialize)]
struct FolderPage {
    #[serde(default)]
    value: Vec<MailFolder>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailFolder {
    id: String,
    display_name: String,
    #[serde(default)]
    total_item_count: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFolder<'a> {
    display_name: &'a str,
    is_hidden: bool,
}

impl OutlookFolders {
    pub fn new(access_token: &str) -> Result<Self, TaxonomyError> {
        let base_url = Url::parse(GRAPH_API)
            .map_err(|e| TaxonomyError::Config(format!("Invalid Graph endpoint: {}", e)))?;
        Self::with_base_url(access_token, base_url)
    }

    pub fn with_base_url(access_token: &str, base_url: Url) -> Result<Self, TaxonomyError> {
        Ok(Self {
            api: ApiClient::new(access_token)?,
            base_url,
            caps: Capabilities::outlook(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Other(format!("Invalid Graph URL '{}': {}", path, e)))
    }

    fn children_url(&self, parent: Option<&RemoteNode>) -> Result<Url, ProviderError> {
        let mut url = match parent {
            Some(p) => self.endpoint(&format!("mailFolders/{}/childFolders", p.id))?,
            None => self.endpoint("mailFolders")?,
        };
        url.query_pairs_mut()
            .append_pair("$top", &PAGE_SIZE.to_string())
            .append_pair("includeHiddenFolders", "true");
        Ok(url)
    }

    /// Follow `@odata.nextLink` until the listing is exhausted
    async fn list_all(&self, first: Url) -> Result<Vec<MailFolder>, ProviderError> {
        let mut folders = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let page: FolderPage = self.api.send_json(self.api.http.get(url)).await?;
            folders.extend(page.value);

            if let Some(link) = page.next_link {
                next = Some(Url::parse(&link).map_err(|e| {
                    ProviderError::Other(format!("Invalid nextLink '{}': {}", link, e))
                })?);
            }
        }

        Ok(folders)
    }
}

#[async_trait]
impl MailboxProvider for OutlookFolders {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    async fn list_children(
        &self,
        parent: Option<&RemoteNode>,
    ) -> Result<Vec<RemoteNode>, ProviderError> {
        let url = self.children_url(parent)?;
        let folders = self.list_all(url).await?;

        Ok(folders
            .into_iter()
            .map(|f| RemoteNode::new(f.id, child_path(parent, &f.display_name)))
            .collect())
    }

    async fn create_node(
        &self,
        parent: Option<&RemoteNode>,
        name: &str,
        color: Option<&ColorSpec>,
    ) -> Result<RemoteNode, ProviderError> {
        let path = child_path(parent, name);
        self.caps.check_node(&path)?;

        if color.is_some() {
            debug!("Outlook folders carry no color; ignoring color for {}", path);
        }

        let url = match parent {
            Some(p) => self.endpoint(&format!("mailFolders/{}/childFolders", p.id))?,
            None => self.endpoint("mailFolders")?,
        };
        let body = NewFolder {
            display_name: name.trim(),
            is_hidden: false,
        };

        let created: MailFolder = self
            .api
            .send_json(self.api.http.post(url).json(&body))
            .await?;

        debug!("Created Outlook folder {} ({})", path, created.id);
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

        let current_name = node.path.name().unwrap_or_default();
        if current_name != new_name.trim() {
            let url = self.endpoint(&format!("mailFolders/{}", node.id))?;
            let _: MailFolder = self
                .api
                .send_json(
                    self.api
                        .http
                        .patch(url)
                        .json(&json!({ "displayName": new_name.trim() })),
                )
                .await?;
        }

        let current_parent = node.path.parent().unwrap_or_default();
        let target_parent = new_parent.map(|p| p.path.clone()).unwrap_or_default();
        if current_parent == target_parent {
            return Ok(RemoteNode::new(node.id.clone(), path));
        }

        // Graph may hand back a new id after a move
        let destination = new_parent.map(|p| p.id.as_str()).unwrap_or(ROOT_FOLDER);
        let url = self.endpoint(&format!("mailFolders/{}/move", node.id))?;
        let moved: MailFolder = self
            .api
            .send_json(
                self.api
                    .http
                    .post(url)
                    .json(&json!({ "destinationId": destination })),
            )
            .await?;

        debug!("Moved Outlook folder {} to {}", node.path, path);
        Ok(RemoteNode::new(moved.id, path))
    }

    async fn delete_node(&self, node: &RemoteNode) -> Result<(), ProviderError> {
        let url = self.endpoint(&format!("mailFolders/{}", node.id))?;
        self.api.send_empty(self.api.http.delete(url)).await
    }

    async fn message_count(&self, node: &RemoteNode) -> Result<u64, ProviderError> {
        let url = self.endpoint(&format!("mailFolders/{}", node.id))?;
        let folder: MailFolder = self.api.send_json(self.api.http.get(url)).await?;
        Ok(folder.total_item_count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalPath;

    #[test]
    fn test_folder_page_parses_next_link() {
        let json = r#"{
            "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#users('me')/mailFolders",
            "value": [
                {"id": "AAMkAG1", "displayName": "Inbox", "totalItemCount": 40},
                {"id": "AAMkAG2", "displayName": "SUPPLIERS", "totalItemCount": 0}
            ],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/me/mailFolders?$skip=100"
        }"#;

        let page: FolderPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 2);
        assert_eq!(page.value[1].display_name, "SUPPLIERS");
        assert!(page.next_link.is_some());
    }

    #[test]
    fn test_children_url() {
        let outlook = OutlookFolders::new("token").unwrap();

        let root = outlook.children_url(None).unwrap();
        assert_eq!(root.path(), "/v1.0/me/mailFolders");
        assert!(root.query().unwrap().contains("%24top=100"));

        let parent = RemoteNode::new("AAMkAG2", LogicalPath::new(["SUPPLIERS"]));
        let child = outlook.children_url(Some(&parent)).unwrap();
        assert_eq!(child.path(), "/v1.0/me/mailFolders/AAMkAG2/childFolders");
    }

    #[test]
    fn test_new_folder_body() {
        let body = NewFolder {
            display_name: "Lennox",
            is_hidden: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["displayName"], "Lennox");
        assert_eq!(json["isHidden"], false);
    }

    #[tokio::test]
    async fn test_create_rejects_excess_depth_without_network() {
        let outlook = OutlookFolders::new("token").unwrap();
        let segments: Vec<String> = (0..10).map(|i| format!("L{}", i)).collect();
        let parent = RemoteNode::new("deep", LogicalPath::new(segments));

        let err = outlook
            .create_node(Some(&parent), "TooDeep", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::CapabilityViolation(_)));
    }
}
