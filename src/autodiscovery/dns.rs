//! MX lookups for provider detection

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use super::DetectionError;

/// Source of MX records, replaceable in tests
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// MX hosts for `domain`, most preferred first
    async fn mx_hosts(&self, domain: &str) -> Result<Vec<String>, DetectionError>;
}

/// System resolver backed by hickory
pub struct HickoryMxResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryMxResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for HickoryMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxResolver for HickoryMxResolver {
    async fn mx_hosts(&self, domain: &str) -> Result<Vec<String>, DetectionError> {
        debug!("Querying MX records for {}", domain);

        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(DetectionError::Dns(format!("MX lookup failed: {}", e))),
        };

        let mut records: Vec<(u16, String)> = lookup
            .iter()
            .map(|r| {
                let host = r.exchange().to_string().to_lowercase();
                (r.preference(), host.trim_end_matches('.').to_string())
            })
            .collect();
        records.sort();

        Ok(records.into_iter().map(|(_, host)| host).collect())
    }
}
