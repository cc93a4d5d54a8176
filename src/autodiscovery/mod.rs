//! Mail provider detection
//!
//! Resolves an email address to the provider that hosts it, cheapest source
//! first:
//! - Known consumer domains (no network)
//! - Cached results from earlier lookups
//! - Live DNS MX records matched against hosting patterns
//!
//! Results without a match are cached too, so a custom domain is only
//! looked up once per TTL.

mod cache;
mod dns;
mod providers;

pub use cache::{Clock, DetectionCache, SystemClock};
pub use dns::{HickoryMxResolver, MxResolver};
pub use providers::{known_provider, provider_from_mx};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::providers::ProviderKind;
use crate::types::error::TaxonomyError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("DNS lookup failed: {0}")]
    Dns(String),
}

impl From<DetectionError> for TaxonomyError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::InvalidEmail(msg) => TaxonomyError::InvalidInput(msg),
            other => TaxonomyError::Detection(other.to_string()),
        }
    }
}

/// Hosting provider behind an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    Gmail,
    Outlook,
    Yahoo,
    Icloud,
    Fastmail,
    Protonmail,
    Zoho,
    /// Self-hosted or unrecognized
    Custom,
}

impl MailProvider {
    /// Label backend for this provider, when one is supported
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        match self {
            Self::Gmail => Some(ProviderKind::Gmail),
            Self::Outlook => Some(ProviderKind::Outlook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    KnownDomain,
    Cache,
    MxRecord,
    /// No MX record matched a known provider
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDetection {
    pub provider: MailProvider,
    pub domain: String,
    pub method: DetectionMethod,
    pub confidence: f32,
    pub mx_host: Option<String>,
}

impl ProviderDetection {
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        self.provider.provider_kind()
    }
}

pub struct ProviderDetector {
    resolver: Arc<dyn MxResolver>,
    cache: DetectionCache,
}

impl ProviderDetector {
    pub fn new(ttl: Duration) -> Self {
        Self::with_parts(Arc::new(HickoryMxResolver::new()), DetectionCache::new(ttl))
    }

    pub fn with_parts(resolver: Arc<dyn MxResolver>, cache: DetectionCache) -> Self {
        Self { resolver, cache }
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    pub async fn detect(&self, email: &str) -> Result<ProviderDetection, DetectionError> {
        let domain = email_domain(email)?;

        if let Some(provider) = known_provider(&domain) {
            debug!("{} is a known {:?} domain", domain, provider);
            return Ok(ProviderDetection {
                provider,
                domain,
                method: DetectionMethod::KnownDomain,
                confidence: 1.0,
                mx_host: None,
            });
        }

        if let Some(cached) = self.cache.get(&domain) {
            debug!("Using cached detection for {}", domain);
            return Ok(ProviderDetection {
                method: DetectionMethod::Cache,
                ..cached
            });
        }

        let hosts = self.resolver.mx_hosts(&domain).await?;
        let matched = hosts
            .iter()
            .find_map(|host| provider_from_mx(host).map(|p| (p, host.clone())));

        let detection = match matched {
            Some((provider, host)) => ProviderDetection {
                provider,
                domain: domain.clone(),
                method: DetectionMethod::MxRecord,
                confidence: 0.9,
                mx_host: Some(host),
            },
            None => ProviderDetection {
                provider: MailProvider::Custom,
                domain: domain.clone(),
                method: DetectionMethod::Fallback,
                confidence: if hosts.is_empty() { 0.0 } else { 0.2 },
                mx_host: hosts.first().cloned(),
            },
        };

        info!(
            "Detected {:?} for {} via {:?}",
            detection.provider, domain, detection.method
        );
        self.cache.insert(&domain, detection.clone());
        Ok(detection)
    }
}

/// Lower-cased domain part of an address such as `Jane <jane@acme.com>`
pub fn email_domain(email: &str) -> Result<String, DetectionError> {
    let parsed = mailparse::addrparse(email)
        .map_err(|e| DetectionError::InvalidEmail(format!("{}: {}", email, e)))?;

    let single = parsed
        .extract_single_info()
        .ok_or_else(|| DetectionError::InvalidEmail(email.to_string()))?;

    match single.addr.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.trim().is_empty() => {
            Ok(domain.trim().trim_end_matches('.').to_lowercase())
        }
        _ => Err(DetectionError::InvalidEmail(email.to_string())),
    }
}
