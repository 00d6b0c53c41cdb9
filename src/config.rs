//! Runtime settings for the documentation cache and the content providers.

use std::time::Duration;

use crate::cache::EntryKind;

const HOUR: u64 = 60 * 60;

/// Tuning knobs for the tiered cache and the refresh coordinator.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of documentation entries.
    pub docs_ttl: Duration,
    /// Lifetime of code example entries.
    pub examples_ttl: Duration,
    /// Maximum number of entries held by the local tier.
    pub local_capacity: usize,
    /// Byte budget for content held by the local tier.
    pub local_max_bytes: usize,
    /// How long an expired entry is retained for serve-stale-on-error.
    pub stale_grace: Duration,
    /// Characters of context on each side of a search match.
    pub excerpt_radius: usize,
    /// Frameworks refreshed in parallel by a bulk refresh.
    pub refresh_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            docs_ttl: Duration::from_secs(24 * HOUR),
            examples_ttl: Duration::from_secs(24 * HOUR),
            local_capacity: 512,
            local_max_bytes: 64 * 1024 * 1024,
            stale_grace: Duration::from_secs(7 * 24 * HOUR),
            excerpt_radius: 160,
            refresh_concurrency: 4,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: EntryKind) -> Duration {
        match kind {
            EntryKind::Docs => self.docs_ttl,
            EntryKind::Examples => self.examples_ttl,
        }
    }

    pub fn with_ttl_hours(mut self, docs: u64, examples: u64) -> Self {
        self.docs_ttl = Duration::from_secs(docs * HOUR);
        self.examples_ttl = Duration::from_secs(examples * HOUR);
        self
    }
}

/// Settings shared by the HTTP-backed content providers.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for raw repository files.
    pub github_raw_base: String,
    pub github_token: Option<String>,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            github_raw_base: "https://raw.githubusercontent.com".to_string(),
            github_token: None,
            request_timeout: Duration::from_secs(30),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
