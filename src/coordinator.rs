//! Freshness and refresh coordination.
//!
//! [`RefreshCoordinator`] decides when cached documentation must be fetched
//! again and guarantees that, per cache key, at most one provider fetch is in
//! flight at any time. Concurrent callers for the same key attach to the
//! in-flight ticket and all observe the same outcome.
//!
//! Fetches run on their own task, so a caller that stops waiting (timeout,
//! cancelled request) never cancels the fetch other callers depend on.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

use crate::cache::{CacheEntry, CacheKey, TieredCache, is_stale};
use crate::config::CacheConfig;
use crate::lock::mutex_lock;
use crate::providers::{ContentProvider, FetchError};
use crate::registry::{FrameworkDescriptor, FrameworkNotFound, FrameworkRegistry, SourceDescriptor};

#[derive(Debug, Clone, Error)]
#[error("Failed to fetch {key}: {source}")]
pub struct RefreshError {
    pub key: CacheKey,
    pub source: Arc<FetchError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Served from a live cache entry.
    Cache,
    /// Fetched from the provider just now.
    Fetched,
    /// The fetch failed and an expired entry was served instead.
    StaleFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub key: CacheKey,
    pub entry: CacheEntry,
    pub source: ResolutionSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameworkActivity {
    pub fetches: u64,
    pub failures: u64,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub forced_refreshes: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub stale_served: u64,
    pub hit_rate: f64,
    pub in_flight: usize,
    pub local_entries: usize,
    pub remote_tier: bool,
    pub frameworks: BTreeMap<String, FrameworkActivity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryStatus {
    pub key: CacheKey,
    pub cached: bool,
    pub stale: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StalenessReport {
    pub framework: String,
    pub checked_at: DateTime<Utc>,
    pub entries: Vec<EntryStatus>,
    pub stale_entries: usize,
    pub missing_entries: usize,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyFailure {
    pub key: CacheKey,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameworkRefresh {
    pub framework: String,
    pub refreshed: Vec<CacheKey>,
    pub still_fresh: Vec<CacheKey>,
    pub failed: Vec<KeyFailure>,
}

impl FrameworkRefresh {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub force: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub frameworks: Vec<FrameworkRefresh>,
}

type Outcome = Result<Resolution, RefreshError>;
type Ticket = watch::Receiver<Option<Outcome>>;

enum Attachment {
    Ready(Resolution),
    Waiting(Ticket),
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    forced_refreshes: u64,
    fetches: u64,
    fetch_failures: u64,
    stale_served: u64,
    frameworks: BTreeMap<String, FrameworkActivity>,
}

struct Shared {
    store: TieredCache,
    provider: Arc<dyn ContentProvider>,
    registry: Arc<FrameworkRegistry>,
    config: CacheConfig,
    tickets: Mutex<HashMap<CacheKey, Ticket>>,
    counters: Mutex<Counters>,
}

/// Removes the ticket for `key` when the fetch task ends, including by panic.
struct TicketGuard {
    shared: Arc<Shared>,
    key: CacheKey,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        mutex_lock(&self.shared.tickets, "coordinator.ticket_guard").remove(&self.key);
    }
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl RefreshCoordinator {
    pub fn new(
        store: TieredCache,
        provider: Arc<dyn ContentProvider>,
        registry: Arc<FrameworkRegistry>,
        config: CacheConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                provider,
                registry,
                config,
                tickets: Mutex::new(HashMap::new()),
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    pub fn store(&self) -> &TieredCache {
        &self.shared.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Returns a live cached entry for `key`, or fetches one.
    ///
    /// With `use_cache` off or `force_refresh` on, the cache read is skipped.
    /// A failed fetch falls back to an expired entry when one is still held;
    /// otherwise every caller waiting on that fetch receives the same error.
    pub async fn get_or_refresh(
        &self,
        key: CacheKey,
        source: &SourceDescriptor,
        force_refresh: bool,
        use_cache: bool,
    ) -> Result<Resolution, RefreshError> {
        let consult_cache = use_cache && !force_refresh;

        if consult_cache {
            if let Some(entry) = self.shared.store.get(&key).await {
                self.shared.count(|c| c.hits += 1);
                tracing::debug!("Cache hit for {}", key);
                return Ok(Resolution {
                    key,
                    entry,
                    source: ResolutionSource::Cache,
                });
            }
            self.shared.count(|c| c.misses += 1);
            tracing::debug!("Cache miss for {}", key);
        } else {
            self.shared.count(|c| c.forced_refreshes += 1);
            tracing::debug!("Bypassing cache for {}", key);
        }

        match self.attach_or_start(&key, source, consult_cache) {
            Attachment::Ready(resolution) => {
                // another caller stored the entry while our lookup missed
                self.shared.count(|c| {
                    c.misses = c.misses.saturating_sub(1);
                    c.hits += 1;
                });
                Ok(resolution)
            }
            Attachment::Waiting(ticket) => Self::await_ticket(key, ticket).await,
        }
    }

    fn attach_or_start(
        &self,
        key: &CacheKey,
        source: &SourceDescriptor,
        consult_cache: bool,
    ) -> Attachment {
        let mut tickets = mutex_lock(&self.shared.tickets, "coordinator.attach");

        if let Some(ticket) = tickets.get(key) {
            tracing::debug!("Joining in-flight fetch for {}", key);
            return Attachment::Waiting(ticket.clone());
        }

        // a fetch may have completed between our cache read and taking the lock
        if consult_cache {
            if let Some(entry) = self.shared.store.get_local(key, Utc::now()) {
                return Attachment::Ready(Resolution {
                    key: key.clone(),
                    entry,
                    source: ResolutionSource::Cache,
                });
            }
        }

        let (sender, ticket) = watch::channel(None);
        tickets.insert(key.clone(), ticket.clone());
        drop(tickets);

        let guard = TicketGuard {
            shared: self.shared.clone(),
            key: key.clone(),
        };
        tokio::spawn(Shared::fetch(self.shared.clone(), guard, source.clone(), sender));
        Attachment::Waiting(ticket)
    }

    async fn await_ticket(key: CacheKey, mut ticket: Ticket) -> Outcome {
        let resolved = match ticket.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        resolved.unwrap_or_else(|| {
            Err(RefreshError {
                key,
                source: Arc::new(FetchError::Aborted),
            })
        })
    }

    /// Reports freshness of every known key of `framework` without fetching.
    pub async fn check_updates(
        &self,
        framework: &str,
    ) -> Result<StalenessReport, FrameworkNotFound> {
        let descriptor = self.shared.registry.require(framework)?;
        let name = descriptor.key();
        let now = Utc::now();

        let mut entries = Vec::new();
        for key in self.known_keys(&descriptor) {
            let status = match self.shared.store.peek(&key).await {
                Some(entry) => EntryStatus {
                    stale: is_stale(&entry, now),
                    cached: true,
                    fetched_at: Some(entry.fetched_at),
                    expires_at: Some(entry.expires_at()),
                    key,
                },
                None => EntryStatus {
                    key,
                    cached: false,
                    stale: false,
                    fetched_at: None,
                    expires_at: None,
                },
            };
            entries.push(status);
        }

        let stale_entries = entries.iter().filter(|e| e.stale).count();
        let missing_entries = entries.iter().filter(|e| !e.cached).count();
        let last_refreshed = mutex_lock(&self.shared.counters, "coordinator.check_updates")
            .frameworks
            .get(&name)
            .and_then(|activity| activity.last_refreshed);

        Ok(StalenessReport {
            framework: name,
            checked_at: now,
            needs_refresh: stale_entries > 0,
            entries,
            stale_entries,
            missing_entries,
            last_refreshed,
        })
    }

    /// Refreshes every known key of one framework, or of every registered
    /// framework. Failures are reported per framework and never abort the batch.
    pub async fn refresh_all(
        &self,
        framework: Option<&str>,
        force: bool,
    ) -> Result<RefreshSummary, FrameworkNotFound> {
        let targets = match framework {
            Some(name) => vec![self.shared.registry.require(name)?],
            None => self.shared.registry.list(None),
        };

        let concurrency = self.shared.config.refresh_concurrency.max(1);
        let mut frameworks: Vec<FrameworkRefresh> = stream::iter(targets)
            .map(|descriptor| self.refresh_framework(descriptor, force))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        frameworks.sort_by(|a, b| a.framework.cmp(&b.framework));

        let succeeded = frameworks.iter().filter(|f| f.succeeded()).count();
        let summary = RefreshSummary {
            force,
            succeeded,
            failed: frameworks.len() - succeeded,
            frameworks,
        };
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            force,
            "Framework cache refresh finished"
        );
        Ok(summary)
    }

    async fn refresh_framework(
        &self,
        descriptor: FrameworkDescriptor,
        force: bool,
    ) -> FrameworkRefresh {
        let name = descriptor.key();
        let mut report = FrameworkRefresh {
            framework: name.clone(),
            refreshed: Vec::new(),
            still_fresh: Vec::new(),
            failed: Vec::new(),
        };

        for key in self.known_keys(&descriptor) {
            match self.get_or_refresh(key.clone(), &descriptor.source, force, true).await {
                Ok(resolution) => match resolution.source {
                    ResolutionSource::Cache => report.still_fresh.push(key),
                    ResolutionSource::Fetched => report.refreshed.push(key),
                    ResolutionSource::StaleFallback => report.failed.push(KeyFailure {
                        key,
                        error: "refresh failed, kept the previous entry".to_string(),
                    }),
                },
                Err(e) => report.failed.push(KeyFailure {
                    key,
                    error: e.source.to_string(),
                }),
            }
        }
        report
    }

    /// Keys tracked for `descriptor`: those the store knows about plus one
    /// examples key per catalog pattern.
    fn known_keys(&self, descriptor: &FrameworkDescriptor) -> Vec<CacheKey> {
        let name = descriptor.key();
        let mut keys: BTreeSet<CacheKey> =
            self.shared.store.known_keys(&name).into_iter().collect();
        keys.extend(
            descriptor
                .patterns
                .iter()
                .map(|pattern| CacheKey::examples(&name, Some(pattern))),
        );
        keys.into_iter().collect()
    }

    pub fn statistics(&self) -> CacheStatistics {
        let in_flight = mutex_lock(&self.shared.tickets, "coordinator.statistics").len();
        let counters = mutex_lock(&self.shared.counters, "coordinator.statistics");
        let lookups = counters.hits + counters.misses;

        CacheStatistics {
            hits: counters.hits,
            misses: counters.misses,
            forced_refreshes: counters.forced_refreshes,
            fetches: counters.fetches,
            fetch_failures: counters.fetch_failures,
            stale_served: counters.stale_served,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                counters.hits as f64 / lookups as f64
            },
            in_flight,
            local_entries: self.shared.store.local_len(),
            remote_tier: self.shared.store.remote_configured(),
            frameworks: counters.frameworks.clone(),
        }
    }
}

impl Shared {
    fn count(&self, update: impl FnOnce(&mut Counters)) {
        update(&mut mutex_lock(&self.counters, "coordinator.count"));
    }

    fn count_framework(
        &self,
        framework: &str,
        update: impl FnOnce(&mut Counters, &mut FrameworkActivity),
    ) {
        let mut counters = mutex_lock(&self.counters, "coordinator.count_framework");
        let mut activity = counters.frameworks.remove(framework).unwrap_or_default();
        update(&mut counters, &mut activity);
        counters.frameworks.insert(framework.to_string(), activity);
    }

    async fn fetch(
        self: Arc<Self>,
        guard: TicketGuard,
        source: SourceDescriptor,
        sender: watch::Sender<Option<Outcome>>,
    ) {
        let key = guard.key.clone();
        tracing::info!("Fetching {}", key);

        let outcome = match self.provider.fetch(&source, &key).await {
            Ok(fetched) => {
                let entry = CacheEntry::new(
                    fetched.content,
                    fetched.origin,
                    Utc::now(),
                    self.config.ttl_for(key.kind),
                );
                self.store.put(key.clone(), entry.clone()).await;
                self.count_framework(&key.framework, |counters, activity| {
                    counters.fetches += 1;
                    activity.fetches += 1;
                    activity.last_refreshed = Some(entry.fetched_at);
                });
                Ok(Resolution {
                    key: key.clone(),
                    entry,
                    source: ResolutionSource::Fetched,
                })
            }
            Err(e) => {
                tracing::warn!("Fetch failed for {}: {}", key, e);
                self.count_framework(&key.framework, |counters, activity| {
                    counters.fetch_failures += 1;
                    activity.failures += 1;
                    activity.last_failure = Some(Utc::now());
                });

                match self.store.peek(&key).await {
                    Some(previous) => {
                        tracing::warn!(
                            "Serving stale entry for {} fetched at {}",
                            key,
                            previous.fetched_at
                        );
                        self.count(|c| c.stale_served += 1);
                        Ok(Resolution {
                            key: key.clone(),
                            entry: previous,
                            source: ResolutionSource::StaleFallback,
                        })
                    }
                    None => Err(RefreshError {
                        key: key.clone(),
                        source: Arc::new(e),
                    }),
                }
            }
        };

        // retire the ticket first so a later request can start a new fetch
        drop(guard);
        sender.send_replace(Some(outcome));
    }
}
