use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::config::CacheConfig;
use crate::lock::{rw_read, rw_write};

const STORAGE_NAMESPACE: &str = "framework-docs";

#[derive(Debug, Error)]
pub enum RemoteCacheError {
    #[error("Remote cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Remote cache encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Remote cache unavailable: {0}")]
    Unavailable(String),
}

/// Shared key-value tier. Values carry their own expiry; an implementation
/// may drop them earlier under capacity pressure.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteCacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), RemoteCacheError>;
    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError>;
    /// Removes every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, RemoteCacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Docs,
    Examples,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Docs => "docs",
            EntryKind::Examples => "examples",
        }
    }
}

/// Addresses one cached document: a framework, an optional section (docs) or
/// pattern (examples), and the kind of content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub framework: String,
    pub kind: EntryKind,
    pub selector: Option<String>,
}

impl CacheKey {
    pub fn new(framework: &str, kind: EntryKind, selector: Option<&str>) -> Self {
        Self {
            framework: framework.trim().to_lowercase(),
            kind,
            selector: selector
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    pub fn docs(framework: &str, section: Option<&str>) -> Self {
        Self::new(framework, EntryKind::Docs, section)
    }

    pub fn examples(framework: &str, pattern: Option<&str>) -> Self {
        Self::new(framework, EntryKind::Examples, pattern)
    }

    /// Key used in the remote tier.
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}:{}",
            Self::storage_prefix(Some(&self.framework)),
            self.kind.as_str(),
            self.selector.as_deref().unwrap_or("")
        )
    }

    /// Remote-tier prefix shared by every key of `framework`, or by all keys.
    pub fn storage_prefix(framework: Option<&str>) -> String {
        match framework {
            Some(name) => format!("{STORAGE_NAMESPACE}:{}:", name.trim().to_lowercase()),
            None => format!("{STORAGE_NAMESPACE}:"),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.framework, self.kind.as_str())?;
        if let Some(selector) = &self.selector {
            write!(f, "/{selector}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMetadata {
    pub source_url: String,
    pub content_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: String,
    pub origin: OriginMetadata,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        content: String,
        origin: OriginMetadata,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            content,
            origin,
            fetched_at,
            ttl,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        deadline(self.fetched_at, self.ttl)
    }

    fn size(&self) -> usize {
        self.content.len()
    }
}

/// An entry is stale once its age exceeds its TTL. A zero TTL is always stale.
pub fn is_stale(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    if entry.ttl.is_zero() {
        return true;
    }
    age(entry, now) > entry.ttl
}

fn age(entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
    // negative ages (clock skew) count as brand new
    now.signed_duration_since(entry.fetched_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn deadline(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct LocalTier {
    entries: LruCache<CacheKey, CacheEntry>,
    bytes: usize,
    max_bytes: usize,
}

impl LocalTier {
    fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            bytes: 0,
            max_bytes,
        }
    }

    /// Inserts `entry` and returns the keys evicted to make room for it.
    fn insert(&mut self, key: CacheKey, entry: CacheEntry) -> Vec<CacheKey> {
        let mut evicted = Vec::new();
        self.bytes += entry.size();
        if let Some((displaced_key, displaced)) = self.entries.push(key.clone(), entry) {
            self.bytes -= displaced.size();
            if displaced_key != key {
                tracing::debug!("Local tier evicted {} (capacity)", displaced_key);
                evicted.push(displaced_key);
            }
        }
        while self.bytes > self.max_bytes && self.entries.len() > 1 {
            match self.entries.pop_lru() {
                Some((evicted_key, dropped)) => {
                    self.bytes -= dropped.size();
                    tracing::debug!("Local tier evicted {} (size)", evicted_key);
                    evicted.push(evicted_key);
                }
                None => break,
            }
        }
        evicted
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.bytes -= entry.size();
                true
            }
            None => false,
        }
    }

    fn remove_framework(&mut self, framework: &str) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.framework == framework)
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter(|key| self.remove(key)).count()
    }
}

/// Two-tier document cache: an in-process LRU tier in front of an optional
/// shared remote tier.
///
/// Reads check the local tier first, then the remote tier, backfilling the
/// local tier on a remote hit. Writes go to both tiers; remote failures are
/// logged and never surfaced. Expired entries read as absent but are kept for
/// `stale_grace` so a failed refresh can still serve them through [`peek`].
///
/// [`peek`]: TieredCache::peek
pub struct TieredCache {
    local: RwLock<LocalTier>,
    remote: Option<Arc<dyn RemoteCache>>,
    index: RwLock<BTreeMap<String, BTreeSet<CacheKey>>>,
    stale_grace: Duration,
}

impl TieredCache {
    pub fn new(config: &CacheConfig, remote: Option<Arc<dyn RemoteCache>>) -> Self {
        Self {
            local: RwLock::new(LocalTier::new(config.local_capacity, config.local_max_bytes)),
            remote,
            index: RwLock::new(BTreeMap::new()),
            stale_grace: config.stale_grace,
        }
    }

    pub fn local_only(config: &CacheConfig) -> Self {
        Self::new(config, None)
    }

    pub fn remote_configured(&self) -> bool {
        self.remote.is_some()
    }

    pub fn local_len(&self) -> usize {
        rw_read(&self.local, "cache.local_len").entries.len()
    }

    /// Live entry for `key` from either tier.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Utc::now();
        if let Some(entry) = self.get_local(key, now) {
            return Some(entry);
        }

        let entry = self.get_remote(key).await?;
        if is_stale(&entry, now) {
            return None;
        }
        tracing::debug!("Remote tier hit for {}, backfilling local tier", key);
        self.insert_local(key.clone(), entry.clone());
        Some(entry)
    }

    /// Live entry for `key` from the local tier only. Never suspends.
    pub fn get_local(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let found = {
            let local = rw_read(&self.local, "cache.get_local");
            local.entries.peek(key).cloned()
        };
        let entry = found?;

        if !is_stale(&entry, now) {
            // recency is best effort; readers never wait on writers for it
            if let Ok(mut local) = self.local.try_write() {
                local.entries.promote(key);
            }
            return Some(entry);
        }

        if self.beyond_grace(&entry, now) {
            tracing::debug!("Evicting {} past its stale grace", key);
            rw_write(&self.local, "cache.get_local").remove(key);
            self.forget(std::slice::from_ref(key));
        }
        None
    }

    /// Entry for `key` whether or not it is stale, as long as it is still
    /// within the stale grace window.
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Utc::now();
        let local = rw_read(&self.local, "cache.peek").entries.peek(key).cloned();
        let entry = match local {
            Some(entry) => entry,
            None => self.get_remote(key).await?,
        };
        (!self.beyond_grace(&entry, now)).then_some(entry)
    }

    pub async fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.insert_local(key.clone(), entry.clone());

        let Some(remote) = &self.remote else {
            return;
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("Failed to encode {} for the remote tier: {}", key, e);
                return;
            }
        };
        let remote_ttl = entry.ttl.saturating_add(self.stale_grace);
        if let Err(e) = remote.set(&key.storage_key(), encoded, remote_ttl).await {
            tracing::warn!("Remote tier write failed for {}: {}", key, e);
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        rw_write(&self.local, "cache.invalidate").remove(key);
        self.forget(std::slice::from_ref(key));
        self.delete_remote(key).await;
    }

    /// Drops every entry for `framework`, or for all frameworks, from both
    /// tiers. Remote entries written by other instances are removed too.
    /// Returns the number of local entries removed.
    pub async fn invalidate_all(&self, framework: Option<&str>) -> usize {
        let framework = framework.map(|name| name.trim().to_lowercase());

        let removed = {
            let mut local = rw_write(&self.local, "cache.invalidate_all");
            match &framework {
                Some(name) => local.remove_framework(name),
                None => {
                    let removed = local.entries.len();
                    local.entries.clear();
                    local.bytes = 0;
                    removed
                }
            }
        };
        {
            let mut index = rw_write(&self.index, "cache.invalidate_all");
            match &framework {
                Some(name) => {
                    index.remove(name);
                }
                None => index.clear(),
            }
        }

        let mut removed_remote = 0;
        if let Some(remote) = &self.remote {
            let prefix = CacheKey::storage_prefix(framework.as_deref());
            match remote.delete_prefix(&prefix).await {
                Ok(count) => removed_remote = count,
                Err(e) => tracing::warn!("Remote tier invalidation failed for {}: {}", prefix, e),
            }
        }

        tracing::info!(
            framework = framework.as_deref().unwrap_or("*"),
            removed,
            removed_remote,
            "Invalidated cached documentation"
        );
        removed
    }

    /// Keys this process knows about for `framework`: the default docs and
    /// examples keys plus every key held by the local tier, in key order.
    pub fn known_keys(&self, framework: &str) -> Vec<CacheKey> {
        let mut keys = BTreeSet::from([
            CacheKey::docs(framework, None),
            CacheKey::examples(framework, None),
        ]);
        let name = framework.trim().to_lowercase();
        if let Some(stored) = rw_read(&self.index, "cache.known_keys").get(&name) {
            keys.extend(stored.iter().cloned());
        }
        keys.into_iter().collect()
    }

    fn insert_local(&self, key: CacheKey, entry: CacheEntry) {
        let evicted = rw_write(&self.local, "cache.insert_local").insert(key.clone(), entry);
        {
            let mut index = rw_write(&self.index, "cache.insert_local");
            index.entry(key.framework.clone()).or_default().insert(key);
        }
        self.forget(&evicted);
    }

    /// Drops `keys` from the known-key index.
    fn forget(&self, keys: &[CacheKey]) {
        if keys.is_empty() {
            return;
        }
        let mut index = rw_write(&self.index, "cache.forget");
        for key in keys {
            if let Some(stored) = index.get_mut(&key.framework) {
                stored.remove(key);
                if stored.is_empty() {
                    index.remove(&key.framework);
                }
            }
        }
    }

    async fn get_remote(&self, key: &CacheKey) -> Option<CacheEntry> {
        let remote = self.remote.as_ref()?;
        match remote.get(&key.storage_key()).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Discarding undecodable remote entry for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Remote tier read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn delete_remote(&self, key: &CacheKey) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(&key.storage_key()).await {
                tracing::warn!("Remote tier delete failed for {}: {}", key, e);
            }
        }
    }

    fn beyond_grace(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        age(entry, now) > entry.ttl.saturating_add(self.stale_grace)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    expires_at: DateTime<Utc>,
    value: String,
}

/// Remote tier backed by a shared directory: one JSON file per key, each
/// carrying its absolute expiry. Several server processes on one host (or
/// one process across restarts) can share it.
#[derive(Debug)]
pub struct DirectoryRemote {
    dir: PathBuf,
    writes: AtomicU64,
}

impl DirectoryRemote {
    /// Opens `dir`, creating it if needed, and checks that it is writable.
    pub async fn connect(dir: PathBuf) -> Result<Self, RemoteCacheError> {
        fs::create_dir_all(&dir).await?;
        let marker = dir.join(format!(".write-check-{}", std::process::id()));
        fs::write(&marker, b"ok").await?;
        fs::remove_file(&marker).await?;

        tracing::info!("Remote cache directory ready at {:?}", dir);
        Ok(Self {
            dir,
            writes: AtomicU64::new(0),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait]
impl RemoteCache for DirectoryRemote {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteCacheError> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredValue = serde_json::from_str(&content)?;
        if stored.expires_at <= Utc::now() {
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed expired remote entry {:?}", path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove expired remote entry {:?}: {}", path, e),
            }
            return Ok(None);
        }
        Ok(Some(stored.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), RemoteCacheError> {
        let stored = StoredValue {
            expires_at: deadline(Utc::now(), ttl),
            value,
        };
        let serialized = serde_json::to_string(&stored)?;

        // write-then-rename so concurrent readers never see a torn file
        let path = self.path_for(key);
        let sequence = self.writes.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}-{}.tmp", std::process::id(), sequence));
        fs::write(&tmp, serialized).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, RemoteCacheError> {
        // percent-encoding works byte by byte, so encoded names keep the prefix
        let encoded: String = url::form_urlencoded::byte_serialize(prefix.as_bytes()).collect();
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(&encoded) || !name.ends_with(".json") {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

/// Remote tier backed by Redis, shareable by server instances on any host.
#[derive(Clone)]
pub struct RedisRemote {
    conn: MultiplexedConnection,
}

impl RedisRemote {
    /// Connects to `url` and checks the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, RemoteCacheError> {
        let client = redis::Client::open(url)?;
        let connecting = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, RemoteCacheError>(conn)
        };
        let conn = tokio::time::timeout(REDIS_CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| {
                RemoteCacheError::Unavailable(format!(
                    "no answer from Redis within {}s",
                    REDIS_CONNECT_TIMEOUT.as_secs()
                ))
            })??;

        tracing::info!("Connected to Redis remote tier");
        Ok(Self { conn })
    }
}

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Escapes glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl RemoteCache for RedisRemote {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteCacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), RemoteCacheError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, RemoteCacheError> {
        let keys: Vec<String> = {
            let mut conn = self.conn.clone();
            let mut iter = conn.scan_match::<_, String>(scan_pattern(prefix)).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let removed: usize = conn.del(&keys).await?;
        Ok(removed)
    }
}
