use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

use framework_docs_mcp::cache::{
    CacheKey, DirectoryRemote, OriginMetadata, RemoteCache, RemoteCacheError, TieredCache,
};
use framework_docs_mcp::config::CacheConfig;
use framework_docs_mcp::coordinator::ResolutionSource;
use framework_docs_mcp::providers::{ContentProvider, FetchError, FetchedContent};
use framework_docs_mcp::registry::{FrameworkDescriptor, FrameworkRegistry, SourceDescriptor};
use framework_docs_mcp::service::{DocsService, ServiceError};

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingProvider {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for CountingProvider {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        key: &CacheKey,
    ) -> Result<FetchedContent, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let url = format!("https://raw.example.com/{}/{}", source.location, key);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status { status: 503, url });
        }
        let content = format!("# {key}\nHooks let you use state. Revision {call}.");
        Ok(FetchedContent {
            origin: OriginMetadata {
                source_url: url,
                content_length: content.len(),
            },
            content,
        })
    }
}

struct UnreachableRemote;

#[async_trait]
impl RemoteCache for UnreachableRemote {
    async fn get(&self, _key: &str) -> Result<Option<String>, RemoteCacheError> {
        Err(RemoteCacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> Result<(), RemoteCacheError> {
        Err(RemoteCacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), RemoteCacheError> {
        Err(RemoteCacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<usize, RemoteCacheError> {
        Err(RemoteCacheError::Unavailable("connection refused".to_string()))
    }
}

fn catalog() -> Vec<FrameworkDescriptor> {
    serde_json::from_value(json!([
        {
            "name": "react",
            "display_name": "React",
            "category": "web",
            "source": { "type": "github-repo", "location": "reactjs/react.dev" },
            "keywords": ["jsx", "hooks", "components"]
        },
        {
            "name": "vue",
            "category": "web",
            "source": { "type": "github-repo", "location": "vuejs/docs" },
            "keywords": ["sfc", "reactivity"]
        },
        {
            "name": "fastapi",
            "category": "backend",
            "source": { "type": "github-repo", "location": "fastapi/fastapi" },
            "keywords": ["python", "async"]
        }
    ]))
    .unwrap()
}

fn service_with(
    provider: Arc<CountingProvider>,
    remote: Option<Arc<dyn RemoteCache>>,
    config: CacheConfig,
) -> DocsService {
    let registry = Arc::new(FrameworkRegistry::new());
    registry.initialize(catalog()).unwrap();
    DocsService::new(registry, TieredCache::new(&config, remote), provider, config)
}

fn service(provider: Arc<CountingProvider>) -> DocsService {
    service_with(provider, None, CacheConfig::default())
}

#[tokio::test]
async fn test_keyword_search_finds_react() {
    let service = service(Arc::new(CountingProvider::default()));
    let names: Vec<_> = service
        .search_frameworks("hoo")
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, ["react"]);
}

#[tokio::test]
async fn test_info_lookup_is_case_insensitive() {
    let service = service(Arc::new(CountingProvider::default()));
    let upper = service.get_framework_info("REACT").unwrap();
    let lower = service.get_framework_info("react").unwrap();
    assert_eq!(upper, lower);

    let missing = service.get_framework_info("angular").unwrap_err();
    assert!(matches!(missing, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_cold_cache_fetches_once_then_hits() {
    let provider = Arc::new(CountingProvider::default());
    let service = service(provider.clone());

    let first = service.get_framework_docs("react", None, true).await.unwrap();
    let second = service.get_framework_docs("react", None, true).await.unwrap();

    assert_eq!(first.source, ResolutionSource::Fetched);
    assert_eq!(second.source, ResolutionSource::Cache);
    assert_eq!(first.entry, second.entry);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_force_refresh_fetches_despite_fresh_entry() {
    let provider = Arc::new(CountingProvider::default());
    let service = service(provider.clone());

    service.get_framework_docs("react", None, true).await.unwrap();
    let summary = service.refresh_framework_cache(Some("react"), true).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert!(summary.frameworks[0].refreshed.contains(&CacheKey::docs("react", None)));
    // default docs key twice, default examples key once
    assert_eq!(provider.calls(), 3);

    let after = service.get_framework_docs("react", None, true).await.unwrap();
    let content = &after.entry.content;
    assert!(content.contains("Revision 2") || content.contains("Revision 3"));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let provider = Arc::new(CountingProvider::default());
    let service = service(provider.clone());

    let (a, b) = tokio::join!(
        service.get_framework_docs("vue", None, true),
        service.get_framework_docs("vue", None, true),
    );

    assert_eq!(a.unwrap().entry, b.unwrap().entry);
    assert_eq!(provider.calls(), 1);
    assert_eq!(service.cache_statistics().fetches, 1);
}

#[tokio::test]
async fn test_stale_entry_served_when_upstream_fails() {
    let provider = Arc::new(CountingProvider::default());
    let config = CacheConfig {
        docs_ttl: Duration::ZERO,
        ..CacheConfig::default()
    };
    let service = service_with(provider.clone(), None, config);

    let original = service.get_framework_docs("react", None, true).await.unwrap();
    provider.failing.store(true, Ordering::SeqCst);

    let fallback = service.get_framework_docs("react", None, true).await.unwrap();
    assert_eq!(fallback.source, ResolutionSource::StaleFallback);
    assert_eq!(fallback.entry, original.entry);

    let stats = service.cache_statistics();
    assert_eq!((stats.fetch_failures, stats.stale_served), (1, 1));

    let report = service.check_framework_updates("react").await.unwrap();
    assert!(report.needs_refresh);
}

#[tokio::test]
async fn test_failure_without_entry_is_surfaced() {
    let provider = Arc::new(CountingProvider::default());
    provider.failing.store(true, Ordering::SeqCst);
    let service = service(provider);

    let error = service.get_framework_examples("fastapi", Some("auth")).await.unwrap_err();
    assert!(matches!(error, ServiceError::Refresh(_)));
    assert!(error.to_string().contains("HTTP 503"));
}

async fn run_sequence(service: &DocsService) -> Vec<(ResolutionSource, String)> {
    let mut outcomes = Vec::new();
    let requests = [
        ("react", None),
        ("react", Some("hooks")),
        ("react", None),
        ("vue", None),
    ];
    for (name, section) in requests {
        let resolution = service.get_framework_docs(name, section, true).await.unwrap();
        outcomes.push((resolution.source, resolution.entry.content));
    }
    let excerpts = service.search_documentation("react", "hooks", 10).await.unwrap();
    outcomes.push((ResolutionSource::Cache, excerpts.len().to_string()));
    outcomes
}

#[tokio::test]
async fn test_unreachable_remote_behaves_like_no_remote() {
    let local_provider = Arc::new(CountingProvider::default());
    let local = service(local_provider.clone());

    let degraded_provider = Arc::new(CountingProvider::default());
    let degraded = service_with(
        degraded_provider.clone(),
        Some(Arc::new(UnreachableRemote)),
        CacheConfig::default(),
    );

    assert_eq!(run_sequence(&local).await, run_sequence(&degraded).await);
    assert_eq!(local_provider.calls(), degraded_provider.calls());

    let (a, b) = (local.cache_statistics(), degraded.cache_statistics());
    assert_eq!((a.hits, a.misses, a.fetches), (b.hits, b.misses, b.fetches));
}

async fn directory_remote(dir: &tempfile::TempDir) -> Arc<dyn RemoteCache> {
    Arc::new(DirectoryRemote::connect(dir.path().to_path_buf()).await.unwrap())
}

#[tokio::test]
async fn test_shared_remote_warms_second_instance() {
    let dir = tempdir().unwrap();

    let first_provider = Arc::new(CountingProvider::default());
    let remote = directory_remote(&dir).await;
    let first = service_with(first_provider.clone(), Some(remote), CacheConfig::default());
    let fetched = first.get_framework_docs("fastapi", None, true).await.unwrap();

    let second_provider = Arc::new(CountingProvider::default());
    let remote = directory_remote(&dir).await;
    let second = service_with(second_provider.clone(), Some(remote), CacheConfig::default());
    let warmed = second.get_framework_docs("fastapi", None, true).await.unwrap();

    assert_eq!(warmed.source, ResolutionSource::Cache);
    assert_eq!(warmed.entry, fetched.entry);
    assert_eq!(second_provider.calls(), 0);
}

#[tokio::test]
async fn test_invalidate_all_clears_entries_written_by_other_instance() {
    let dir = tempdir().unwrap();
    let config = CacheConfig::default();

    let writer_provider = Arc::new(CountingProvider::default());
    let remote = directory_remote(&dir).await;
    let writer = service_with(writer_provider, Some(remote), config.clone());
    writer.get_framework_examples("react", Some("auth")).await.unwrap();
    writer.get_framework_docs("vue", None, true).await.unwrap();

    // this instance never saw either key
    let other = TieredCache::new(&config, Some(directory_remote(&dir).await));
    assert_eq!(other.invalidate_all(None).await, 0);

    let reader_provider = Arc::new(CountingProvider::default());
    let remote = directory_remote(&dir).await;
    let reader = service_with(reader_provider.clone(), Some(remote), config);
    let examples = reader.get_framework_examples("react", Some("auth")).await.unwrap();
    let docs = reader.get_framework_docs("vue", None, true).await.unwrap();

    assert_eq!(examples.source, ResolutionSource::Fetched);
    assert_eq!(docs.source, ResolutionSource::Fetched);
    assert_eq!(reader_provider.calls(), 2);
}
