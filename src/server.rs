use anyhow::{Context, Result};
use rmcp::ServiceExt;
use rmcp::transport::sse_server::SseServer;
use rmcp::transport::stdio;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{self, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::{DirectoryRemote, RedisRemote, RemoteCache, TieredCache};
use crate::config::{CacheConfig, ProviderConfig};
use crate::mcp::FrameworkDocs;
use crate::providers::ProviderRouter;
use crate::registry::{FrameworkRegistry, builtin_catalog, load_catalog_dir};
use crate::service::DocsService;

/// Everything needed to assemble a [`DocsService`].
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    /// Directory of catalog JSON files. The bundled catalog is used when unset.
    pub catalog_dir: Option<PathBuf>,
    /// Redis server backing the shared remote tier. Takes precedence over
    /// `remote_cache_dir`.
    pub redis_url: Option<String>,
    /// Directory backing the shared remote tier. Local-only when neither is set.
    pub remote_cache_dir: Option<PathBuf>,
    pub cache: CacheConfig,
    pub providers: ProviderConfig,
}

/// Loads the registry and wires the cache tiers and providers together.
///
/// A catalog that fails to load is fatal. A remote tier that cannot be opened
/// is not: the service starts with the local tier only.
pub async fn build_service(settings: &ServerSettings) -> Result<DocsService> {
    let records = match &settings.catalog_dir {
        Some(dir) => load_catalog_dir(dir)
            .await
            .with_context(|| format!("failed to load framework catalog from {}", dir.display()))?,
        None => builtin_catalog().context("failed to load bundled framework catalog")?,
    };
    let registry = Arc::new(FrameworkRegistry::new());
    let count = registry
        .initialize(records)
        .context("failed to initialize framework registry")?;
    tracing::info!("Loaded {} frameworks", count);

    let remote = connect_remote(settings).await;
    let store = TieredCache::new(&settings.cache, remote);
    let provider = Arc::new(ProviderRouter::from_config(&settings.providers)?);

    Ok(DocsService::new(registry, store, provider, settings.cache.clone()))
}

async fn connect_remote(settings: &ServerSettings) -> Option<Arc<dyn RemoteCache>> {
    if let Some(url) = &settings.redis_url {
        return match RedisRemote::connect(url).await {
            Ok(remote) => Some(Arc::new(remote)),
            Err(e) => {
                tracing::warn!(
                    "Redis remote cache tier unavailable, continuing with local cache only: {}",
                    e
                );
                None
            }
        };
    }

    let dir = settings.remote_cache_dir.clone()?;
    match DirectoryRemote::connect(dir.clone()).await {
        Ok(remote) => {
            tracing::info!("Remote cache tier at {}", dir.display());
            Some(Arc::new(remote))
        }
        Err(e) => {
            tracing::warn!(
                "Remote cache tier at {} unavailable, continuing with local cache only: {}",
                dir.display(),
                e
            );
            None
        }
    }
}

// start sse server
pub async fn start_sse_server(addr: &str, settings: ServerSettings) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let service = build_service(&settings).await?;
    let ct = SseServer::serve(addr.parse()?)
        .await?
        .with_service(move || FrameworkDocs::new(service.clone()));
    tracing::info!("SSE server listening on {}", addr);

    tokio::signal::ctrl_c().await?;
    ct.cancel();
    Ok(())
}

// start stdio server
pub async fn start_stdio_server(settings: ServerSettings) -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting MCP server");

    let docs = build_service(&settings).await?;
    let service = FrameworkDocs::new(docs).serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_build_service_with_bundled_catalog() {
        let service = build_service(&ServerSettings::default()).await.unwrap();
        assert!(service.registry_stats().total_frameworks > 0);
        assert!(service.get_framework_info("react").is_ok());
        assert!(!service.cache_statistics().remote_tier);
    }

    #[tokio::test]
    async fn test_build_service_with_remote_dir() {
        let dir = tempdir().unwrap();
        let settings = ServerSettings {
            remote_cache_dir: Some(dir.path().join("remote")),
            ..ServerSettings::default()
        };
        let service = build_service(&settings).await.unwrap();
        assert!(service.cache_statistics().remote_tier);
    }

    #[tokio::test]
    async fn test_unusable_remote_dir_degrades_to_local() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let settings = ServerSettings {
            remote_cache_dir: Some(blocker),
            ..ServerSettings::default()
        };
        let service = build_service(&settings).await.unwrap();
        assert!(!service.cache_statistics().remote_tier);
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades_to_local() {
        let dir = tempdir().unwrap();
        let settings = ServerSettings {
            redis_url: Some("redis://127.0.0.1:1/".to_string()),
            remote_cache_dir: Some(dir.path().join("remote")),
            ..ServerSettings::default()
        };
        let service = build_service(&settings).await.unwrap();
        assert!(!service.cache_statistics().remote_tier);
        assert!(!dir.path().join("remote").exists());

        let settings = ServerSettings {
            redis_url: Some("not a redis url".to_string()),
            ..ServerSettings::default()
        };
        let service = build_service(&settings).await.unwrap();
        assert!(!service.cache_statistics().remote_tier);
    }

    #[tokio::test]
    async fn test_broken_catalog_is_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let settings = ServerSettings {
            catalog_dir: Some(dir.path().to_path_buf()),
            ..ServerSettings::default()
        };
        assert!(build_service(&settings).await.is_err());

        let empty = tempdir().unwrap();
        let settings = ServerSettings {
            catalog_dir: Some(empty.path().to_path_buf()),
            ..ServerSettings::default()
        };
        assert!(build_service(&settings).await.is_err());
    }
}
