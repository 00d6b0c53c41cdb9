use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use framework_docs_mcp::config::{CacheConfig, ProviderConfig};
use framework_docs_mcp::server::{self, ServerSettings};

#[derive(Parser, Debug)]
#[command(version, about = "Framework Documentation MCP Server")]
struct Cli {
    /// Type of server to run
    #[arg(short, long, value_enum, default_value_t = ServerType::Sse)]
    server_type: ServerType,

    /// Address for the SSE server
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    address: String,

    /// Directory of framework catalog JSON files (bundled catalog if unset)
    #[arg(long, env = "FRAMEWORK_CATALOG_DIR")]
    catalog_dir: Option<PathBuf>,

    /// Redis server used as the remote cache tier, e.g. redis://localhost:6379
    #[arg(long, env = "REDIS_URL", hide_env_values = true)]
    redis_url: Option<String>,

    /// Shared directory used as the remote cache tier when no Redis URL is set
    #[arg(long, env = "REMOTE_CACHE_DIR")]
    remote_cache_dir: Option<PathBuf>,

    /// Token for authenticated GitHub requests
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Hours before cached documentation goes stale
    #[arg(long, default_value_t = 24)]
    docs_ttl_hours: u64,

    /// Hours before cached examples go stale
    #[arg(long, default_value_t = 24)]
    examples_ttl_hours: u64,

    /// Maximum number of entries in the local cache tier
    #[arg(long, default_value_t = 512)]
    cache_capacity: usize,

    /// Timeout for a single upstream fetch
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ServerType {
    /// Start an SSE server
    Sse,
    /// Start a stdio server
    Stdio,
}

impl Cli {
    fn settings(&self) -> ServerSettings {
        let mut cache = CacheConfig::default()
            .with_ttl_hours(self.docs_ttl_hours, self.examples_ttl_hours);
        cache.local_capacity = self.cache_capacity;

        ServerSettings {
            catalog_dir: self.catalog_dir.clone(),
            redis_url: self.redis_url.clone(),
            remote_cache_dir: self.remote_cache_dir.clone(),
            cache,
            providers: ProviderConfig {
                github_token: self.github_token.clone(),
                request_timeout: Duration::from_secs(self.fetch_timeout_secs),
                ..ProviderConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings();

    match cli.server_type {
        ServerType::Sse => {
            println!("Starting SSE server on {}", cli.address);
            server::start_sse_server(&cli.address, settings).await?;
        },
        ServerType::Stdio => {
            server::start_stdio_server(settings).await?;
        },
    }

    Ok(())
}
