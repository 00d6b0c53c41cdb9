//! MCP tool surface for the framework documentation service.
//!
//! [`FrameworkDocs`] exposes every [`DocsService`] operation as an MCP tool.
//! Results are rendered as pretty-printed JSON text; failures come back as
//! tool errors carrying a readable message.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use framework_docs_mcp::cache::TieredCache;
//! use framework_docs_mcp::config::{CacheConfig, ProviderConfig};
//! use framework_docs_mcp::mcp::FrameworkDocs;
//! use framework_docs_mcp::providers::ProviderRouter;
//! use framework_docs_mcp::registry::{FrameworkRegistry, builtin_catalog};
//! use framework_docs_mcp::service::DocsService;
//!
//! fn example() -> anyhow::Result<()> {
//!     let registry = Arc::new(FrameworkRegistry::new());
//!     registry.initialize(builtin_catalog()?)?;
//!     let config = CacheConfig::default();
//!     let provider = Arc::new(ProviderRouter::from_config(&ProviderConfig::default())?);
//!     let store = TieredCache::local_only(&config);
//!     let service = DocsService::new(registry, store, provider, config);
//!     let _tools = FrameworkDocs::new(service);
//!     Ok(())
//! }
//! ```

use rmcp::model::{Content, Implementation, IntoContents, ProtocolVersion, ServerCapabilities};
use rmcp::{ServerHandler, model::ServerInfo, schemars, tool};
use serde::Serialize;
use thiserror::Error;

use crate::registry::{Category, UnknownCategory};
use crate::service::{DocsService, ServiceError};

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Tool output: a JSON document rendered as text.
#[derive(Debug, Clone)]
pub struct JsonContent(pub String);

impl IntoContents for JsonContent {
    fn into_contents(self) -> Vec<Content> {
        vec![Content::text(self.0)]
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Category(#[from] UnknownCategory),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoContents for ToolError {
    fn into_contents(self) -> Vec<Content> {
        vec![Content::text(self.to_string())]
    }
}

fn render<T: Serialize>(value: &T) -> Result<JsonContent, ToolError> {
    Ok(JsonContent(serde_json::to_string_pretty(value)?))
}

#[derive(Clone)]
pub struct FrameworkDocs {
    service: DocsService,
}

#[tool(tool_box)]
impl FrameworkDocs {
    pub fn new(service: DocsService) -> Self {
        Self { service }
    }

    #[tool(description = "List all available frameworks, optionally filtered by category")]
    async fn list_available_frameworks(
        &self,
        #[tool(param)]
        #[schemars(description = "Category (web, backend, mobile, ai-ml, design, tools)")]
        category: Option<String>,
    ) -> Result<JsonContent, ToolError> {
        let category = category
            .as_deref()
            .map(str::parse::<Category>)
            .transpose()?;
        render(&self.service.list_frameworks(category))
    }

    #[tool(description = "Search for frameworks by name or keyword")]
    async fn search_frameworks(
        &self,
        #[tool(param)]
        #[schemars(description = "Search term to match against framework names and keywords")]
        query: String,
    ) -> Result<JsonContent, ToolError> {
        render(&self.service.search_frameworks(&query))
    }

    #[tool(description = "Get detailed information about a specific framework")]
    async fn get_framework_info(
        &self,
        #[tool(param)]
        #[schemars(description = "Framework name")]
        framework: String,
    ) -> Result<JsonContent, ToolError> {
        render(&self.service.get_framework_info(&framework)?)
    }

    #[tool(description = "Retrieve documentation for a framework, served from cache when fresh")]
    async fn get_framework_docs(
        &self,
        #[tool(param)]
        #[schemars(description = "Framework name (e.g., 'react', 'tailwindcss', 'laravel')")]
        framework: String,

        #[tool(param)]
        #[schemars(description = "Documentation section. Defaults to the framework overview")]
        section: Option<String>,

        #[tool(param)]
        #[schemars(description = "Whether to use cached content (default: true)")]
        use_cache: Option<bool>,
    ) -> Result<JsonContent, ToolError> {
        let resolution = self
            .service
            .get_framework_docs(&framework, section.as_deref(), use_cache.unwrap_or(true))
            .await?;
        render(&resolution)
    }

    #[tool(description = "Get code examples for specific patterns within a framework")]
    async fn get_framework_examples(
        &self,
        #[tool(param)]
        #[schemars(description = "Framework name")]
        framework: String,

        #[tool(param)]
        #[schemars(description = "Pattern (e.g., 'components', 'routing', 'authentication')")]
        pattern: Option<String>,
    ) -> Result<JsonContent, ToolError> {
        let resolution = self
            .service
            .get_framework_examples(&framework, pattern.as_deref())
            .await?;
        render(&resolution)
    }

    #[tool(description = "Search within a framework's cached documentation")]
    async fn search_documentation(
        &self,
        #[tool(param)]
        #[schemars(description = "Framework name to search within")]
        framework: String,

        #[tool(param)]
        #[schemars(description = "Search query")]
        query: String,

        #[tool(param)]
        #[schemars(description = "Maximum number of results (default: 10)")]
        limit: Option<usize>,
    ) -> Result<JsonContent, ToolError> {
        let excerpts = self
            .service
            .search_documentation(&framework, &query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
            .await?;
        render(&excerpts)
    }

    #[tool(description = "Get relevant context for multiple frameworks based on the development task")]
    async fn get_framework_context(
        &self,
        #[tool(param)]
        #[schemars(description = "List of framework names being used")]
        frameworks: Vec<String>,

        #[tool(param)]
        #[schemars(description = "Description of what you're trying to build")]
        task_description: String,
    ) -> Result<JsonContent, ToolError> {
        let context = self
            .service
            .get_framework_context(&frameworks, &task_description)
            .await;
        render(&context)
    }

    #[tool(description = "Analyze code for framework compatibility and suggest improvements")]
    async fn analyze_code_compatibility(
        &self,
        #[tool(param)]
        #[schemars(description = "Code snippet to analyze")]
        code: String,

        #[tool(param)]
        #[schemars(description = "List of frameworks the code should work with")]
        frameworks: Vec<String>,
    ) -> Result<JsonContent, ToolError> {
        render(&self.service.analyze_code_compatibility(&code, &frameworks))
    }

    #[tool(description = "Check whether a framework's cached documentation is stale")]
    async fn check_framework_updates(
        &self,
        #[tool(param)]
        #[schemars(description = "Framework name to check")]
        framework: String,
    ) -> Result<JsonContent, ToolError> {
        render(&self.service.check_framework_updates(&framework).await?)
    }

    #[tool(description = "Refresh cached documentation for one framework or all of them")]
    async fn refresh_framework_cache(
        &self,
        #[tool(param)]
        #[schemars(description = "Framework to refresh. Defaults to every framework")]
        framework: Option<String>,

        #[tool(param)]
        #[schemars(description = "Force refresh even if cache is still valid (default: false)")]
        force: Option<bool>,
    ) -> Result<JsonContent, ToolError> {
        let summary = self
            .service
            .refresh_framework_cache(framework.as_deref(), force.unwrap_or(false))
            .await?;
        render(&summary)
    }

    #[tool(description = "Get cache statistics and performance metrics")]
    async fn get_cache_stats(&self) -> Result<JsonContent, ToolError> {
        render(&self.service.cache_statistics())
    }

    #[tool(description = "Get statistics about the framework registry")]
    async fn get_registry_stats(&self) -> Result<JsonContent, ToolError> {
        render(&self.service.registry_stats())
    }
}

#[tool(tool_box)]
impl ServerHandler for FrameworkDocs {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This server provides documentation and code examples for popular frameworks. \
                Use 'list_available_frameworks' or 'search_frameworks' to discover frameworks, \
                'get_framework_docs' and 'get_framework_examples' to read them, and \
                'search_documentation' to search what has been cached. \
                'get_framework_context' gathers documentation for a task across several \
                frameworks and 'analyze_code_compatibility' checks code against them. \
                Documentation is cached and refreshed when it goes stale.".to_string()
            ),
        }
    }
}
