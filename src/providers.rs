use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::cache::{CacheKey, EntryKind, OriginMetadata};
use crate::config::ProviderConfig;
use crate::registry::{SourceDescriptor, SourceType};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Documentation not found at {0}")]
    NotFound(String),

    #[error("Upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("No documentation content found at {0}")]
    Empty(String),

    #[error("Fetch ended before producing a result")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub content: String,
    pub origin: OriginMetadata,
}

impl FetchedContent {
    fn new(content: String, source_url: String) -> Self {
        let content_length = content.len();
        Self {
            content,
            origin: OriginMetadata {
                source_url,
                content_length,
            },
        }
    }
}

/// Fetches raw documentation for one cache key from a framework's source.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        key: &CacheKey,
    ) -> Result<FetchedContent, FetchError>;
}

fn http_client(config: &ProviderConfig) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .build()?)
}

async fn get_text(request: reqwest::RequestBuilder, url: &str) -> Result<String, FetchError> {
    let response = request.send().await?;
    match response.status() {
        StatusCode::NOT_FOUND => Err(FetchError::NotFound(url.to_string())),
        status if !status.is_success() => Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        }),
        _ => Ok(response.text().await?),
    }
}

fn is_markdown(path: &str) -> bool {
    path.ends_with(".md") || path.ends_with(".mdx")
}

/// Reads markdown straight out of a repository through the raw-content host.
pub struct GitHubProvider {
    client: Client,
    raw_base: String,
    token: Option<String>,
}

impl GitHubProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(config)?,
            raw_base: config.github_raw_base.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
        })
    }

    fn file_path(source: &SourceDescriptor, key: &CacheKey) -> String {
        let base = match key.kind {
            EntryKind::Docs => source.docs_path.as_deref().unwrap_or(""),
            EntryKind::Examples => source.examples_path.as_deref().unwrap_or("examples"),
        }
        .trim_matches('/');

        let file = match key.selector.as_deref() {
            Some(selector) if is_markdown(selector) => selector.trim_matches('/').to_string(),
            Some(selector) => format!("{}.md", selector.trim_matches('/')),
            None if is_markdown(base) => return base.to_string(),
            None => "README.md".to_string(),
        };

        if base.is_empty() {
            file
        } else {
            format!("{base}/{file}")
        }
    }

    fn file_url(&self, source: &SourceDescriptor, key: &CacheKey) -> String {
        format!(
            "{}/{}/{}/{}",
            self.raw_base,
            source.location.trim_matches('/'),
            source.branch.as_deref().unwrap_or("main"),
            Self::file_path(source, key)
        )
    }
}

#[async_trait]
impl ContentProvider for GitHubProvider {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        key: &CacheKey,
    ) -> Result<FetchedContent, FetchError> {
        let url = self.file_url(source, key);
        tracing::info!("Fetching {} from GitHub: {}", key, url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let content = get_text(request, &url).await?;
        if content.trim().is_empty() {
            return Err(FetchError::Empty(url));
        }
        Ok(FetchedContent::new(content, url))
    }
}

/// Scrapes documentation pages: readable text for docs, `<pre>` blocks for
/// examples.
pub struct WebsiteProvider {
    client: Client,
}

impl WebsiteProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(config)?,
        })
    }

    fn page_url(source: &SourceDescriptor, key: &CacheKey) -> Result<Url, FetchError> {
        let base = source.location.trim_end_matches('/');
        match key.selector.as_deref() {
            Some(selector) => {
                Ok(Url::parse(&format!("{base}/"))?.join(selector.trim_start_matches('/'))?)
            }
            None => Ok(Url::parse(base)?),
        }
    }

    fn extract_text(html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        ["main", "article", "body"].into_iter().find_map(|candidate| {
            let selector = Selector::parse(candidate).ok()?;
            let element = document.select(&selector).next()?;
            let text = element
                .text()
                .map(str::trim)
                .filter(|fragment| !fragment.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            (!text.is_empty()).then_some(text)
        })
    }

    fn extract_code_blocks(html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("pre").ok()?;
        let blocks: Vec<String> = document
            .select(&selector)
            .map(|block| block.text().collect::<String>().trim().to_string())
            .filter(|block| !block.is_empty())
            .collect();
        (!blocks.is_empty()).then(|| blocks.join("\n\n"))
    }
}

#[async_trait]
impl ContentProvider for WebsiteProvider {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        key: &CacheKey,
    ) -> Result<FetchedContent, FetchError> {
        let url = Self::page_url(source, key)?.to_string();
        tracing::info!("Fetching {} from website: {}", key, url);

        let request = self.client.get(&url).header("Accept", "text/html");
        let html = get_text(request, &url).await?;
        let content = match key.kind {
            EntryKind::Docs => Self::extract_text(&html),
            EntryKind::Examples => Self::extract_code_blocks(&html),
        };
        match content {
            Some(content) => Ok(FetchedContent::new(content, url)),
            None => Err(FetchError::Empty(url)),
        }
    }
}

/// Dispatches to the provider matching the framework's source type.
pub struct ProviderRouter {
    github: Arc<dyn ContentProvider>,
    website: Arc<dyn ContentProvider>,
}

impl ProviderRouter {
    pub fn new(github: Arc<dyn ContentProvider>, website: Arc<dyn ContentProvider>) -> Self {
        Self { github, website }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, FetchError> {
        Ok(Self::new(
            Arc::new(GitHubProvider::new(config)?),
            Arc::new(WebsiteProvider::new(config)?),
        ))
    }
}

#[async_trait]
impl ContentProvider for ProviderRouter {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        key: &CacheKey,
    ) -> Result<FetchedContent, FetchError> {
        match source.source_type {
            SourceType::GithubRepo => self.github.fetch(source, key).await,
            SourceType::Website => self.website.fetch(source, key).await,
        }
    }
}
