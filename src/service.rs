use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{CacheKey, TieredCache};
use crate::config::CacheConfig;
use crate::context::{
    self, CompatibilityReport, EXCERPTS_PER_FRAMEWORK, FrameworkContext, OVERVIEW_CHARS,
    TaskContext,
};
use crate::coordinator::{
    CacheStatistics, RefreshCoordinator, RefreshError, RefreshSummary, Resolution, StalenessReport,
};
use crate::providers::ContentProvider;
use crate::registry::{
    Category, FrameworkDescriptor, FrameworkNotFound, FrameworkRegistry, RegistryStats,
};
use crate::search::{Excerpt, search_cached};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    NotFound(#[from] FrameworkNotFound),

    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Entry point for tool handlers: the registry, the tiered cache and the
/// refresh coordinator behind one cheaply clonable handle.
#[derive(Clone)]
pub struct DocsService {
    registry: Arc<FrameworkRegistry>,
    coordinator: RefreshCoordinator,
}

impl DocsService {
    pub fn new(
        registry: Arc<FrameworkRegistry>,
        store: TieredCache,
        provider: Arc<dyn ContentProvider>,
        config: CacheConfig,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(store, provider, registry.clone(), config);
        Self { registry, coordinator }
    }

    pub fn list_frameworks(&self, category: Option<Category>) -> Vec<FrameworkDescriptor> {
        self.registry.list(category)
    }

    pub fn search_frameworks(&self, query: &str) -> Vec<FrameworkDescriptor> {
        self.registry.search(query)
    }

    pub fn get_framework_info(&self, name: &str) -> Result<FrameworkDescriptor, ServiceError> {
        Ok(self.registry.require(name)?)
    }

    pub async fn get_framework_docs(
        &self,
        name: &str,
        section: Option<&str>,
        use_cache: bool,
    ) -> Result<Resolution, ServiceError> {
        let descriptor = self.registry.require(name)?;
        let key = CacheKey::docs(&descriptor.name, section);
        Ok(self
            .coordinator
            .get_or_refresh(key, &descriptor.source, false, use_cache)
            .await?)
    }

    pub async fn get_framework_examples(
        &self,
        name: &str,
        pattern: Option<&str>,
    ) -> Result<Resolution, ServiceError> {
        let descriptor = self.registry.require(name)?;
        let key = CacheKey::examples(&descriptor.name, pattern);
        Ok(self
            .coordinator
            .get_or_refresh(key, &descriptor.source, false, true)
            .await?)
    }

    pub async fn search_documentation(
        &self,
        name: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Excerpt>, ServiceError> {
        let descriptor = self.registry.require(name)?;
        Ok(search_cached(
            self.coordinator.store(),
            &descriptor.key(),
            query,
            limit,
            self.coordinator.config().excerpt_radius,
        )
        .await)
    }

    /// Overview documentation and task-relevant cached excerpts for several
    /// frameworks at once. Names the registry does not know are listed
    /// rather than failing the whole request.
    pub async fn get_framework_context(&self, names: &[String], task: &str) -> TaskContext {
        let (descriptors, unknown_frameworks) = self.resolve_all(names);
        let keywords = context::task_keywords(task);
        let frameworks = join_all(
            descriptors
                .iter()
                .map(|descriptor| self.framework_context(descriptor, task, &keywords)),
        )
        .await;

        TaskContext {
            task_description: task.to_string(),
            keywords,
            frameworks,
            unknown_frameworks,
        }
    }

    async fn framework_context(
        &self,
        descriptor: &FrameworkDescriptor,
        task: &str,
        keywords: &[String],
    ) -> FrameworkContext {
        let mut framework = FrameworkContext::new(descriptor, task, keywords);
        let key = CacheKey::docs(&framework.framework, None);
        match self
            .coordinator
            .get_or_refresh(key, &descriptor.source, false, true)
            .await
        {
            Ok(resolution) => {
                let overview = context::overview(&resolution.entry.content, OVERVIEW_CHARS);
                framework.overview = Some(overview);
                framework.source = Some(resolution.source);
            }
            Err(e) => {
                tracing::warn!("No overview for {}: {}", framework.framework, e);
                framework.error = Some(e.to_string());
            }
        }

        let radius = self.coordinator.config().excerpt_radius;
        for keyword in keywords {
            let remaining = EXCERPTS_PER_FRAMEWORK - framework.relevant_excerpts.len();
            if remaining == 0 {
                break;
            }
            let store = self.coordinator.store();
            let name = &framework.framework;
            let found = search_cached(store, name, keyword, remaining, radius).await;
            for excerpt in found {
                let seen = framework
                    .relevant_excerpts
                    .iter()
                    .any(|e| e.key == excerpt.key && e.position == excerpt.position);
                if !seen {
                    framework.relevant_excerpts.push(excerpt);
                }
            }
        }
        framework
    }

    /// Checks `code` against the named frameworks using catalog metadata only.
    pub fn analyze_code_compatibility(&self, code: &str, names: &[String]) -> CompatibilityReport {
        let (declared, unknown) = self.resolve_all(names);
        context::analyze_compatibility(code, &declared, unknown, &self.registry.list(None))
    }

    /// Registered descriptors for `names` without duplicates, and the names
    /// the registry does not know.
    fn resolve_all(&self, names: &[String]) -> (Vec<FrameworkDescriptor>, Vec<String>) {
        let mut found: Vec<FrameworkDescriptor> = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.registry.get(name) {
                Some(descriptor) => {
                    if found.iter().all(|d| d.key() != descriptor.key()) {
                        found.push(descriptor);
                    }
                }
                None => unknown.push(name.trim().to_string()),
            }
        }
        (found, unknown)
    }

    pub async fn check_framework_updates(
        &self,
        name: &str,
    ) -> Result<StalenessReport, ServiceError> {
        Ok(self.coordinator.check_updates(name).await?)
    }

    pub async fn refresh_framework_cache(
        &self,
        name: Option<&str>,
        force: bool,
    ) -> Result<RefreshSummary, ServiceError> {
        Ok(self.coordinator.refresh_all(name, force).await?)
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.coordinator.statistics()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}
