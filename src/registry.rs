//! Framework catalog.
//!
//! The registry is loaded once at startup (from a catalog directory or the
//! builtin catalog) and is read-only afterwards, except for a full reload
//! through [`FrameworkRegistry::initialize`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::lock::{rw_read, rw_write};

const BUILTIN_CATALOG: &str = include_str!("../catalog/frameworks.json");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Framework catalog is empty")]
    Empty,

    #[error("Duplicate framework name: {0}")]
    Duplicate(String),

    #[error("Invalid framework record: {0}")]
    Invalid(String),

    #[error("Malformed catalog file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to read catalog: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Web,
    Backend,
    Mobile,
    AiMl,
    Design,
    Tools,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Web,
        Category::Backend,
        Category::Mobile,
        Category::AiMl,
        Category::Design,
        Category::Tools,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Web => "web",
            Category::Backend => "backend",
            Category::Mobile => "mobile",
            Category::AiMl => "ai-ml",
            Category::Design => "design",
            Category::Tools => "tools",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Framework '{0}' not found in registry")]
pub struct FrameworkNotFound(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown category '{0}', expected one of: web, backend, mobile, ai-ml, design, tools")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    GithubRepo,
    Website,
}

/// Where and how a framework's documentation is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// `owner/repo` for GitHub sources, base URL for websites.
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub category: Category,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Example patterns commonly requested for this framework.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl FrameworkDescriptor {
    /// Registry key: the lowercased name.
    pub fn key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Invalid("framework name is empty".to_string()));
        }
        if self.source.location.trim().is_empty() {
            return Err(RegistryError::Invalid(format!(
                "framework '{}' has no source location",
                self.name
            )));
        }
        Ok(())
    }

    /// Relevance of `query` (already lowercased) for this descriptor; lower is better.
    fn match_rank(&self, query: &str) -> Option<u8> {
        let name = self.key();
        if name == query {
            return Some(0);
        }
        if name.starts_with(query) {
            return Some(1);
        }
        let display_hit = self
            .display_name
            .as_ref()
            .is_some_and(|display| display.to_lowercase().contains(query));
        if name.contains(query) || display_hit {
            return Some(2);
        }
        if self
            .keywords
            .iter()
            .any(|keyword| keyword.to_lowercase().contains(query))
        {
            return Some(3);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_frameworks: usize,
    pub by_category: BTreeMap<Category, usize>,
}

/// In-memory framework catalog keyed by lowercased name.
#[derive(Debug, Default)]
pub struct FrameworkRegistry {
    frameworks: RwLock<BTreeMap<String, FrameworkDescriptor>>,
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the catalog with `records`. On error the previous catalog is kept.
    pub fn initialize(&self, records: Vec<FrameworkDescriptor>) -> Result<usize, RegistryError> {
        if records.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut loaded = BTreeMap::new();
        for record in records {
            record.validate()?;
            let key = record.key();
            if loaded.contains_key(&key) {
                return Err(RegistryError::Duplicate(record.name));
            }
            loaded.insert(key, record);
        }

        let count = loaded.len();
        *rw_write(&self.frameworks, "registry.initialize") = loaded;
        tracing::info!(frameworks = count, "Framework registry loaded");
        Ok(count)
    }

    pub fn reload(&self, records: Vec<FrameworkDescriptor>) -> Result<usize, RegistryError> {
        self.initialize(records)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<FrameworkDescriptor> {
        rw_read(&self.frameworks, "registry.get")
            .get(&name.trim().to_lowercase())
            .cloned()
    }

    pub fn require(&self, name: &str) -> Result<FrameworkDescriptor, FrameworkNotFound> {
        self.get(name).ok_or_else(|| FrameworkNotFound(name.to_string()))
    }

    /// All descriptors in name order, optionally restricted to one category.
    pub fn list(&self, category: Option<Category>) -> Vec<FrameworkDescriptor> {
        rw_read(&self.frameworks, "registry.list")
            .values()
            .filter(|descriptor| category.is_none_or(|wanted| descriptor.category == wanted))
            .cloned()
            .collect()
    }

    /// Name and keyword substring search. Name hits rank above keyword hits,
    /// ties fall back to name order.
    pub fn search(&self, query: &str) -> Vec<FrameworkDescriptor> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        rw_read(&self.frameworks, "registry.search")
            .values()
            .filter_map(|descriptor| descriptor.match_rank(&query).map(|rank| (rank, descriptor)))
            .sorted_by_key(|(rank, _)| *rank)
            .map(|(_, descriptor)| descriptor.clone())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let frameworks = rw_read(&self.frameworks, "registry.stats");
        let by_category = frameworks
            .values()
            .map(|descriptor| descriptor.category)
            .sorted()
            .chunk_by(|category| *category)
            .into_iter()
            .map(|(category, group)| (category, group.count()))
            .collect();

        RegistryStats {
            total_frameworks: frameworks.len(),
            by_category,
        }
    }
}

/// Parses the catalog compiled into the binary.
pub fn builtin_catalog() -> Result<Vec<FrameworkDescriptor>, RegistryError> {
    serde_json::from_str(BUILTIN_CATALOG).map_err(|source| RegistryError::Malformed {
        path: PathBuf::from("<builtin>"),
        source,
    })
}

/// Reads one descriptor per `*.json` file under `dir`, descending into
/// subdirectories. Any unreadable or unparsable file fails the whole load.
pub async fn load_catalog_dir(dir: &Path) -> Result<Vec<FrameworkDescriptor>, RegistryError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();

    let mut records = Vec::with_capacity(files.len());
    for path in files {
        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str::<FrameworkDescriptor>(&content) {
            Ok(record) => {
                tracing::debug!("Loaded framework '{}' from {:?}", record.name, path);
                records.push(record);
            }
            Err(source) => return Err(RegistryError::Malformed { path, source }),
        }
    }

    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn descriptor(
        name: &str,
        category: Category,
        keywords: &[&str],
    ) -> FrameworkDescriptor {
        FrameworkDescriptor {
            name: name.to_string(),
            display_name: None,
            category,
            source: SourceDescriptor {
                source_type: SourceType::GithubRepo,
                location: format!("example/{name}"),
                branch: None,
                docs_path: None,
                examples_path: None,
            },
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            patterns: Vec::new(),
        }
    }

    fn sample_registry() -> FrameworkRegistry {
        let registry = FrameworkRegistry::new();
        registry
            .initialize(vec![
                descriptor("vue", Category::Web, &["sfc", "reactivity"]),
                descriptor("react", Category::Web, &["jsx", "hooks"]),
                descriptor("django", Category::Backend, &["python", "orm"]),
                descriptor("reactive-swift", Category::Mobile, &["frp"]),
                descriptor("preact", Category::Web, &["jsx"]),
            ])
            .unwrap();
        registry
    }

    #[test]
    fn test_initialize_rejects_empty_catalog() {
        let registry = FrameworkRegistry::new();
        assert!(matches!(registry.initialize(vec![]), Err(RegistryError::Empty)));
    }

    #[test]
    fn test_initialize_rejects_case_insensitive_duplicates() {
        let registry = FrameworkRegistry::new();
        let result = registry.initialize(vec![
            descriptor("React", Category::Web, &[]),
            descriptor("react", Category::Web, &[]),
        ]);
        assert!(matches!(result, Err(RegistryError::Duplicate(name)) if name == "react"));
    }

    #[test]
    fn test_failed_reload_keeps_previous_catalog() {
        let registry = sample_registry();
        let mut broken = descriptor("broken", Category::Tools, &[]);
        broken.source.location = "  ".to_string();

        assert!(matches!(registry.reload(vec![broken]), Err(RegistryError::Invalid(_))));
        assert_eq!(registry.list(None).len(), 5);
    }

    #[test]
    fn test_reload_replaces_catalog() {
        let registry = sample_registry();
        registry.reload(vec![descriptor("svelte", Category::Web, &[])]).unwrap();

        assert!(registry.get("react").is_none());
        assert!(registry.get("svelte").is_some());
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let registry = sample_registry();
        let upper = registry.get("REACT").unwrap();
        let lower = registry.get("react").unwrap();
        assert_eq!(upper, lower);
        assert!(registry.get("angular").is_none());
    }

    #[test]
    fn test_list_is_name_ordered_and_filterable() {
        let registry = sample_registry();
        let names: Vec<_> = registry.list(None).into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["django", "preact", "react", "reactive-swift", "vue"]);

        let web: Vec<_> = registry
            .list(Some(Category::Web))
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(web, ["preact", "react", "vue"]);
        assert_eq!(registry.list(None), registry.list(None));
    }

    #[test]
    fn test_search_matches_keywords() {
        let registry = sample_registry();
        let names: Vec<_> = registry.search("hoo").into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["react"]);
    }

    #[test]
    fn test_search_ranks_name_prefix_above_keyword() {
        let registry = sample_registry();
        let names: Vec<_> = registry.search("react").into_iter().map(|d| d.name).collect();
        // exact, prefix, substring, then keyword ("reactivity")
        assert_eq!(names, ["react", "reactive-swift", "preact", "vue"]);
        assert_eq!(registry.search("react"), registry.search("REACT"));
    }

    #[test]
    fn test_search_empty_query_matches_nothing() {
        assert!(sample_registry().search("   ").is_empty());
    }

    #[test]
    fn test_stats_counts_categories() {
        let stats = sample_registry().stats();
        assert_eq!(stats.total_frameworks, 5);
        assert_eq!(stats.by_category.get(&Category::Web), Some(&3));
        assert_eq!(stats.by_category.get(&Category::Backend), Some(&1));
        assert_eq!(stats.by_category.get(&Category::Design), None);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("AI-ML".parse::<Category>(), Ok(Category::AiMl));
        assert!("games".parse::<Category>().is_err());
        let json = serde_json::to_string(&Category::AiMl).unwrap();
        assert_eq!(json, "\"ai-ml\"");
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let registry = FrameworkRegistry::new();
        let count = registry.initialize(builtin_catalog().unwrap()).unwrap();
        assert!(count > 0);
        assert!(registry.get("react").is_some());
    }

    #[tokio::test]
    async fn test_load_catalog_dir_reads_nested_files() {
        let dir = tempdir().unwrap();
        let web = dir.path().join("web");
        fs::create_dir_all(&web).await.unwrap();
        let react = descriptor("react", Category::Web, &["hooks"]);
        fs::write(web.join("react.json"), serde_json::to_string(&react).unwrap())
            .await
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let records = load_catalog_dir(dir.path()).await.unwrap();
        assert_eq!(records, vec![react]);
    }

    #[tokio::test]
    async fn test_load_catalog_dir_fails_on_malformed_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{not json}").await.unwrap();

        let result = load_catalog_dir(dir.path()).await;
        assert!(matches!(result, Err(RegistryError::Malformed { .. })));
    }
}
