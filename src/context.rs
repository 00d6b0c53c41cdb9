//! Cross-framework helpers: task context assembly and code compatibility
//! analysis.
//!
//! Everything here works on registry descriptors and already-resolved
//! content. Fetching goes through [`crate::service::DocsService`].

use itertools::Itertools;
use regex::RegexBuilder;
use serde::Serialize;

use crate::coordinator::ResolutionSource;
use crate::registry::{Category, FrameworkDescriptor};
use crate::search::Excerpt;

pub const MAX_TASK_KEYWORDS: usize = 8;
pub const OVERVIEW_CHARS: usize = 1500;
pub const EXCERPTS_PER_FRAMEWORK: usize = 5;

const STOPWORDS: &[&str] = &[
    "about", "add", "all", "also", "and", "any", "are", "build", "building", "but", "can",
    "could", "create", "does", "for", "from", "get", "has", "have", "how", "into", "its",
    "make", "need", "new", "not", "our", "should", "some", "than", "that", "the", "their",
    "them", "then", "this", "use", "using", "want", "was", "what", "when", "where", "which",
    "will", "with", "would", "you", "your",
];

/// Categories in which two unrelated frameworks usually compete for the same role.
const EXCLUSIVE_CATEGORIES: [Category; 3] = [Category::Web, Category::Backend, Category::Mobile];

#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub task_description: String,
    /// Search terms extracted from the task description.
    pub keywords: Vec<String>,
    pub frameworks: Vec<FrameworkContext>,
    pub unknown_frameworks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkContext {
    pub framework: String,
    pub display_name: String,
    pub category: Category,
    /// Leading part of the framework's overview documentation.
    pub overview: Option<String>,
    pub source: Option<ResolutionSource>,
    /// Why no overview could be produced.
    pub error: Option<String>,
    pub relevant_excerpts: Vec<Excerpt>,
    /// Catalog patterns the task mentions.
    pub suggested_patterns: Vec<String>,
    /// Catalog keywords the task mentions.
    pub matched_keywords: Vec<String>,
}

impl FrameworkContext {
    /// Context for `descriptor` before any documentation is attached.
    pub fn new(descriptor: &FrameworkDescriptor, task: &str, keywords: &[String]) -> Self {
        let task = task.to_lowercase();
        let suggested_patterns = descriptor
            .patterns
            .iter()
            .filter(|pattern| {
                let pattern = pattern.to_lowercase();
                task.contains(&pattern) || keywords.iter().any(|k| pattern.contains(k.as_str()))
            })
            .cloned()
            .collect();
        let matched_keywords = descriptor
            .keywords
            .iter()
            .filter(|keyword| mentions(&task, keyword))
            .cloned()
            .collect();

        Self {
            framework: descriptor.key(),
            display_name: display_name(descriptor),
            category: descriptor.category,
            overview: None,
            source: None,
            error: None,
            relevant_excerpts: Vec::new(),
            suggested_patterns,
            matched_keywords,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub frameworks: Vec<FrameworkCompatibility>,
    pub unknown_frameworks: Vec<String>,
    /// Registered frameworks the code names without declaring them.
    pub undeclared_frameworks: Vec<String>,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkCompatibility {
    pub framework: String,
    /// The code names the framework or one of its keywords.
    pub referenced: bool,
    pub matched_keywords: Vec<String>,
}

/// Distinct lowercased words of `task` worth searching for, in order of
/// first appearance.
pub fn task_keywords(task: &str) -> Vec<String> {
    task.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .map(|word| word.trim_matches(|c| c == '-' || c == '_').to_lowercase())
        .filter(|word| word.chars().count() >= 3)
        .filter(|word| !word.chars().all(|c| c.is_ascii_digit()))
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .unique()
        .take(MAX_TASK_KEYWORDS)
        .collect()
}

/// The first `max_chars` characters of `content`, cut at a line break when
/// one is close.
pub fn overview(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    let Some((cut, _)) = content.char_indices().nth(max_chars) else {
        return content.to_string();
    };
    let head = &content[..cut];
    let head = match head.rfind('\n') {
        Some(line_end) if line_end >= cut / 2 => &head[..line_end],
        _ => head,
    };
    format!("{}\n...", head.trim_end())
}

/// Checks `code` against the declared frameworks.
///
/// `declared` are the registered frameworks the caller named, `unknown` the
/// names the registry did not recognise, and `catalog` every registered
/// framework.
pub fn analyze_compatibility(
    code: &str,
    declared: &[FrameworkDescriptor],
    unknown: Vec<String>,
    catalog: &[FrameworkDescriptor],
) -> CompatibilityReport {
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();

    if code.trim().is_empty() {
        issues.push("No code to analyze".to_string());
    }
    for name in &unknown {
        issues.push(format!("Framework '{name}' not found in registry"));
        suggestions.push(format!(
            "Use search_frameworks to find the registered name for '{name}'"
        ));
    }

    let mut frameworks = Vec::new();
    for descriptor in declared {
        let matched_keywords: Vec<String> = descriptor
            .keywords
            .iter()
            .filter(|keyword| mentions(code, keyword))
            .cloned()
            .collect();
        let referenced = mentions(code, &descriptor.key()) || !matched_keywords.is_empty();
        if !referenced && !code.trim().is_empty() {
            issues.push(format!("No usage of {} found in the code", display_name(descriptor)));
            suggestions.push(format!(
                "Check the {} documentation with get_framework_docs for the expected APIs",
                display_name(descriptor)
            ));
        }
        frameworks.push(FrameworkCompatibility {
            framework: descriptor.key(),
            referenced,
            matched_keywords,
        });
    }

    let undeclared_frameworks: Vec<String> = catalog
        .iter()
        .filter(|candidate| declared.iter().all(|d| d.key() != candidate.key()))
        .filter(|candidate| mentions(code, &candidate.key()))
        .map(FrameworkDescriptor::key)
        .collect();
    for name in &undeclared_frameworks {
        issues.push(format!("The code references {name}, which is not a declared framework"));
        suggestions.push(format!("Declare {name} or remove the dependency on it"));
    }

    for (a, b) in declared.iter().tuple_combinations() {
        if a.category == b.category
            && EXCLUSIVE_CATEGORIES.contains(&a.category)
            && !related(a, b)
        {
            issues.push(format!(
                "{} and {} are both {} frameworks and rarely share a code base",
                display_name(a),
                display_name(b),
                a.category.as_str()
            ));
            suggestions.push(format!(
                "Pick one of {} and {} for the {} layer",
                display_name(a),
                display_name(b),
                a.category.as_str()
            ));
        }
    }

    CompatibilityReport {
        compatible: issues.is_empty(),
        frameworks,
        unknown_frameworks: unknown,
        undeclared_frameworks,
        issues,
        suggestions,
    }
}

fn display_name(descriptor: &FrameworkDescriptor) -> String {
    descriptor
        .display_name
        .clone()
        .unwrap_or_else(|| descriptor.name.clone())
}

/// One framework builds on the other when it lists the other as a keyword.
fn related(a: &FrameworkDescriptor, b: &FrameworkDescriptor) -> bool {
    let lists = |x: &FrameworkDescriptor, y: &FrameworkDescriptor| {
        x.keywords.iter().any(|keyword| keyword.eq_ignore_ascii_case(&y.key()))
    };
    lists(a, b) || lists(b, a)
}

/// Whole-word, case-insensitive occurrence of `word` in `text`.
fn mentions(text: &str, word: &str) -> bool {
    let word = word.trim();
    if word.is_empty() {
        return false;
    }
    match RegexBuilder::new(&format!(r"\b{}\b", regex::escape(word)))
        .case_insensitive(true)
        .build()
    {
        Ok(pattern) => pattern.is_match(text),
        Err(e) => {
            tracing::warn!("Cannot match {:?}: {}", word, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::descriptor;

    fn catalog() -> Vec<FrameworkDescriptor> {
        let mut react = descriptor("react", Category::Web, &["jsx", "hooks"]);
        react.display_name = Some("React".to_string());
        react.patterns = vec!["components".to_string(), "state-management".to_string()];
        vec![
            react,
            descriptor("vue", Category::Web, &["sfc"]),
            descriptor("nextjs", Category::Web, &["react", "ssr"]),
            descriptor("tailwindcss", Category::Design, &["css"]),
            descriptor("fastapi", Category::Backend, &["python"]),
        ]
    }

    fn pick(names: &[&str]) -> Vec<FrameworkDescriptor> {
        catalog()
            .into_iter()
            .filter(|d| names.contains(&d.name.as_str()))
            .collect()
    }

    #[test]
    fn test_task_keywords_drop_noise() {
        let task = "Build a login form with React hooks, and use the hooks for 2 fields";
        let keywords = task_keywords(task);
        assert_eq!(keywords, ["login", "form", "react", "hooks", "fields"]);
    }

    #[test]
    fn test_task_keywords_are_capped() {
        let task = "alpha bravo charlie delta echo foxtrot golf hotel india juliett";
        assert_eq!(task_keywords(task).len(), MAX_TASK_KEYWORDS);
        assert!(task_keywords("  ").is_empty());
    }

    #[test]
    fn test_overview_truncates_on_char_boundary() {
        assert_eq!(overview("  short  ", 10), "short");

        let content = "é".repeat(20);
        let cut = overview(&content, 5);
        assert_eq!(cut, format!("{}\n...", "é".repeat(5)));

        let lines = "first line\nsecond line\nthird";
        assert_eq!(overview(lines, 15), "first line\n...");
    }

    #[test]
    fn test_framework_context_picks_patterns_and_keywords() {
        let react = &pick(&["react"])[0];
        let task = "Share state between components using hooks";
        let context = FrameworkContext::new(react, task, &task_keywords(task));

        assert_eq!(context.display_name, "React");
        assert_eq!(context.suggested_patterns, ["components", "state-management"]);
        assert_eq!(context.matched_keywords, ["hooks"]);
        assert!(context.overview.is_none());
    }

    #[test]
    fn test_matching_code_is_compatible() {
        let code = "import React from 'react';\nexport const App = () => <div />;";
        let declared = pick(&["react", "nextjs"]);
        let report = analyze_compatibility(code, &declared, Vec::new(), &catalog());

        assert!(report.compatible, "{:?}", report.issues);
        assert!(report.frameworks.iter().all(|f| f.referenced));
        assert!(report.undeclared_frameworks.is_empty());
    }

    #[test]
    fn test_undeclared_and_unused_frameworks_are_flagged() {
        let code = "from fastapi import FastAPI\napp = FastAPI()";
        let report = analyze_compatibility(code, &pick(&["react"]), Vec::new(), &catalog());

        assert!(!report.compatible);
        assert_eq!(report.undeclared_frameworks, ["fastapi"]);
        assert!(!report.frameworks[0].referenced);
        assert!(report.issues.iter().any(|i| i.contains("No usage of React")));
        assert_eq!(report.suggestions.len(), report.issues.len());
    }

    #[test]
    fn test_competing_frameworks_are_flagged() {
        let code = "// react and vue widgets side by side";
        let report = analyze_compatibility(code, &pick(&["react", "vue"]), Vec::new(), &catalog());
        assert!(report.issues.iter().any(|i| i.contains("React and vue are both web")));

        let report = analyze_compatibility(
            "react with tailwindcss classes",
            &pick(&["react", "tailwindcss"]),
            Vec::new(),
            &catalog(),
        );
        assert!(report.compatible, "{:?}", report.issues);
    }

    #[test]
    fn test_unknown_frameworks_and_empty_code_are_reported() {
        let report = analyze_compatibility("   ", &[], vec!["angular".to_string()], &catalog());
        assert!(!report.compatible);
        assert_eq!(report.unknown_frameworks, ["angular"]);
        assert!(report.issues.contains(&"No code to analyze".to_string()));
        assert!(report.issues.iter().any(|i| i.contains("'angular' not found")));
    }

    #[test]
    fn test_mentions_respects_word_boundaries() {
        assert!(mentions("use Vue here", "vue"));
        assert!(!mentions("revue", "vue"));
        assert!(mentions("tailwind.config uses css", "css"));
        assert!(!mentions("anything", " "));
    }
}
