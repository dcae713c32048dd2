//! Core data models used throughout Repo Tutor.
//!
//! These types describe the repository snapshot that enters the pipeline,
//! the validated analysis results that flow between stages, and the
//! records persisted across runs (repository cache and prompt cache).
//!
//! Cross references inside a run are always **indices**: an
//! [`Abstraction`] points at files by their position in the ordered
//! [`SourceFile`] list, a [`Relationship`] points at abstractions by their
//! position in the abstraction list. Once persisted, abstractions switch
//! to file *paths* ([`CachedAbstraction`]) so they survive files being
//! added or removed between runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file of the repository snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A named subsystem or concept identified in the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstraction {
    pub name: String,
    pub description: String,
    /// Unique, sorted indices into the run's file list.
    pub file_indices: Vec<usize>,
}

/// Directed, labelled edge between two abstractions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: usize,
    pub to: usize,
    pub label: String,
}

/// Output of the relationship analysis: a project summary plus the edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSet {
    pub summary: String,
    pub details: Vec<Relationship>,
}

/// How the documentation should read, and how source is reduced for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentationMode {
    /// Beginner-oriented walkthrough; source is truncated (head + tail).
    #[default]
    Tutorial,
    /// Structure-oriented reference; source is reduced to signatures.
    Architecture,
}

impl fmt::Display for DocumentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentationMode::Tutorial => write!(f, "tutorial"),
            DocumentationMode::Architecture => write!(f, "architecture"),
        }
    }
}

impl FromStr for DocumentationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tutorial" => Ok(DocumentationMode::Tutorial),
            "architecture" => Ok(DocumentationMode::Architecture),
            other => Err(format!(
                "unknown documentation mode '{}': expected tutorial or architecture",
                other
            )),
        }
    }
}

/// The six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Fetch,
    IdentifyAbstractions,
    AnalyzeRelationships,
    OrderChapters,
    WriteChapters,
    CombineTutorial,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Fetch,
        StageName::IdentifyAbstractions,
        StageName::AnalyzeRelationships,
        StageName::OrderChapters,
        StageName::WriteChapters,
        StageName::CombineTutorial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Fetch => "fetch",
            StageName::IdentifyAbstractions => "identify_abstractions",
            StageName::AnalyzeRelationships => "analyze_relationships",
            StageName::OrderChapters => "order_chapters",
            StageName::WriteChapters => "write_chapters",
            StageName::CombineTutorial => "combine_tutorial",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated document section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub slug: String,
    pub title: String,
    pub content: String,
    /// Names of the abstractions this chapter explains.
    pub abstractions_covered: Vec<String>,
    /// Slugs of the earlier chapters this chapter's context was built from.
    pub dependencies: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub prompt_hash: String,
}

/// Manifest entry for one file seen in a previous run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub path: String,
    pub content_hash: String,
    /// When the content hash last changed.
    pub last_modified: DateTime<Utc>,
}

/// Persisted form of an [`Abstraction`], keyed by file paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAbstraction {
    pub name: String,
    pub description: String,
    pub files: Vec<String>,
}

impl CachedAbstraction {
    /// Convert a run-local abstraction into its path-keyed form.
    pub fn from_abstraction(abstraction: &Abstraction, files: &[SourceFile]) -> Self {
        Self {
            name: abstraction.name.clone(),
            description: abstraction.description.clone(),
            files: abstraction
                .file_indices
                .iter()
                .filter_map(|&i| files.get(i).map(|f| f.path.clone()))
                .collect(),
        }
    }

    /// Resolve paths back to indices in `files`. Paths no longer present
    /// are dropped; the result is sorted and unique.
    pub fn to_abstraction(&self, files: &[SourceFile]) -> Abstraction {
        let mut file_indices: Vec<usize> = self
            .files
            .iter()
            .filter_map(|p| files.iter().position(|f| &f.path == p))
            .collect();
        file_indices.sort_unstable();
        file_indices.dedup();
        Abstraction {
            name: self.name.clone(),
            description: self.description.clone(),
            file_indices,
        }
    }
}

/// Bookkeeping about the run that produced a [`RepositoryCache`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub run_id: String,
    pub project_name: String,
    pub language: String,
    pub documentation_mode: DocumentationMode,
    pub provider: String,
    pub model: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub file_count: usize,
    pub chapter_count: usize,
    pub plan_mode: Option<RegenerationMode>,
    pub llm_calls: u64,
    pub cache_hits: u64,
}

/// Durable per-repository record read at the start of a run and written
/// after a successful `CombineTutorial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryCache {
    pub repo_id: String,
    pub repo_url: String,
    pub last_crawl_time: DateTime<Utc>,
    pub files: Vec<CachedFile>,
    #[serde(default)]
    pub abstractions: Option<Vec<CachedAbstraction>>,
    #[serde(default)]
    pub relationships: Option<RelationshipSet>,
    #[serde(default)]
    pub chapter_order: Option<Vec<usize>>,
    #[serde(default)]
    pub chapters: BTreeMap<String, Chapter>,
    #[serde(default)]
    pub metadata: GenerationMetadata,
}

impl RepositoryCache {
    /// Empty record for a repository seen for the first time.
    pub fn new(repo_url: &str) -> Self {
        Self {
            repo_id: crate::hash::normalize_repo_id(repo_url),
            repo_url: repo_url.to_string(),
            last_crawl_time: Utc::now(),
            files: Vec::new(),
            abstractions: None,
            relationships: None,
            chapter_order: None,
            chapters: BTreeMap::new(),
            metadata: GenerationMetadata::default(),
        }
    }

    /// Stored chapter slugs in chapter order (by their numeric prefix).
    pub fn ordered_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<&String> = self.chapters.keys().collect();
        slugs.sort_by_key(|s| (crate::chapter::chapter_number(s), s.to_string()));
        slugs.into_iter().cloned().collect()
    }

    /// True when abstractions, relationships, order and one chapter per
    /// order position are all present.
    pub fn is_complete(&self) -> bool {
        let (Some(abstractions), Some(_), Some(order)) =
            (&self.abstractions, &self.relationships, &self.chapter_order)
        else {
            return false;
        };
        !order.is_empty()
            && order.len() == abstractions.len()
            && self.chapters.len() == order.len()
    }
}

/// Token counts reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One stored prompt/response pair. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptCacheEntry {
    pub prompt_hash: String,
    pub normalized_prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub token_usage: Option<TokenUsage>,
    pub cost: Option<f64>,
}

/// How much of the pipeline must run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationMode {
    Skip,
    Partial,
    PartialReidentify,
    Full,
}

impl RegenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegenerationMode::Skip => "skip",
            RegenerationMode::Partial => "partial",
            RegenerationMode::PartialReidentify => "partial_reidentify",
            RegenerationMode::Full => "full",
        }
    }

    /// Whether IdentifyAbstractions, AnalyzeRelationships and OrderChapters
    /// reuse cached results instead of running.
    pub fn reuses_analysis(&self) -> bool {
        matches!(self, RegenerationMode::Skip | RegenerationMode::Partial)
    }
}

impl fmt::Display for RegenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of diffing the current snapshot against the cached manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeAnalysis {
    pub added_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub deleted_files: Vec<String>,
    /// Indices into the cached abstraction list.
    pub affected_abstractions: Vec<usize>,
    pub chapters_to_regenerate: Vec<String>,
    pub chapters_to_keep: Vec<String>,
    /// Current files plus deleted files.
    pub total_files: usize,
    pub change_percentage: f64,
}

impl ChangeAnalysis {
    pub fn changed_count(&self) -> usize {
        self.added_files.len() + self.modified_files.len() + self.deleted_files.len()
    }

    /// Every changed path: added, modified and deleted.
    pub fn changed_paths(&self) -> impl Iterator<Item = &String> {
        self.added_files
            .iter()
            .chain(self.modified_files.iter())
            .chain(self.deleted_files.iter())
    }
}

/// Decision of how much work the current run performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationPlan {
    pub mode: RegenerationMode,
    pub reason: String,
    pub chapters_to_regenerate: Vec<String>,
    pub rerun_abstraction_identification: bool,
    /// Percentage of chapters that do not need regeneration.
    pub estimated_savings: f64,
}

impl RegenerationPlan {
    /// Plan that regenerates everything. Slugs are unknown until the
    /// chapter order exists, so the list may be empty.
    pub fn full(reason: impl Into<String>, chapters: Vec<String>) -> Self {
        Self {
            mode: RegenerationMode::Full,
            reason: reason.into(),
            chapters_to_regenerate: chapters,
            rerun_abstraction_identification: true,
            estimated_savings: 0.0,
        }
    }

    /// Whether the chapter with `slug` must be written fresh.
    pub fn regenerates(&self, slug: &str) -> bool {
        match self.mode {
            RegenerationMode::Full => true,
            RegenerationMode::Skip => false,
            RegenerationMode::Partial | RegenerationMode::PartialReidentify => {
                self.chapters_to_regenerate.iter().any(|s| s == slug)
            }
        }
    }
}
