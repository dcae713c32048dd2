//! Generation request and the shared context threaded through every stage.

use std::sync::Arc;

use repo_tutor_core::chapter::ChapterSlot;
use repo_tutor_core::models::{
    Abstraction, ChangeAnalysis, Chapter, DocumentationMode, RegenerationPlan, RelationshipSet,
    RepositoryCache, SourceFile,
};
use repo_tutor_core::plan::RegenerationPreference;
use repo_tutor_core::prompt_cache::CacheLookup;
use repo_tutor_core::render::Tutorial;

/// Everything one pipeline run is asked to do.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub repo_url: String,
    pub files: Vec<SourceFile>,
    pub project_name: String,
    pub language: String,
    pub documentation_mode: DocumentationMode,
    pub max_abstractions: usize,
    pub max_lines_per_file: usize,
    pub regeneration: RegenerationPreference,
    /// Consult (and feed) the prompt cache and the repository cache.
    pub use_cache: bool,
}

impl GenerationRequest {
    pub fn new(repo_url: impl Into<String>, files: Vec<SourceFile>) -> Self {
        let repo_url = repo_url.into();
        Self {
            project_name: project_name_from_url(&repo_url),
            repo_url,
            files,
            language: "english".to_string(),
            documentation_mode: DocumentationMode::Tutorial,
            max_abstractions: 10,
            max_lines_per_file: 400,
            regeneration: RegenerationPreference::Auto,
            use_cache: true,
        }
    }
}

/// Last path segment of a repository URL or path, without `.git`.
pub fn project_name_from_url(repo_url: &str) -> String {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");
    if last.is_empty() {
        "project".to_string()
    } else {
        last.to_string()
    }
}

/// Mutable state shared by the stages of one run.
///
/// Stages read their inputs here in `prep` and write validated results
/// back in `commit`; nothing is persisted until `CombineTutorial`.
#[derive(Debug)]
pub struct PipelineContext {
    pub request: GenerationRequest,
    pub files: Arc<Vec<SourceFile>>,
    pub abstractions: Option<Vec<Abstraction>>,
    pub relationships: Option<RelationshipSet>,
    pub chapter_order: Option<Vec<usize>>,
    pub slots: Option<Vec<ChapterSlot>>,
    pub chapters: Option<Vec<Chapter>>,
    pub plan: RegenerationPlan,
    pub analysis: Option<ChangeAnalysis>,
    /// Record loaded from the repository cache at the start of the run.
    pub previous: Option<Arc<RepositoryCache>>,
    pub tutorial: Option<Tutorial>,
    pub record: Option<RepositoryCache>,
    pub cache_saved: bool,
}

impl PipelineContext {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            files: Arc::new(Vec::new()),
            abstractions: None,
            relationships: None,
            chapter_order: None,
            slots: None,
            chapters: None,
            plan: RegenerationPlan::full("no plan computed yet", Vec::new()),
            analysis: None,
            previous: None,
            tutorial: None,
            record: None,
            cache_saved: false,
        }
    }

    /// Exact matches only once a previous generation exists: every model
    /// call in such a run rewrites content whose inputs changed.
    pub fn cache_lookup(&self) -> CacheLookup {
        if self.previous.is_some() {
            CacheLookup::ExactOnly
        } else {
            CacheLookup::ExactOrFuzzy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_names() {
        assert_eq!(project_name_from_url("https://github.com/acme/widget.git"), "widget");
        assert_eq!(project_name_from_url("/home/me/src/tool/"), "tool");
        assert_eq!(project_name_from_url(""), "project");
    }

    #[test]
    fn fuzzy_lookups_only_without_a_previous_generation() {
        let mut ctx = PipelineContext::new(GenerationRequest::new("https://github.com/acme/widget", Vec::new()));
        assert_eq!(ctx.cache_lookup(), CacheLookup::ExactOrFuzzy);
        ctx.previous = Some(Arc::new(RepositoryCache::new("https://github.com/acme/widget")));
        assert_eq!(ctx.cache_lookup(), CacheLookup::ExactOnly);
    }
}
