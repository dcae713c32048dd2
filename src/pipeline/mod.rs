//! The six-stage generation pipeline.
//!
//! ```text
//! Fetch → IdentifyAbstractions → AnalyzeRelationships → OrderChapters
//!       → WriteChapters → CombineTutorial
//! ```
//!
//! After `Fetch` the previous record is loaded from the repository cache
//! and diffed against the snapshot. The resulting [`RegenerationPlan`]
//! decides whether the three analysis stages run or their cached results
//! are restored, and which chapters are rewritten. Any stage error aborts
//! the run with nothing persisted; the record is written once, by
//! `CombineTutorial`.

pub mod call;
pub mod combine;
pub mod context;
pub mod fetch;
pub mod identify;
pub mod order;
pub mod relationships;
pub mod stage;
pub mod write;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use repo_tutor_core::change::detect_changes;
use repo_tutor_core::chapter::{plan_chapters, DependencyPolicy};
use repo_tutor_core::error::PipelineError;
use repo_tutor_core::hash::normalize_repo_id;
use repo_tutor_core::llm::{CallOptions, LlmClient};
use repo_tutor_core::models::{
    ChangeAnalysis, Chapter, DocumentationMode, RegenerationPlan, RepositoryCache, SourceFile, StageName,
};
use repo_tutor_core::pack::PackOptions;
use repo_tutor_core::plan::{
    plan_regeneration, refine_after_reidentify, GenerationTarget, RegenerationPolicy,
};
use repo_tutor_core::prompt_cache::PromptCache;
use repo_tutor_core::render::Tutorial;
use repo_tutor_core::store::RepoCacheStore;

use crate::config::{Config, PackingConfig, PricingConfig};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};

pub use call::CallStats;
pub use context::{GenerationRequest, PipelineContext};

use call::LlmCaller;
use combine::CombineTutorial;
use fetch::Fetch;
use identify::IdentifyAbstractions;
use order::OrderChapters;
use relationships::AnalyzeRelationships;
use stage::{run_stage, StageEnv};
use write::WriteChapters;

/// Knobs the stages read while executing, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub call_options: CallOptions,
    pub pricing: Option<PricingConfig>,
    pub packing: PackingConfig,
    pub context_window: usize,
    pub dependency_policy: DependencyPolicy,
    pub strict_relationship_coverage: bool,
    pub regeneration: RegenerationPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_options: config.llm.call_options(),
            pricing: config.llm.pricing,
            packing: config.packing.clone(),
            context_window: config.llm.context_window,
            dependency_policy: config.generation.dependency_policy,
            strict_relationship_coverage: config.generation.strict_relationship_coverage,
            regeneration: config.regeneration.policy(),
        }
    }

    pub fn pack_options(&self, mode: DocumentationMode, max_lines: usize) -> PackOptions {
        self.packing.pack_options(mode, max_lines, self.context_window)
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub project_name: String,
    pub tutorial: Tutorial,
    pub plan: RegenerationPlan,
    pub analysis: Option<ChangeAnalysis>,
    pub chapters: Vec<Chapter>,
    pub stats: CallStats,
    /// False when the repository cache could not be written.
    pub cache_saved: bool,
    pub record: RepositoryCache,
}

pub struct Pipeline {
    llm: Arc<dyn LlmClient>,
    prompt_cache: Arc<PromptCache>,
    repo_store: Arc<dyn RepoCacheStore>,
    progress: Arc<dyn ProgressReporter>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompt_cache: Arc<PromptCache>,
        repo_store: Arc<dyn RepoCacheStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            llm,
            prompt_cache,
            repo_store,
            progress: Arc::new(NoProgress),
            settings,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run all six stages for `request`.
    pub async fn run(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, PipelineError> {
        let cache = request.use_cache.then_some(self.prompt_cache.as_ref());
        let caller = LlmCaller::new(
            self.llm.as_ref(),
            cache,
            self.settings.call_options,
            self.settings.pricing,
        );
        let env = StageEnv {
            caller: &caller,
            settings: &self.settings,
            repo_store: self.repo_store.as_ref(),
            progress: self.progress.as_ref(),
            cancel,
        };

        tracing::info!(
            repo = %request.repo_url,
            files = request.files.len(),
            provider = caller.provider(),
            model = caller.model(),
            "starting generation"
        );

        let mut ctx = PipelineContext::new(request);
        run_stage(&Fetch, &mut ctx, &env).await?;
        self.plan_run(&mut ctx).await;

        if ctx.plan.mode.reuses_analysis() {
            restore_analysis(&mut ctx, &env)?;
        } else {
            run_stage(&IdentifyAbstractions, &mut ctx, &env).await?;
            run_stage(&AnalyzeRelationships, &mut ctx, &env).await?;
            run_stage(&OrderChapters, &mut ctx, &env).await?;
        }

        let order = ctx
            .chapter_order
            .as_deref()
            .ok_or_else(|| stage::missing(StageName::WriteChapters, "chapter_order"))?;
        let abstractions = ctx
            .abstractions
            .as_deref()
            .ok_or_else(|| stage::missing(StageName::WriteChapters, "abstractions"))?;
        let slots = plan_chapters(
            order,
            abstractions,
            ctx.relationships.as_ref(),
            self.settings.dependency_policy,
        );

        if let (Some(previous), Some(analysis)) = (&ctx.previous, &ctx.analysis) {
            ctx.plan = refine_after_reidentify(&ctx.plan, previous, &ctx.files, analysis, abstractions, &slots);
        }
        ctx.slots = Some(slots);

        run_stage(&WriteChapters, &mut ctx, &env).await?;
        run_stage(&CombineTutorial, &mut ctx, &env).await?;

        let stats = caller.stats();
        tracing::info!(
            llm_calls = stats.llm_calls,
            cache_hits = stats.cache_hits,
            plan = %ctx.plan.mode,
            "generation finished"
        );

        let PipelineContext {
            request,
            chapters,
            plan,
            analysis,
            tutorial,
            record,
            cache_saved,
            ..
        } = ctx;
        let missing = |field| stage::missing(StageName::CombineTutorial, field);
        Ok(GenerationOutcome {
            project_name: request.project_name,
            tutorial: tutorial.ok_or_else(|| missing("tutorial"))?,
            plan,
            analysis,
            chapters: chapters.unwrap_or_default(),
            stats,
            cache_saved,
            record: record.ok_or_else(|| missing("record"))?,
        })
    }

    async fn plan_run(&self, ctx: &mut PipelineContext) {
        if !ctx.request.use_cache {
            ctx.plan = RegenerationPlan::full("cache disabled", Vec::new());
            return;
        }
        let planned = plan_generation(
            self.repo_store.as_ref(),
            &ctx.request,
            &ctx.files,
            &self.settings.regeneration,
        )
        .await;
        ctx.plan = planned.plan;
        if let Some(previous) = planned.previous {
            ctx.analysis = Some(planned.analysis);
            ctx.previous = Some(Arc::new(previous));
        }
        tracing::info!(mode = %ctx.plan.mode, reason = %ctx.plan.reason, "regeneration plan chosen");
    }
}

/// Change analysis and plan for a snapshot, computed without model calls.
#[derive(Debug, Clone)]
pub struct PlannedRun {
    /// Record the analysis was computed against, if one was cached.
    pub previous: Option<RepositoryCache>,
    pub analysis: ChangeAnalysis,
    pub plan: RegenerationPlan,
}

/// Load the cached record for the request's repository, diff `files`
/// against it and choose a plan. A store failure counts as having no cache.
pub async fn plan_generation(
    repo_store: &dyn RepoCacheStore,
    request: &GenerationRequest,
    files: &[SourceFile],
    policy: &RegenerationPolicy,
) -> PlannedRun {
    let repo_id = normalize_repo_id(&request.repo_url);
    let previous = match repo_store.load(&repo_id).await {
        Ok(previous) => previous,
        Err(e) => {
            let err = PipelineError::CachePersistence(format!("{:#}", e));
            tracing::warn!(repo = %repo_id, error = %err, "treating as first run");
            None
        }
    };
    let analysis = match &previous {
        Some(p) => detect_changes(files, p),
        None => first_run_analysis(files),
    };
    let target = GenerationTarget {
        project_name: &request.project_name,
        language: &request.language,
        documentation_mode: request.documentation_mode,
    };
    let plan = plan_regeneration(&analysis, previous.as_ref(), &target, policy, request.regeneration);
    PlannedRun {
        previous,
        analysis,
        plan,
    }
}

/// Every file counts as added when there is nothing to compare against.
fn first_run_analysis(files: &[SourceFile]) -> ChangeAnalysis {
    ChangeAnalysis {
        added_files: files.iter().map(|f| f.path.clone()).collect(),
        total_files: files.len(),
        change_percentage: if files.is_empty() { 0.0 } else { 100.0 },
        ..ChangeAnalysis::default()
    }
}

/// Take abstractions, relationships and order from the previous record.
fn restore_analysis(ctx: &mut PipelineContext, env: &StageEnv<'_>) -> Result<(), PipelineError> {
    let previous = ctx
        .previous
        .clone()
        .ok_or_else(|| stage::missing(StageName::IdentifyAbstractions, "previous record"))?;
    let cached = previous
        .abstractions
        .as_deref()
        .ok_or_else(|| stage::missing(StageName::IdentifyAbstractions, "abstractions"))?;
    ctx.abstractions = Some(cached.iter().map(|a| a.to_abstraction(&ctx.files)).collect());
    env.report(ProgressEvent::stage(StageName::IdentifyAbstractions, "reusing cached abstractions", 10));

    ctx.relationships = Some(
        previous
            .relationships
            .clone()
            .ok_or_else(|| stage::missing(StageName::AnalyzeRelationships, "relationships"))?,
    );
    env.report(ProgressEvent::stage(StageName::AnalyzeRelationships, "reusing cached relationships", 25));

    ctx.chapter_order = Some(
        previous
            .chapter_order
            .clone()
            .ok_or_else(|| stage::missing(StageName::OrderChapters, "chapter_order"))?,
    );
    env.report(ProgressEvent::stage(StageName::OrderChapters, "reusing cached chapter order", 40));
    Ok(())
}
