use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use repo_tutor_core::change::build_manifest;
use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::{
    Abstraction, CachedAbstraction, Chapter, DocumentationMode, GenerationMetadata, RegenerationMode,
    RelationshipSet, RepositoryCache, SourceFile, StageName,
};
use repo_tutor_core::render::{render_tutorial, Tutorial};

use super::context::PipelineContext;
use super::stage::{missing, Stage, StageEnv};
use crate::progress::ProgressEvent;

pub struct CombineInput {
    repo_url: String,
    project_name: String,
    language: String,
    mode: DocumentationMode,
    files: Arc<Vec<SourceFile>>,
    abstractions: Vec<Abstraction>,
    relationships: RelationshipSet,
    order: Vec<usize>,
    chapters: Vec<Chapter>,
    plan_mode: RegenerationMode,
    previous: Option<Arc<RepositoryCache>>,
}

pub struct CombineOutput {
    tutorial: Tutorial,
    record: RepositoryCache,
    saved: bool,
}

/// Renders the tutorial and commits the run to the repository cache.
///
/// This is the only place a run writes its record. A failed save is
/// reported but the rendered tutorial is still returned.
pub struct CombineTutorial;

#[async_trait]
impl Stage for CombineTutorial {
    type Input = CombineInput;
    type Output = CombineOutput;

    fn name(&self) -> StageName {
        StageName::CombineTutorial
    }

    fn prep(&self, ctx: &PipelineContext) -> Result<CombineInput, PipelineError> {
        let stage = self.name();
        Ok(CombineInput {
            repo_url: ctx.request.repo_url.clone(),
            project_name: ctx.request.project_name.clone(),
            language: ctx.request.language.clone(),
            mode: ctx.request.documentation_mode,
            files: Arc::clone(&ctx.files),
            abstractions: ctx.abstractions.clone().ok_or_else(|| missing(stage, "abstractions"))?,
            relationships: ctx.relationships.clone().ok_or_else(|| missing(stage, "relationships"))?,
            order: ctx.chapter_order.clone().ok_or_else(|| missing(stage, "chapter_order"))?,
            chapters: ctx.chapters.clone().ok_or_else(|| missing(stage, "chapters"))?,
            plan_mode: ctx.plan.mode,
            previous: ctx.previous.clone(),
        })
    }

    async fn exec(&self, env: &StageEnv<'_>, input: CombineInput) -> Result<CombineOutput, PipelineError> {
        let tutorial = render_tutorial(
            &input.project_name,
            Some(input.repo_url.as_str()),
            &input.abstractions,
            &input.relationships,
            &input.chapters,
        );

        let now = Utc::now();
        let previous_files = input.previous.as_deref().map(|p| p.files.as_slice()).unwrap_or(&[]);
        let stats = env.caller.stats();
        let mut record = RepositoryCache::new(&input.repo_url);
        record.last_crawl_time = now;
        record.files = build_manifest(&input.files, previous_files, now);
        record.abstractions = Some(
            input
                .abstractions
                .iter()
                .map(|a| CachedAbstraction::from_abstraction(a, &input.files))
                .collect(),
        );
        record.relationships = Some(input.relationships);
        record.chapter_order = Some(input.order);
        record.chapters = input
            .chapters
            .into_iter()
            .map(|c| (c.slug.clone(), c))
            .collect();
        record.metadata = GenerationMetadata {
            run_id: uuid::Uuid::new_v4().to_string(),
            project_name: input.project_name,
            language: input.language,
            documentation_mode: input.mode,
            provider: env.caller.provider().to_string(),
            model: env.caller.model().to_string(),
            generated_at: Some(now),
            file_count: input.files.len(),
            chapter_count: record.chapters.len(),
            plan_mode: Some(input.plan_mode),
            llm_calls: stats.llm_calls,
            cache_hits: stats.cache_hits,
        };

        env.check_cancelled(self.name())?;
        let saved = match env.repo_store.save(&record).await {
            Ok(()) => true,
            Err(e) => {
                let err = PipelineError::CachePersistence(format!("{:#}", e));
                tracing::warn!(repo = %record.repo_id, error = %err, "tutorial generated but not cached");
                false
            }
        };

        env.report(ProgressEvent::stage(
            self.name(),
            format!("tutorial combined ({} chapters)", record.chapters.len()),
            100,
        ));
        Ok(CombineOutput { tutorial, record, saved })
    }

    fn commit(&self, ctx: &mut PipelineContext, output: CombineOutput) {
        ctx.tutorial = Some(output.tutorial);
        ctx.record = Some(output.record);
        ctx.cache_saved = output.saved;
    }
}
