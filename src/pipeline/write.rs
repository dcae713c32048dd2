use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use repo_tutor_core::chapter::{chapter_listing, ensure_heading, narrative_summary, ChapterSlot};
use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::{
    Abstraction, Chapter, DocumentationMode, RegenerationPlan, RepositoryCache, SourceFile, StageName,
};
use repo_tutor_core::pack;
use repo_tutor_core::prompt_cache::CacheLookup;

use super::context::PipelineContext;
use super::stage::{missing, Stage, StageEnv};
use crate::progress::ProgressEvent;
use crate::prompts::{self, ChapterPrompt};

pub struct WriteInput {
    files: Arc<Vec<SourceFile>>,
    abstractions: Vec<Abstraction>,
    slots: Vec<ChapterSlot>,
    plan: RegenerationPlan,
    previous: Option<Arc<RepositoryCache>>,
    project_name: String,
    language: String,
    lookup: CacheLookup,
    mode: DocumentationMode,
    max_lines: usize,
}

/// Writes chapters one at a time in chapter order.
///
/// Each prompt carries the full content of every earlier chapter, so the
/// loop is serial. Chapters the plan does not regenerate are taken from
/// the previous record verbatim and still feed the narrative.
pub struct WriteChapters;

#[async_trait]
impl Stage for WriteChapters {
    type Input = WriteInput;
    type Output = Vec<Chapter>;

    fn name(&self) -> StageName {
        StageName::WriteChapters
    }

    fn prep(&self, ctx: &PipelineContext) -> Result<WriteInput, PipelineError> {
        let abstractions = ctx
            .abstractions
            .clone()
            .ok_or_else(|| missing(self.name(), "abstractions"))?;
        let slots = ctx.slots.clone().ok_or_else(|| missing(self.name(), "chapter_order"))?;
        Ok(WriteInput {
            files: Arc::clone(&ctx.files),
            abstractions,
            slots,
            plan: ctx.plan.clone(),
            previous: ctx.previous.clone(),
            project_name: ctx.request.project_name.clone(),
            language: ctx.request.language.clone(),
            lookup: ctx.cache_lookup(),
            mode: ctx.request.documentation_mode,
            max_lines: ctx.request.max_lines_per_file,
        })
    }

    async fn exec(&self, env: &StageEnv<'_>, input: WriteInput) -> Result<Vec<Chapter>, PipelineError> {
        let total = input.slots.len();
        let listing = chapter_listing(&input.slots);
        let opts = env.settings.pack_options(input.mode, input.max_lines);
        let mut completed: Vec<Chapter> = Vec::with_capacity(total);

        for slot in &input.slots {
            env.check_cancelled(self.name())?;
            let percent = (45 + 50 * completed.len() / total.max(1)) as u8;

            let cached = match &input.previous {
                Some(previous) if !input.plan.regenerates(&slot.slug) => previous.chapters.get(&slot.slug),
                _ => None,
            };
            if let Some(chapter) = cached {
                tracing::debug!(slug = %slot.slug, "reusing cached chapter");
                env.report(ProgressEvent::chapter(
                    format!("reused chapter {}: {}", slot.number, slot.name),
                    percent,
                    slot.number,
                    total,
                ));
                completed.push(chapter.clone());
                continue;
            }

            let abstraction = input
                .abstractions
                .get(slot.abstraction_index)
                .ok_or_else(|| {
                    PipelineError::invalid_reference(
                        self.name(),
                        format!("chapter {} points at missing abstraction {}", slot.number, slot.abstraction_index),
                    )
                })?;
            env.report(ProgressEvent::chapter(
                format!("writing chapter {}: {}", slot.number, slot.name),
                percent,
                slot.number,
                total,
            ));

            let packed = pack::pack_files(&input.files, &abstraction.file_indices, &opts);
            let narrative = narrative_summary(&completed);
            let prompt = prompts::write_chapter(&ChapterPrompt {
                project_name: &input.project_name,
                slot,
                abstraction,
                total_chapters: total,
                chapter_listing: &listing,
                narrative: &narrative,
                packed: &packed,
                mode: input.mode,
                language: &input.language,
            });

            let result = env.caller.call(self.name(), &prompt, input.lookup).await?;
            if result.text.trim().is_empty() {
                return Err(PipelineError::malformed(
                    self.name(),
                    format!("empty response for chapter {}", slot.number),
                ));
            }
            completed.push(Chapter {
                slug: slot.slug.clone(),
                title: slot.name.clone(),
                content: ensure_heading(&result.text, slot.number, &slot.name),
                abstractions_covered: vec![abstraction.name.clone()],
                dependencies: slot.dependencies.clone(),
                generated_at: Utc::now(),
                prompt_hash: result.prompt_hash,
            });
        }

        env.report(ProgressEvent::stage(self.name(), format!("{} chapters ready", total), 95));
        Ok(completed)
    }

    fn commit(&self, ctx: &mut PipelineContext, chapters: Vec<Chapter>) {
        ctx.chapters = Some(chapters);
    }
}
