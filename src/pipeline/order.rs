use async_trait::async_trait;

use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::{Abstraction, RelationshipSet, StageName};
use repo_tutor_core::prompt_cache::CacheLookup;
use repo_tutor_core::validate::{parse_structured, ChapterOrderSchema};

use super::context::PipelineContext;
use super::stage::{missing, Stage, StageEnv};
use crate::progress::ProgressEvent;
use crate::prompts;

pub struct OrderInput {
    abstractions: Vec<Abstraction>,
    relationships: RelationshipSet,
    project_name: String,
    language: String,
    lookup: CacheLookup,
}

/// Asks the model for the order in which to explain the abstractions.
pub struct OrderChapters;

#[async_trait]
impl Stage for OrderChapters {
    type Input = OrderInput;
    type Output = Vec<usize>;

    fn name(&self) -> StageName {
        StageName::OrderChapters
    }

    fn prep(&self, ctx: &PipelineContext) -> Result<OrderInput, PipelineError> {
        let abstractions = ctx
            .abstractions
            .clone()
            .ok_or_else(|| missing(self.name(), "abstractions"))?;
        let relationships = ctx
            .relationships
            .clone()
            .ok_or_else(|| missing(self.name(), "relationships"))?;
        Ok(OrderInput {
            abstractions,
            relationships,
            project_name: ctx.request.project_name.clone(),
            language: ctx.request.language.clone(),
            lookup: ctx.cache_lookup(),
        })
    }

    async fn exec(&self, env: &StageEnv<'_>, input: OrderInput) -> Result<Vec<usize>, PipelineError> {
        env.report(ProgressEvent::stage(self.name(), "ordering chapters", 40));

        let prompt = prompts::order_chapters(
            &input.project_name,
            &input.abstractions,
            &input.relationships,
            &input.language,
        );
        let result = env.caller.call(self.name(), &prompt, input.lookup).await?;
        let schema = ChapterOrderSchema {
            abstraction_count: input.abstractions.len(),
        };
        let order = parse_structured(&schema, &result.text)?;
        tracing::info!(order = ?order, "chapter order decided");
        Ok(order)
    }

    fn commit(&self, ctx: &mut PipelineContext, order: Vec<usize>) {
        ctx.chapter_order = Some(order);
    }
}
