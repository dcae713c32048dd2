use std::sync::Arc;

use async_trait::async_trait;

use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::{Abstraction, DocumentationMode, RelationshipSet, SourceFile, StageName};
use repo_tutor_core::pack;
use repo_tutor_core::prompt_cache::CacheLookup;
use repo_tutor_core::validate::{parse_structured, uncovered_abstractions, RelationshipSchema};

use super::context::PipelineContext;
use super::stage::{missing, Stage, StageEnv};
use crate::progress::ProgressEvent;
use crate::prompts;

pub struct RelationshipInput {
    files: Arc<Vec<SourceFile>>,
    abstractions: Vec<Abstraction>,
    project_name: String,
    language: String,
    lookup: CacheLookup,
    mode: DocumentationMode,
    max_lines: usize,
}

/// Asks the model for a project summary and the edges between abstractions.
pub struct AnalyzeRelationships;

#[async_trait]
impl Stage for AnalyzeRelationships {
    type Input = RelationshipInput;
    type Output = RelationshipSet;

    fn name(&self) -> StageName {
        StageName::AnalyzeRelationships
    }

    fn prep(&self, ctx: &PipelineContext) -> Result<RelationshipInput, PipelineError> {
        let abstractions = ctx
            .abstractions
            .clone()
            .ok_or_else(|| missing(self.name(), "abstractions"))?;
        Ok(RelationshipInput {
            files: Arc::clone(&ctx.files),
            abstractions,
            project_name: ctx.request.project_name.clone(),
            language: ctx.request.language.clone(),
            lookup: ctx.cache_lookup(),
            mode: ctx.request.documentation_mode,
            max_lines: ctx.request.max_lines_per_file,
        })
    }

    async fn exec(&self, env: &StageEnv<'_>, input: RelationshipInput) -> Result<RelationshipSet, PipelineError> {
        env.report(ProgressEvent::stage(self.name(), "analyzing relationships", 25));

        let candidates: Vec<usize> = input
            .abstractions
            .iter()
            .flat_map(|a| a.file_indices.iter().copied())
            .collect();
        let opts = env.settings.pack_options(input.mode, input.max_lines);
        let packed = pack::pack_files(&input.files, &candidates, &opts);
        let prompt = prompts::analyze_relationships(
            &input.project_name,
            &input.abstractions,
            &packed,
            &input.language,
        );

        let result = env.caller.call(self.name(), &prompt, input.lookup).await?;
        let schema = RelationshipSchema {
            abstraction_count: input.abstractions.len(),
        };
        let relationships = parse_structured(&schema, &result.text)?;

        let uncovered = uncovered_abstractions(&relationships, input.abstractions.len());
        if !uncovered.is_empty() {
            if env.settings.strict_relationship_coverage {
                return Err(PipelineError::IncompleteCoverage { missing: uncovered });
            }
            let names: Vec<&str> = uncovered
                .iter()
                .filter_map(|&i| input.abstractions.get(i).map(|a| a.name.as_str()))
                .collect();
            tracing::warn!(missing = ?uncovered, names = ?names, "abstractions not covered by any relationship");
        }

        tracing::info!(edges = relationships.details.len(), "relationships analyzed");
        Ok(relationships)
    }

    fn commit(&self, ctx: &mut PipelineContext, relationships: RelationshipSet) {
        ctx.relationships = Some(relationships);
    }
}
