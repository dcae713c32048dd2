use std::sync::Arc;

use async_trait::async_trait;

use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::{Abstraction, DocumentationMode, SourceFile, StageName};
use repo_tutor_core::pack;
use repo_tutor_core::prompt_cache::CacheLookup;
use repo_tutor_core::validate::{parse_structured, AbstractionListSchema};

use super::context::PipelineContext;
use super::stage::{missing, Stage, StageEnv};
use crate::progress::ProgressEvent;
use crate::prompts;

pub struct IdentifyInput {
    files: Arc<Vec<SourceFile>>,
    project_name: String,
    language: String,
    lookup: CacheLookup,
    mode: DocumentationMode,
    max_abstractions: usize,
    max_lines: usize,
}

/// Asks the model for the core abstractions of the codebase.
pub struct IdentifyAbstractions;

#[async_trait]
impl Stage for IdentifyAbstractions {
    type Input = IdentifyInput;
    type Output = Vec<Abstraction>;

    fn name(&self) -> StageName {
        StageName::IdentifyAbstractions
    }

    fn prep(&self, ctx: &PipelineContext) -> Result<IdentifyInput, PipelineError> {
        if ctx.files.is_empty() {
            return Err(missing(self.name(), "files"));
        }
        Ok(IdentifyInput {
            files: Arc::clone(&ctx.files),
            project_name: ctx.request.project_name.clone(),
            language: ctx.request.language.clone(),
            lookup: ctx.cache_lookup(),
            mode: ctx.request.documentation_mode,
            max_abstractions: ctx.request.max_abstractions,
            max_lines: ctx.request.max_lines_per_file,
        })
    }

    async fn exec(&self, env: &StageEnv<'_>, input: IdentifyInput) -> Result<Vec<Abstraction>, PipelineError> {
        env.report(ProgressEvent::stage(self.name(), "identifying core abstractions", 10));

        let opts = env.settings.pack_options(input.mode, input.max_lines);
        let packed = pack::pack_all(&input.files, &opts);
        let prompt = prompts::identify_abstractions(
            &input.project_name,
            &input.files,
            &packed,
            input.max_abstractions,
            input.mode,
            &input.language,
        );

        let result = env.caller.call(self.name(), &prompt, input.lookup).await?;
        let schema = AbstractionListSchema {
            file_count: input.files.len(),
        };
        let mut abstractions = parse_structured(&schema, &result.text)?;

        if abstractions.len() > input.max_abstractions {
            tracing::warn!(
                returned = abstractions.len(),
                max = input.max_abstractions,
                "model returned too many abstractions, keeping the first ones"
            );
            abstractions.truncate(input.max_abstractions);
        }

        tracing::info!(count = abstractions.len(), cached = result.from_cache, "abstractions identified");
        Ok(abstractions)
    }

    fn commit(&self, ctx: &mut PipelineContext, abstractions: Vec<Abstraction>) {
        ctx.abstractions = Some(abstractions);
    }
}
