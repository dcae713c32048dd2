use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::{SourceFile, StageName};

use super::context::PipelineContext;
use super::stage::{missing, Stage, StageEnv};
use crate::progress::ProgressEvent;

/// Takes the crawled snapshot into the context. Duplicate paths keep
/// their first occurrence so file indices stay unambiguous.
pub struct Fetch;

#[async_trait]
impl Stage for Fetch {
    type Input = Vec<SourceFile>;
    type Output = Vec<SourceFile>;

    fn name(&self) -> StageName {
        StageName::Fetch
    }

    fn prep(&self, ctx: &PipelineContext) -> Result<Vec<SourceFile>, PipelineError> {
        if ctx.request.files.is_empty() {
            return Err(missing(self.name(), "files"));
        }
        Ok(ctx.request.files.clone())
    }

    async fn exec(&self, env: &StageEnv<'_>, files: Vec<SourceFile>) -> Result<Vec<SourceFile>, PipelineError> {
        let total = files.len();
        let mut seen = HashSet::new();
        let files: Vec<SourceFile> = files
            .into_iter()
            .filter(|f| seen.insert(f.path.clone()))
            .collect();
        if files.len() != total {
            tracing::warn!(dropped = total - files.len(), "duplicate paths in snapshot");
        }
        env.report(ProgressEvent::stage(
            self.name(),
            format!("{} files in snapshot", files.len()),
            5,
        ));
        Ok(files)
    }

    fn commit(&self, ctx: &mut PipelineContext, files: Vec<SourceFile>) {
        ctx.files = Arc::new(files);
    }
}
