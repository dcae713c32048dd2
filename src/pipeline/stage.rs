//! The stage contract and its runner.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use repo_tutor_core::error::PipelineError;
use repo_tutor_core::models::StageName;
use repo_tutor_core::store::RepoCacheStore;

use super::call::LlmCaller;
use super::context::PipelineContext;
use super::PipelineSettings;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Services available to a stage while it executes.
pub struct StageEnv<'a> {
    pub caller: &'a LlmCaller<'a>,
    pub settings: &'a PipelineSettings,
    pub repo_store: &'a dyn RepoCacheStore,
    pub progress: &'a dyn ProgressReporter,
    pub cancel: &'a CancellationToken,
}

impl StageEnv<'_> {
    pub fn report(&self, event: ProgressEvent) {
        self.progress.report(event);
    }

    pub fn check_cancelled(&self, stage: StageName) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

/// One pipeline stage: gather inputs, do the work, write results back.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn name(&self) -> StageName;

    /// Read and validate inputs from the context. Fails with
    /// `MissingUpstreamData` when an earlier stage's result is absent.
    fn prep(&self, ctx: &PipelineContext) -> Result<Self::Input, PipelineError>;

    async fn exec(&self, env: &StageEnv<'_>, input: Self::Input) -> Result<Self::Output, PipelineError>;

    fn commit(&self, ctx: &mut PipelineContext, output: Self::Output);
}

/// Run `stage` against `ctx`. Output produced after cancellation is discarded.
pub async fn run_stage<S: Stage>(
    stage: &S,
    ctx: &mut PipelineContext,
    env: &StageEnv<'_>,
) -> Result<(), PipelineError> {
    let name = stage.name();
    env.check_cancelled(name)?;
    let input = stage.prep(ctx)?;
    let output = stage.exec(env, input).await?;
    env.check_cancelled(name)?;
    stage.commit(ctx, output);
    tracing::debug!(stage = %name, "stage committed");
    Ok(())
}

pub(crate) fn missing(stage: StageName, field: &'static str) -> PipelineError {
    PipelineError::MissingUpstreamData { stage, field }
}
