//! Error taxonomy for pipeline runs and model calls.

use thiserror::Error;

use crate::models::StageName;

/// Failures that abort (or, for persistence, degrade) a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage's required input was never produced upstream.
    #[error("{stage}: missing upstream data: {field}")]
    MissingUpstreamData { stage: StageName, field: &'static str },

    /// Model output had no fenced block, did not parse, or had the wrong shape.
    #[error("{stage}: malformed model output: {reason}")]
    MalformedOutput { stage: StageName, reason: String },

    /// A file or abstraction index was unparseable or out of range.
    #[error("{stage}: invalid reference: {reason}")]
    InvalidReference { stage: StageName, reason: String },

    /// A chapter order that is not a permutation of all abstractions.
    #[error("order_chapters: incomplete order (expected {expected} chapters): {reason}")]
    IncompleteOrder { expected: usize, reason: String },

    /// Abstractions absent from every relationship, under strict coverage.
    #[error("analyze_relationships: abstractions not covered by any relationship: {missing:?}")]
    IncompleteCoverage { missing: Vec<usize> },

    #[error("{stage}: LLM call failed: {source}")]
    LlmCall {
        stage: StageName,
        #[source]
        source: LlmError,
    },

    #[error("cache persistence failed: {0}")]
    CachePersistence(String),

    #[error("{stage}: run cancelled")]
    Cancelled { stage: StageName },
}

impl PipelineError {
    pub fn malformed(stage: StageName, reason: impl Into<String>) -> Self {
        PipelineError::MalformedOutput {
            stage,
            reason: reason.into(),
        }
    }

    pub fn invalid_reference(stage: StageName, reason: impl Into<String>) -> Self {
        PipelineError::InvalidReference {
            stage,
            reason: reason.into(),
        }
    }

    /// Stage the error is attributed to, when there is one.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PipelineError::MissingUpstreamData { stage, .. }
            | PipelineError::MalformedOutput { stage, .. }
            | PipelineError::InvalidReference { stage, .. }
            | PipelineError::LlmCall { stage, .. }
            | PipelineError::Cancelled { stage } => Some(*stage),
            PipelineError::IncompleteOrder { .. } => Some(StageName::OrderChapters),
            PipelineError::IncompleteCoverage { .. } => Some(StageName::AnalyzeRelationships),
            PipelineError::CachePersistence(_) => None,
        }
    }
}

/// Distinguishable failure kinds raised by an LLM call service.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM provider is disabled")]
    Disabled,

    #[error("API key not set: {0}")]
    MissingApiKey(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("provider server error: {0}")]
    Server(String),

    #[error("request rejected: {0}")]
    Client(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Rate limits, server errors and transport errors may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Server(_) | LlmError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_stage() {
        let err = PipelineError::MissingUpstreamData {
            stage: StageName::OrderChapters,
            field: "relationships",
        };
        assert_eq!(
            err.to_string(),
            "order_chapters: missing upstream data: relationships"
        );

        let err = PipelineError::LlmCall {
            stage: StageName::WriteChapters,
            source: LlmError::RateLimited("429".into()),
        };
        assert!(err.to_string().starts_with("write_chapters: LLM call failed"));
        assert_eq!(err.stage(), Some(StageName::WriteChapters));
    }

    #[test]
    fn retryable_kinds() {
        assert!(LlmError::Server("502".into()).is_retryable());
        assert!(!LlmError::Auth("401".into()).is_retryable());
    }
}
