//! Error taxonomy for the pipeline.
//!
//! Only two conditions are hard errors at the pipeline boundary:
//! an exhausted quota and an unreachable generation backend. The
//! backend error never escapes the orchestrator — it triggers the
//! local fallback synthesis instead. Everything else (clarification,
//! pending approval, stale approval resolution) is a normal outcome
//! modeled as a value, not an error.

use thiserror::Error;

/// Typed failures surfaced by pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The metered balance for the requested credit kind is exhausted.
    /// Surfaced to the caller verbatim as the terminal message text.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The external LLM backend failed (non-2xx, timeout, or a body
    /// that could not be parsed). Callers inside the orchestrator
    /// catch this and fall back to local synthesis.
    #[error("generation backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_is_verbatim() {
        let err = PipelineError::QuotaExceeded("0 of 10 credits left".into());
        assert_eq!(err.to_string(), "quota exceeded: 0 of 10 credits left");
    }
}
