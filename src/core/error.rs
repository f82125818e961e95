use thiserror::Error;

/// Errors surfaced to callers of the aggregator. Poll failures are never
/// reported here, they are recorded as observations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("invalid configuration for target `{target}`: {reason}")]
    InvalidConfig { target: String, reason: String },
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

impl AggregatorError {
    pub fn invalid(target: &str, reason: impl Into<String>) -> AggregatorError {
        AggregatorError::InvalidConfig {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}
