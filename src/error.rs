//! Error types for consign-core.

use thiserror::Error;

/// Result type alias using consign-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the engine.
///
/// Most of these never reach a caller of the orchestration layer: skills,
/// breakers and agents convert them into typed result values. The graph
/// variants are the exception, since a corrupt graph cannot be reasoned about.
#[derive(Error, Debug)]
pub enum Error {
    /// A fact with this id is already in the graph
    #[error("Duplicate fact id: {0}")]
    DuplicateFact(String),

    /// A relationship or query referenced a fact that does not exist
    #[error("Unknown fact id: {0}")]
    UnknownFact(String),

    /// Serialized graph state could not be rebuilt
    #[error("Corrupt fact graph: {0}")]
    CorruptGraph(String),

    /// A skill with this id is already registered
    #[error("Duplicate skill id: {0}")]
    DuplicateSkill(String),

    /// An agent with this id is already registered
    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),

    /// Skill execution failed
    #[error("Skill '{skill_id}' failed: {message}")]
    SkillExecution { skill_id: String, message: String },

    /// Required input missing from a skill or agent context
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a skill execution error.
    pub fn skill_execution(skill_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SkillExecution {
            skill_id: skill_id.into(),
            message: message.into(),
        }
    }

    /// Create a missing-input error.
    pub fn missing_input(field: impl Into<String>) -> Self {
        Self::MissingInput(field.into())
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::skill_execution("market-price-parity", "index unavailable");
        assert_eq!(
            err.to_string(),
            "Skill 'market-price-parity' failed: index unavailable"
        );

        assert_eq!(
            Error::timeout(250).to_string(),
            "Operation timed out after 250ms"
        );
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
