//! Error types for the Ragchain core library.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering chain contracts, generation, retrieval, and configuration.

/// Top-level error type for the Ragchain core library.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the chains themselves, independent of any collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Missing input key: {key}")]
    MissingInputKey { key: String },

    #[error(
        "Unknown chain type {chain_type}. Chain type should be one of the following: stuff_documents_chain, map_reduce_documents_chain."
    )]
    UnknownChainType { chain_type: String },

    #[error("Question generator returned multiple values ({keys:?}), only a single value is supported")]
    AmbiguousRewriteOutput { keys: Vec<String> },

    #[error("Context too large: prompt needs {used} tokens, limit is {limit}")]
    ContextTooLarge { used: usize, limit: usize },

    #[error("Invalid value for input key '{key}': {reason}")]
    InvalidInput { key: String, reason: String },

    #[error("Missing value for prompt variable: {variable}")]
    MissingPromptVariable { variable: String },

    #[error("Prompt template error: {message}")]
    Template { message: String },

    #[error("Not implemented: {operation}")]
    NotImplemented { operation: String },
}

/// Errors from the generator capability (the language-model call).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Generation failed: {message}")]
    Other { message: String },
}

/// Errors from the retriever capability.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retriever backend failed: {message}")]
    Backend { message: String },

    #[error("Invalid retrieval query: {reason}")]
    InvalidQuery { reason: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl ChainError {
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingInputKey { key: key.into() }
    }

    pub fn not_implemented(operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
        }
    }
}

impl From<Box<figment::Error>> for ConfigError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `RagError`.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_missing_key() {
        let err = RagError::Chain(ChainError::missing_key("query"));
        assert_eq!(err.to_string(), "Chain error: Missing input key: query");
    }

    #[test]
    fn test_error_display_unknown_chain_type() {
        let err = ChainError::UnknownChainType {
            chain_type: "bogus".into(),
        };
        assert!(err.to_string().starts_with("Unknown chain type bogus."));
        assert!(err.to_string().contains("map_reduce_documents_chain"));
    }

    #[test]
    fn test_error_display_generation() {
        let err = RagError::Generation(GenerationError::RateLimited {
            retry_after_secs: 30,
        });
        assert_eq!(
            err.to_string(),
            "Generation error: Rate limited by provider, retry after 30s"
        );
    }

    #[test]
    fn test_error_display_retrieval() {
        let err = RagError::Retrieval(RetrievalError::Backend {
            message: "index offline".into(),
        });
        assert_eq!(
            err.to_string(),
            "Retrieval error: Retriever backend failed: index offline"
        );
    }

    #[test]
    fn test_error_from_conversions() {
        let chain: RagError = ChainError::not_implemented("serialize").into();
        assert!(matches!(
            chain,
            RagError::Chain(ChainError::NotImplemented { .. })
        ));

        let io: RagError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(io, RagError::Io(_)));
    }

    #[test]
    fn test_context_too_large_display() {
        let err = ChainError::ContextTooLarge {
            used: 9000,
            limit: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Context too large: prompt needs 9000 tokens, limit is 4096"
        );
    }
}
