//! Error types for kgrag

use thiserror::Error;

/// Result type alias using kgrag's Error
pub type Result<T> = std::result::Result<T, Error>;

/// kgrag error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Source errors (E001-E099)
    #[error("Topic '{0}' not found by the source text provider.")]
    TopicNotFound(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `kgrag config get llm.api_key`.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("No suitable model found: {0}")]
    NoSuitableModel(String),

    // Deadline errors (E300-E399)
    #[error("{0} did not complete within {1} seconds")]
    Timeout(String, u64),

    #[error("{0} was cancelled")]
    Cancelled(String),

    // Graph store errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Failed to connect to graph store: {0}")]
    StoreConnection(String),

    #[error("Graph store query failed: {0}")]
    StoreQuery(String),

    // Ontology errors (E500-E599)
    #[error("Ontology profile '{0}' is not registered. Run `kgrag profiles list` to see all profiles.")]
    UnknownProfile(String),

    #[error("Graph store is bound to ontology profile '{bound}', refusing to use it with '{requested}'")]
    ProfileMismatch { bound: String, requested: String },

    #[error("Invalid ontology profile: {0}")]
    InvalidProfile(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::TopicNotFound(_) => "E001",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::NoSuitableModel(_) => "E103",
            Self::Timeout(..) => "E300",
            Self::Cancelled(_) => "E301",
            Self::DatabaseError(_) => "E400",
            Self::StoreConnection(_) => "E401",
            Self::StoreQuery(_) => "E402",
            Self::UnknownProfile(_) => "E500",
            Self::ProfileMismatch { .. } => "E501",
            Self::InvalidProfile(_) => "E502",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("Set KGRAG_API_KEY or OPENROUTER_API_KEY".to_string()),
            Self::StoreConnection(_) => {
                Some("Set NEO4J_URI, NEO4J_USERNAME and NEO4J_PASSWORD, then run `kgrag doctor`".to_string())
            }
            Self::UnknownProfile(_) => Some("kgrag profiles list".to_string()),
            Self::ProfileMismatch { bound, .. } => {
                Some(format!("kgrag --profile {} ...  (or point graph.database_path at a separate store)", bound))
            }
            Self::Timeout(..) => Some("kgrag --timeout-secs <larger value> ...".to_string()),
            _ => None,
        }
    }

    /// Whether this error came from the graph store (connection or query)
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::StoreConnection(_) | Self::StoreQuery(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct_for_taxonomy() {
        assert_eq!(Error::TopicNotFound("x".into()).code(), "E001");
        assert_eq!(Error::StoreConnection("x".into()).code(), "E401");
        assert_eq!(Error::StoreQuery("x".into()).code(), "E402");
        assert_eq!(Error::LLMError("x".into()).code(), "E101");
    }

    #[test]
    fn test_profile_mismatch_message() {
        let err = Error::ProfileMismatch {
            bound: "legal".into(),
            requested: "generic".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("legal"));
        assert!(msg.contains("generic"));
        assert!(err.suggestion().unwrap().contains("--profile legal"));
    }

    #[test]
    fn test_store_failure_classification() {
        assert!(Error::StoreQuery("boom".into()).is_store_failure());
        assert!(Error::StoreConnection("refused".into()).is_store_failure());
        assert!(!Error::TopicNotFound("Nope".into()).is_store_failure());
        assert!(!Error::LLMError("bad key".into()).is_store_failure());
    }
}
