//! Error types for the wellness_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for wellness_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single module or question definition is malformed
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Registry consistency check failed
    #[error("Registry validation error: {0}")]
    RegistryValidation(String),

    /// No module with this id exists in the registry
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Submitted answers do not fit the module's questions
    #[error("Invalid answers for module '{module_id}': {}", issues.join("; "))]
    InvalidAnswers {
        module_id: String,
        issues: Vec<String>,
    },

    /// Module cannot be completed while required questions are unanswered
    #[error("Module '{module_id}' is missing required answers: {}", missing.join(", "))]
    IncompleteModule {
        module_id: String,
        missing: Vec<String>,
    },

    /// User id cannot be used as a storage key
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    /// Profile storage failed or holds unreadable data
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// True for the not-found case callers usually turn into a navigation fallback
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::UnknownModule(_))
    }
}
