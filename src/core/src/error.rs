use thiserror::Error;

/// kbundle error types
#[derive(Error, Debug)]
pub enum BundleError {
    /// Malformed image reference or query expression
    #[error("Parse error: {message} ('{value}' in {source_id})")]
    Parse {
        value: String,
        source_id: String,
        message: String,
    },

    /// Rejected user input (locators, bundle names)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Archive or OCI image that violates the bundle format
    #[error("Format error: {0}")]
    Format(String),

    /// Two inputs that map to the same destination
    #[error("Collision: {first} conflicts with {second}")]
    Collision { first: String, second: String },

    /// Missing image, locator or file
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BundleError {
    /// Build a parse error for `value` read from `source_id`.
    pub fn parse(
        value: impl Into<String>,
        source_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BundleError::Parse {
            value: value.into(),
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Attach the input an operation was working on to an I/O error.
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        BundleError::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err)))
    }
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BundleError {
    fn from(err: serde_yaml::Error) -> Self {
        BundleError::Serialization(err.to_string())
    }
}

/// Result type alias for kbundle operations
pub type Result<T> = std::result::Result<T, BundleError>;
