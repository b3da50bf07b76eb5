/// Shared error type used across all Steward crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("operation not found: {0}")]
    OperationNotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("model {provider}: {message}")]
    Model { provider: String, message: String },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short machine-readable tag, used as `OperationError::error_type`
    /// when a driver records a failure on an operation.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Toml(_) => "toml",
            Error::Config(_) => "config",
            Error::OperationNotFound(_) => "operation_not_found",
            Error::Cancelled(_) => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::Model { .. } => "model",
            Error::Tool { .. } => "tool",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(Error::Timeout("tool".into()).kind(), "timeout");
        assert_eq!(
            Error::Model { provider: "openai".into(), message: "boom".into() }.kind(),
            "model"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = Error::Tool { tool: "search".into(), message: "rate limited".into() };
        assert_eq!(err.to_string(), "tool search: rate limited");
    }
}
