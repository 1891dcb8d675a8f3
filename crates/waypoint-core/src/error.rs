use thiserror::Error;

/// Top-level error type for the Waypoint system.
///
/// Each variant wraps a subsystem-specific failure as a message. Crates
/// convert their internal errors into these variants so that the `?`
/// operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WaypointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Region error: {0}")]
    Region(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for WaypointError {
    fn from(err: toml::de::Error) -> Self {
        WaypointError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for WaypointError {
    fn from(err: toml::ser::Error) -> Self {
        WaypointError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for WaypointError {
    fn from(err: serde_json::Error) -> Self {
        WaypointError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Waypoint operations.
pub type Result<T> = std::result::Result<T, WaypointError>;
