//! Error types for cache eviction

use std::fmt;

#[derive(Debug)]
pub enum EvictError {
    /// The backend kind expires its own entries; eviction is declined.
    Refused(String),
    Config(String),
    Database(Box<sqlx::Error>),
    Io(Box<std::io::Error>),
}

impl fmt::Display for EvictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictError::Refused(kind) => write!(
                f,
                "Eviction refused: cache driver '{}' already evicts expired keys by itself",
                kind
            ),
            EvictError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EvictError::Database(err) => write!(f, "Database error: {}", err),
            EvictError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for EvictError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvictError::Database(err) => Some(err.as_ref()),
            EvictError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for EvictError {
    fn from(err: sqlx::Error) -> Self {
        EvictError::Database(Box::new(err))
    }
}

impl From<std::io::Error> for EvictError {
    fn from(err: std::io::Error) -> Self {
        EvictError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for EvictError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        EvictError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EvictError>;
