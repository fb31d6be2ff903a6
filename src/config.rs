use thiserror::Error;

/// Environment variable naming the document-store endpoint.
pub const DB_PATH_VAR: &str = "EVENTBOOK_DB_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("EVENTBOOK_DB_PATH environment variable is not defined")]
    MissingDbPath,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
}

impl Config {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Reads the connection string at startup. A missing or blank variable is
    /// a fatal configuration error, surfaced here rather than on first use.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(DB_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Ok(Self { db_path: path }),
            _ => Err(ConfigError::MissingDbPath),
        }
    }
}
