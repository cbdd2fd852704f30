// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Failed to load reference data for region {region}: {message}")]
    RegionData {
        region: String,
        message: String,
    },
    // A newer template load started while this one was waiting on reference data.
    #[error("Template load superseded by a newer load")]
    LoadSuperseded,
    #[error("Region {0} is not present in the reference data fixture")]
    UnknownRegion(String),
    #[error("Identity provider error: {0}")]
    Directory(String),
    #[error("User {0} not found")]
    UserNotFound(String),
    #[error("Unknown role '{0}' (expected guest, user or admin)")]
    UnknownRole(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerializationError(#[from] serde_json::Error),
}

pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;
