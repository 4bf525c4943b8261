use std::path::PathBuf;

use docschema_core::{DataSourceError, EncodeError, SchemaError};
use thiserror::Error;

use crate::store::AnyStoreError;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("No schema file. Pass --schemas or set `schemas` in ~/.config/docschema/config.toml")]
    NoSchemas,

    #[error("No schema registered for collection {0:?}")]
    UnknownCollection(String),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Store error: {0}")]
    Store(#[from] AnyStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

impl From<DataSourceError<AnyStoreError>> for ToolError {
    fn from(error: DataSourceError<AnyStoreError>) -> Self {
        match error {
            DataSourceError::Store(e) => ToolError::Store(e),
            DataSourceError::Encode(e) => ToolError::Encode(e),
        }
    }
}
