use thiserror::Error;

pub type Result<T> = std::result::Result<T, NwbError>;

#[derive(Error, Debug)]
pub enum NwbError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl NwbError {
    pub fn schema(msg: impl Into<String>) -> Self {
        NwbError::Schema(msg.into())
    }

    pub fn assembly(msg: impl Into<String>) -> Self {
        NwbError::Assembly(msg.into())
    }
}
