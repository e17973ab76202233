use crate::recorder::store::ExchangeStoreError;
use crate::routing::store::RouteStoreError;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Route store error: {0}")]
    RouteStore(#[from] RouteStoreError),

    #[error("Exchange store error: {0}")]
    ExchangeStore(#[from] ExchangeStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Application error: {message}")]
    Application { message: String },
}

impl Error {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
