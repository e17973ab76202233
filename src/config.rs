use crate::domain::routes::BackendRoute;
use crate::proxy::types::{ProxyConfig, RequestSizeLimit};
use crate::recorder::types::{BufferSize, RingBufferConfig, SlotSize};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub forwarder: ForwarderSettings,
    pub recorder: RecorderSettings,
    pub logging: LoggingSettings,
    /// Routes seeded into the route store at startup
    #[serde(default)]
    pub routes: Vec<BackendRoute>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub max_connections: u32,
}

/// Which exchange and route store implementation to run against
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForwarderSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub max_request_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecorderSettings {
    pub buffer_size: usize,
    pub slot_size: usize,
    pub store_authorization_headers: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.port", 8080)?
            .set_default("application.environment", environment.clone())?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.username", "postgres")?
            .set_default("database.password", "password")?
            .set_default("database.database_name", "tapwire")?
            .set_default("database.max_connections", 10)?
            .set_default("storage.backend", "memory")?
            .set_default("forwarder.connect_timeout_ms", 10_000)?
            .set_default("forwarder.read_timeout_ms", 120_000)?
            .set_default("forwarder.drain_timeout_ms", 5_000)?
            .set_default("forwarder.max_request_size", 10 * 1024 * 1024)?
            .set_default("recorder.buffer_size", 64 * 1024 * 1024)?
            .set_default("recorder.slot_size", 256 * 1024)?
            .set_default("recorder.store_authorization_headers", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("TAPWIRE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.username,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database_name
        )
    }

    /// Translate the flat settings into the proxy's runtime configuration
    pub fn proxy_config(&self) -> Result<ProxyConfig, ConfigError> {
        let max_request_size = RequestSizeLimit::try_new(self.forwarder.max_request_size)
            .map_err(|e| ConfigError::Message(format!("forwarder.max_request_size: {e}")))?;
        let buffer_size = BufferSize::try_new(self.recorder.buffer_size)
            .map_err(|e| ConfigError::Message(format!("recorder.buffer_size: {e}")))?;
        let slot_size = SlotSize::try_new(self.recorder.slot_size)
            .map_err(|e| ConfigError::Message(format!("recorder.slot_size: {e}")))?;

        Ok(ProxyConfig {
            max_request_size,
            connect_timeout: Duration::from_millis(self.forwarder.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.forwarder.read_timeout_ms),
            drain_timeout: Duration::from_millis(self.forwarder.drain_timeout_ms),
            store_authorization_headers: self.recorder.store_authorization_headers,
            ring_buffer: RingBufferConfig {
                buffer_size,
                slot_size,
            },
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new().expect("Failed to load configuration")
    }
}
