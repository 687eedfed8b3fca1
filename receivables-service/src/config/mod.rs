//! Service configuration, loaded from the environment.

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

/// Server section: the shared host/port settings from receivables-core.
pub use receivables_core::config::Config as ServerConfig;

#[derive(Deserialize, Clone, Debug)]
pub struct ReceivablesConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub service_name: String,
    pub log_level: String,
    /// OTLP collector endpoint; tracing stays local when unset.
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl ReceivablesConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("RECEIVABLES_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RECEIVABLES_SERVICE_PORT")
            .unwrap_or_else(|_| "3010".to_string())
            .parse()?;

        let db_url = env::var("RECEIVABLES_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("RECEIVABLES_DATABASE_URL must be set"))?;
        let max_connections = env::var("RECEIVABLES_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("RECEIVABLES_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()?;

        let log_level = env::var("RECEIVABLES_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("RECEIVABLES_OTLP_ENDPOINT").ok();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            service_name: "receivables-service".to_string(),
            log_level,
            otlp_endpoint,
        })
    }
}
