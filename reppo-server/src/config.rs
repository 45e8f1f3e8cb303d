//! Configuration management for the orchestrator

use crate::{Error, Result, StartupPolicy, TransportMode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Path of the JSON worker manifest
    pub manifest_path: PathBuf,
    pub handshake_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub startup_policy: StartupPolicy,
}

/// Outward MCP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub host: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    /// When set, a daily rolling log file is written here as well
    pub log_directory: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("manifest.json"),
            handshake_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
            shutdown_grace_ms: 2_000,
            startup_policy: StartupPolicy::FailFast,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_directory: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> Result<Self> {
        Self::build(None)
    }

    /// Load configuration with an explicit file layered over the defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("REPPO")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("orchestrator.manifest_path", "manifest.json")?
            .set_default("orchestrator.handshake_timeout_ms", 10_000)?
            .set_default("orchestrator.call_timeout_ms", 30_000)?
            .set_default("orchestrator.shutdown_grace_ms", 2_000)?
            .set_default("orchestrator.startup_policy", "fail_fast")?
            .set_default("transport.mode", "stdio")?
            .set_default("transport.host", "127.0.0.1")?
            .set_default("transport.port", 8000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reject values that would make the orchestrator unusable
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.handshake_timeout_ms == 0 {
            return Err(Error::Configuration(
                "orchestrator.handshake_timeout_ms must be positive".to_string(),
            ));
        }
        if self.orchestrator.call_timeout_ms == 0 {
            return Err(Error::Configuration(
                "orchestrator.call_timeout_ms must be positive".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(Error::Configuration(format!(
                "Unknown logging format '{}', expected 'pretty' or 'json'",
                self.logging.format
            )));
        }
        if self.transport.mode == TransportMode::Http {
            if self.transport.port == 0 {
                return Err(Error::Configuration(
                    "transport.port must be set for the http transport".to_string(),
                ));
            }
            self.http_addr()?;
        }
        Ok(())
    }

    /// Socket address for the HTTP transport
    pub fn http_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.transport.host, self.transport.port)
            .parse()
            .map_err(|e| {
                Error::Configuration(format!(
                    "Invalid HTTP address {}:{}: {}",
                    self.transport.host, self.transport.port, e
                ))
            })
    }
}
