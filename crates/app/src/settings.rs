//! Settings for the service. Configuration is read from `settings.toml`
//! and `FACTURACION__<SECTION>__<KEY>` environment variables.
//!
//! See `settings.example.toml` for the configuration.
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use engine::{EmissionType, IssuanceSettings, SriClientConfig, SriEndpoints};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
    pub database: Database,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sri {
    pub environment: String,
    pub emission_type: String,
    pub numeric_code: Option<u32>,
    pub request_timeout_secs: u64,
    pub authorization_attempts: u32,
    pub authorization_delay_secs: u64,
    pub reception_url: Option<String>,
    pub authorization_url: Option<String>,
}

impl Default for Sri {
    fn default() -> Self {
        Self {
            environment: "test".to_string(),
            emission_type: "normal".to_string(),
            numeric_code: None,
            request_timeout_secs: 30,
            authorization_attempts: 5,
            authorization_delay_secs: 3,
            reception_url: None,
            authorization_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Signer {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_signer_timeout")]
    pub timeout_secs: u64,
}

fn default_signer_timeout() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    pub server: Server,
    #[serde(default)]
    pub sri: Sri,
    pub signer: Signer,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings"))
            .add_source(
                Environment::with_prefix("FACTURACION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

impl Sri {
    pub fn issuance(&self) -> Result<IssuanceSettings, engine::EngineError> {
        Ok(IssuanceSettings {
            environment: engine::Environment::try_from(self.environment.as_str())?,
            emission_type: EmissionType::try_from(self.emission_type.as_str())?,
            numeric_code: self.numeric_code,
        })
    }

    pub fn client_config(&self) -> Result<SriClientConfig, engine::EngineError> {
        let environment = engine::Environment::try_from(self.environment.as_str())?;
        let defaults = SriEndpoints::for_environment(environment);
        Ok(SriClientConfig {
            endpoints: SriEndpoints {
                reception_url: self
                    .reception_url
                    .clone()
                    .unwrap_or(defaults.reception_url),
                authorization_url: self
                    .authorization_url
                    .clone()
                    .unwrap_or(defaults.authorization_url),
            },
            timeout: Duration::from_secs(self.request_timeout_secs),
            authorization_attempts: self.authorization_attempts,
            authorization_delay: Duration::from_secs(self.authorization_delay_secs),
        })
    }
}
