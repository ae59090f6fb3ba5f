use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub redis: Option<RedisConfig>,
    pub database: Option<DatabaseConfig>,
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Lots seeded into the in-memory backend at startup.
    #[serde(default)]
    pub seed: Vec<SeedLot>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedLot {
    pub lot_id: String,
    pub name: String,
    pub location: Option<String>,
    pub slots: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BusinessRules {
    #[serde(default = "default_max_advance_days")]
    pub max_advance_days: u32,
    #[serde(default = "default_min_duration_hours")]
    pub min_duration_hours: u32,
    #[serde(default = "default_max_duration_hours")]
    pub max_duration_hours: u32,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_activation_interval_seconds")]
    pub activation_interval_seconds: u64,
}

fn default_max_advance_days() -> u32 { 30 }
fn default_min_duration_hours() -> u32 { 1 }
fn default_max_duration_hours() -> u32 { 24 }
fn default_poll_interval_seconds() -> u64 { 5 }
fn default_activation_interval_seconds() -> u64 { 60 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            max_advance_days: default_max_advance_days(),
            min_duration_hours: default_min_duration_hours(),
            max_duration_hours: default_max_duration_hours(),
            poll_interval_seconds: default_poll_interval_seconds(),
            activation_interval_seconds: default_activation_interval_seconds(),
        }
    }
}

impl BusinessRules {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn activation_interval(&self) -> Duration {
        Duration::from_secs(self.activation_interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_notification_topic")]
    pub topic: String,
}

fn default_notification_topic() -> String {
    crate::events::NOTIFICATION_TOPIC.to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `PARKR__SERVER__PORT=8080`
            .add_source(config::Environment::with_prefix("PARKR").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
