use std::time::Duration;

use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::domain::services::projection_scheduler::DEFAULT_MILESTONES;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub embedding_service: EmbeddingServiceSettings,
    pub vector_store: VectorStoreSettings,
    pub handle_store: HandleStoreSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingServiceSettings {
    /// Full URL images are posted to, ex: `http://localhost:5001/get-vector`
    pub endpoint: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
    /// Sent as a bearer token when set
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
}

impl EmbeddingServiceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreSettings {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl VectorStoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandleStoreSettings {
    /// SQLite database file, created if missing
    pub database_path: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    /// Collection sizes triggering a full reprojection
    #[serde(default = "default_milestones")]
    pub milestones: Vec<usize>,
    /// Maximum number of items waiting in the queue. Unbounded if not set.
    #[serde(default)]
    pub max_backlog: Option<usize>,
}

fn default_milestones() -> Vec<usize> {
    DEFAULT_MILESTONES.to_vec()
}

/// Extracts app settings from configuration files and env variables
///
/// `base.yaml` holds the settings shared by every environment, overridden by the file
/// of the running environment: `develop.yaml`, `local.yaml` or `production.yaml`.
/// The environment is read from `APP_ENVIRONMENT` and defaults to `develop`.
///
/// Environment variables with a prefix of APP and '__' as separator come last.
/// For ex: `APP_HANDLE_STORE__DATABASE_PATH=/data/handles.db` sets `Settings.handle_store.database_path`
pub fn get_configuration() -> Result<Settings, ConfigurationError> {
    let base_path = std::env::current_dir().map_err(ConfigurationError::CurrentDirectory)?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "develop".into())
        .try_into()
        .map_err(ConfigurationError::InvalidEnvironment)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize::<Settings>()?)
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to determine the current directory")]
    CurrentDirectory(#[source] std::io::Error),
    #[error("Failed to parse APP_ENVIRONMENT: {0}")]
    InvalidEnvironment(String),
    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),
}

/// The possible runtime environment for our application.
#[derive(Debug, PartialEq, Eq)]
pub enum Environment {
    Develop,
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Develop => "develop",
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "develop" => Ok(Self::Develop),
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `develop`, `local` or `production`.",
                other
            )),
        }
    }
}
