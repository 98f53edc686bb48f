//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by
//! environment variables with the `SECAGG` prefix, e.g.
//! `SECAGG_SESSION__PARTICIPANTS=3`. Example configuration files live in
//! the `configs/` directory located in the repository root.

use std::{fmt, path::Path};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::coordinator::SessionParams;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The coordinator settings.
///
/// Each section in the configuration file corresponds to the identically
/// named settings field.
pub struct CoordinatorSettings {
    #[validate]
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl CoordinatorSettings {
    /// Loads and validates the coordinator settings via a configuration
    /// file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation
    /// failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Self = load(path)?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Deserialize)]
/// The client settings. The private vector is not part of the settings
/// file; it is passed on the command line.
pub struct ClientSettings {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl ClientSettings {
    /// Loads the client settings via a configuration file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Ok(load(path)?)
    }
}

fn load<T>(path: impl AsRef<Path>) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    let mut config = Config::new();
    config.merge(config::File::from(path.as_ref()))?;
    config.merge(Environment::with_prefix("secagg").separator("__"))?;
    config.try_into()
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_session"))]
/// The parameters every session of this coordinator process runs with.
pub struct SessionSettings {
    /// The exact number of participants of a session. The coordinator
    /// starts aggregating once this many clients have joined, and turns
    /// away any further connection.
    #[serde(default = "default_participants")]
    pub participants: usize,

    /// The modular base for all value and mask arithmetic. Client vector
    /// elements must be below this base.
    #[serde(default = "default_base")]
    pub base: u64,

    /// The length of every client vector.
    #[serde(default = "default_vector_length")]
    pub vector_length: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            base: default_base(),
            vector_length: default_vector_length(),
        }
    }
}

impl SessionSettings {
    /// Checks the session parameters.
    fn validate_session(&self) -> Result<(), ValidationError> {
        // the validate attribute only accepts literals, therefore we check
        // the invariants here: masks only cancel between at least two
        // participants, and modular arithmetic needs a base of at least 2
        if self.participants >= 2 && self.base >= 2 && self.vector_length >= 1 {
            Ok(())
        } else {
            Err(ValidationError::new("invalid session parameters"))
        }
    }
}

/// A wrapper for validate derive.
fn validate_session(s: &SessionSettings) -> Result<(), ValidationError> {
    s.validate_session()
}

impl From<SessionSettings> for SessionParams {
    fn from(settings: SessionSettings) -> Self {
        Self {
            threshold: settings.participants,
            base: settings.base,
            vector_length: settings.vector_length,
        }
    }
}

fn default_participants() -> usize {
    2
}

fn default_base() -> u64 {
    1_000_000
}

fn default_vector_length() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
/// Where the coordinator listens and where clients connect.
pub struct NetworkSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl NetworkSettings {
    /// The `host:port` pair to bind or connect to.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8001
}

#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_env_filter")]
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_env_filter(),
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_new("info").unwrap()
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
