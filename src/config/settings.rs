use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use thiserror::Error;

use crate::domain::TrustLevelPolicy;

/// Environment prefix for trust settings, e.g. `TRUSTGATE_POLICY_TRUST_LEVEL`.
pub const ENV_PREFIX: &str = "TRUSTGATE_POLICY";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Trust settings owned by the surrounding deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrustSettings {
    #[serde(deserialize_with = "deserialize_trust_level")]
    pub trust_level: TrustLevelPolicy,

    /// When false, prompts are answered negatively without asking
    pub prompt_user: bool,

    /// Sandboxed windows may appear without the warning banner
    pub grant_window_banner: bool,
}

impl Default for TrustSettings {
    fn default() -> Self {
        TrustSettings {
            trust_level: TrustLevelPolicy::default(),
            prompt_user: true,
            grant_window_banner: false,
        }
    }
}

impl TrustSettings {
    /// Load from an optional YAML file, overridden by `TRUSTGATE_POLICY_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self, SettingsError> {
        let mut builder = ConfigBuilder::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(false));
        }

        let settings = builder
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

fn deserialize_trust_level<'de, D>(deserializer: D) -> Result<TrustLevelPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}
