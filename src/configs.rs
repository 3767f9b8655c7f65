use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub compat: CompatConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeystoreConfig {
    /// Password shared by all test keystores
    #[serde(default = "default_keystore_password")]
    pub password: SecretString,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            password: default_keystore_password(),
        }
    }
}

fn default_keystore_password() -> SecretString {
    SecretString::from("00")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TemplateConfig {
    /// Directory whose templates take precedence over the built-in ones
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_channel_context_file")]
    pub channel_context_file: String,
    /// Base for the keystore paths listed in `images.json`; the destination root if unset
    pub manifest_anchor: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            channel_context_file: default_channel_context_file(),
            manifest_anchor: None,
        }
    }
}

fn default_channel_context_file() -> String {
    "../ChannelContexts/ChannelContext_AllowAll.xml".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CompatConfig {
    /// Write the CRT coefficient and then the prime q into the same `c` slot
    #[serde(default)]
    pub duplicate_crt_slot: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    #[serde(default = "default_forecast_months")]
    pub months: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            months: default_forecast_months(),
        }
    }
}

fn default_forecast_months() -> u32 {
    2
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load `config.toml` from the working directory, falling back to defaults
    pub fn load() -> Result<Self> {
        if Path::new("config.toml").exists() {
            Self::from_file("config.toml")
        } else {
            Ok(Self::default())
        }
    }
}
