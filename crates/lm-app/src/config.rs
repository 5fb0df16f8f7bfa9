use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::api::ProtocolKind;
use crate::logger::LoggerSettings;
use crate::session::Session;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("could not read .env: {0}")]
    EnvFile(String),
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub base_url: Url,
    pub protocol: ProtocolKind,
    pub api_token: Option<String>,
    pub provider_token: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub log_capacity: usize,
    pub log_rotate_bytes: usize,
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    pub auto_download: bool,
}

impl DashboardConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        accept_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_base = lookup("LORA_API_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("LORA_API_BASE_URL"))?;
        let base_url = Url::parse(raw_base.trim()).map_err(|_| ConfigError::Invalid {
            name: "LORA_API_BASE_URL",
            expected: "an absolute http(s) URL",
            value: raw_base.clone(),
        })?;

        let protocol = ProtocolKind::detect(&base_url);

        let poll_secs: u64 =
            parse_or(&lookup, "LORA_POLL_INTERVAL_SECS", "a number of seconds", 10)?;
        let timeout_secs: u64 =
            parse_or(&lookup, "LORA_REQUEST_TIMEOUT_SECS", "a number of seconds", 120)?;
        let defaults = LoggerSettings::default();

        Ok(Self {
            base_url,
            protocol,
            api_token: lookup("LORA_API_TOKEN"),
            provider_token: lookup("RUNPOD_TOKEN"),
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
            log_capacity: parse_or(
                &lookup,
                "LORA_LOG_CAPACITY",
                "a positive integer",
                defaults.capacity,
            )?,
            log_rotate_bytes: parse_or(
                &lookup,
                "LORA_LOG_ROTATE_BYTES",
                "a byte count",
                defaults.rotate_bytes,
            )?,
            data_dir: lookup("LORA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("lora-dash")),
            download_dir: lookup("LORA_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("downloads")),
            auto_download: parse_or(&lookup, "LORA_AUTO_DOWNLOAD", "true or false", false)?,
        })
    }

    pub fn session(&self) -> Session {
        Session::new(self.api_token.clone(), self.provider_token.clone())
    }

    pub fn logger_settings(&self) -> LoggerSettings {
        LoggerSettings {
            capacity: self.log_capacity.max(1),
            rotate_bytes: self.log_rotate_bytes.max(1),
        }
    }
}

/// A missing `.env` is fine, the environment may carry everything.
/// A malformed one is not.
fn accept_env_file(loaded: Result<PathBuf, dotenvy::Error>) -> Result<(), ConfigError> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ConfigError::EnvFile(e.to_string())),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value: raw,
            })
        }
        _ => Ok(default),
    }
}
