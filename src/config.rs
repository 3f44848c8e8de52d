//! Application-level configuration loading: session retention and CORS.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "DASHFLAG_BACK_CONFIG_PATH";
const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long a session without any connection survives.
    pub session_idle_ttl: Duration,
    /// Period of the background sweep expiring timers and evicting idle sessions.
    pub sweep_interval: Duration,
    /// Origin allowed by CORS; any origin when unset.
    pub allowed_origin: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        idle_ttl_secs = app_config.session_idle_ttl.as_secs(),
                        sweep_secs = app_config.sweep_interval.as_secs(),
                        "loaded config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    session_idle_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    allowed_origin: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let positive = |secs: Option<u64>, fallback: u64| {
            Duration::from_secs(secs.filter(|secs| *secs > 0).unwrap_or(fallback))
        };
        Self {
            session_idle_ttl: positive(value.session_idle_ttl_secs, DEFAULT_SESSION_IDLE_TTL_SECS),
            sweep_interval: positive(value.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS),
            allowed_origin: value
                .allowed_origin
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
