use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "LIBRIS_ENV";
const CONFIG_DIR_ENV: &str = "LIBRIS_CONFIG_DIR";
const ENV_PREFIX: &str = "LIBRIS";

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(Self::Local),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(anyhow!(
                "unsupported environment '{}'; expected local/staging/production",
                other
            )),
        }
    }
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub circulation: CirculationSettings,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, environment overlay
    /// and `LIBRIS__*` variables.
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir()
                .map(|cwd| cwd.join("config"))
                .context("unable to resolve current directory")?,
        };

        Self::load_from(&config_dir, &environment)
    }

    /// Load from an explicit config directory and environment name.
    pub fn load_from(config_dir: &std::path::Path, environment: &str) -> anyhow::Result<Self> {
        let parsed_environment: Environment = environment.parse()?;

        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{}.toml", environment));

        let cfg = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;

        settings.environment = parsed_environment;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "TelemetrySettings::default_log_filter")]
    pub log_filter: String,
}

impl TelemetrySettings {
    fn default_log_filter() -> String {
        "info,tower_http=debug".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: Self::default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Borrowing rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CirculationSettings {
    #[serde(default = "CirculationSettings::default_loan_days")]
    pub loan_days: u32,
    #[serde(default = "CirculationSettings::default_max_loan_days")]
    pub max_loan_days: u32,
    #[serde(default = "CirculationSettings::default_max_active_borrows")]
    pub max_active_borrows: usize,
    #[serde(default = "CirculationSettings::default_overdue_scan_interval_secs")]
    pub overdue_scan_interval_secs: u64,
}

impl CirculationSettings {
    fn default_loan_days() -> u32 {
        14
    }

    fn default_max_loan_days() -> u32 {
        60
    }

    fn default_max_active_borrows() -> usize {
        5
    }

    fn default_overdue_scan_interval_secs() -> u64 {
        3600
    }
}

impl Default for CirculationSettings {
    fn default() -> Self {
        Self {
            loan_days: Self::default_loan_days(),
            max_loan_days: Self::default_max_loan_days(),
            max_active_borrows: Self::default_max_active_borrows(),
            overdue_scan_interval_secs: Self::default_overdue_scan_interval_secs(),
        }
    }
}

/// Throttle rates in `<count>/<unit>` form, e.g. `100/hour`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    #[serde(default = "ThrottleSettings::default_enabled")]
    pub enabled: bool,
    #[serde(default = "ThrottleSettings::default_anon")]
    pub anon: String,
    #[serde(default = "ThrottleSettings::default_member")]
    pub member: String,
    #[serde(default = "ThrottleSettings::default_premium")]
    pub premium: String,
    #[serde(default = "ThrottleSettings::default_borrow")]
    pub borrow: String,
    #[serde(default = "ThrottleSettings::default_search")]
    pub search: String,
    #[serde(default = "ThrottleSettings::default_monitored")]
    pub monitored: String,
    #[serde(default = "ThrottleSettings::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl ThrottleSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_anon() -> String {
        "50/hour".to_string()
    }

    fn default_member() -> String {
        "100/hour".to_string()
    }

    fn default_premium() -> String {
        "1000/hour".to_string()
    }

    fn default_borrow() -> String {
        "5/day".to_string()
    }

    fn default_search() -> String {
        "30/minute".to_string()
    }

    fn default_monitored() -> String {
        "20/minute".to_string()
    }

    fn default_sweep_interval_secs() -> u64 {
        300
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            anon: Self::default_anon(),
            member: Self::default_member(),
            premium: Self::default_premium(),
            borrow: Self::default_borrow(),
            search: Self::default_search(),
            monitored: Self::default_monitored(),
            sweep_interval_secs: Self::default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_enabled")]
    pub enabled: bool,
    #[serde(default = "CacheSettings::default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "CacheSettings::default_statistics_ttl_secs")]
    pub statistics_ttl_secs: u64,
}

impl CacheSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_ttl_secs() -> u64 {
        300
    }

    fn default_statistics_ttl_secs() -> u64 {
        60
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            default_ttl_secs: Self::default_ttl_secs(),
            statistics_ttl_secs: Self::default_statistics_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_environment_is_local() {
        let settings = Settings::default();
        assert_eq!(settings.environment, Environment::Local);
    }

    #[test]
    fn default_circulation_rules() {
        let settings = Settings::default();
        assert_eq!(settings.circulation.loan_days, 14);
        assert_eq!(settings.circulation.max_active_borrows, 5);
    }

    #[test]
    fn default_throttle_rates() {
        let throttle = ThrottleSettings::default();
        assert_eq!(throttle.borrow, "5/day");
        assert_eq!(throttle.member, "100/hour");
        assert_eq!(throttle.premium, "1000/hour");
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert!("qa".parse::<Environment>().is_err());
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
    }

    #[test]
    fn missing_config_dir_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("libris-settings-missing");
        let settings = Settings::load_from(&dir, "staging").unwrap();
        assert_eq!(settings.environment, Environment::Staging);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.cache.default_ttl_secs, 300);
    }
}
