use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::engine::EngineSettings;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: load_engine_settings()?,
        })
    }
}

/// Engine tunables from `INDEX_*` variables, falling back to the calibrated defaults.
fn load_engine_settings() -> Result<EngineSettings, ConfigError> {
    let mut settings = EngineSettings::default();

    settings.completeness_cutoff =
        env_finite("INDEX_COMPLETENESS_CUTOFF", settings.completeness_cutoff)?;
    if !(0.0..=100.0).contains(&settings.completeness_cutoff) {
        return Err(ConfigError::OutOfRange {
            variable: "INDEX_COMPLETENESS_CUTOFF",
            expected: "between 0 and 100",
        });
    }

    settings.trend.up = env_finite("INDEX_TREND_UP", settings.trend.up)?;
    settings.trend.down = env_finite("INDEX_TREND_DOWN", settings.trend.down)?;
    if settings.trend.down > settings.trend.up {
        return Err(ConfigError::OutOfRange {
            variable: "INDEX_TREND_DOWN",
            expected: "not above INDEX_TREND_UP",
        });
    }

    settings.peer_count = env_number("INDEX_PEER_K", settings.peer_count)?;

    settings.max_concurrency = env_number("INDEX_MAX_CONCURRENCY", settings.max_concurrency)?;
    if settings.max_concurrency == 0 {
        return Err(ConfigError::OutOfRange {
            variable: "INDEX_MAX_CONCURRENCY",
            expected: "at least 1",
        });
    }

    settings.max_failed_fraction =
        env_finite("INDEX_MAX_FAILED_FRACTION", settings.max_failed_fraction)?;
    if !(0.0..=1.0).contains(&settings.max_failed_fraction) {
        return Err(ConfigError::OutOfRange {
            variable: "INDEX_MAX_FAILED_FRACTION",
            expected: "between 0 and 1",
        });
    }

    Ok(settings)
}

fn env_finite(variable: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = env_number(variable, default)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            variable,
            expected: "a finite number",
        })
    }
}

fn env_number<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            variable,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
    OutOfRange { variable: &'static str, expected: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be numeric, got '{value}'")
            }
            ConfigError::OutOfRange { variable, expected } => {
                write!(f, "{variable} must be {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for variable in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "INDEX_COMPLETENESS_CUTOFF",
            "INDEX_TREND_UP",
            "INDEX_TREND_DOWN",
            "INDEX_PEER_K",
            "INDEX_MAX_CONCURRENCY",
            "INDEX_MAX_FAILED_FRACTION",
        ] {
            env::remove_var(variable);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.engine, EngineSettings::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn engine_overrides_are_applied() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("INDEX_COMPLETENESS_CUTOFF", "60");
        env::set_var("INDEX_PEER_K", "3");
        env::set_var("INDEX_MAX_FAILED_FRACTION", "0.1");
        let config = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(config.engine.completeness_cutoff, 60.0);
        assert_eq!(config.engine.peer_count, 3);
        assert_eq!(config.engine.max_failed_fraction, 0.1);
        assert_eq!(config.engine.max_concurrency, 4);
    }

    #[test]
    fn malformed_engine_values_name_the_variable() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("INDEX_TREND_UP", "steep");
        let err = AppConfig::load().expect_err("non-numeric threshold");
        reset_env();

        match err {
            ConfigError::InvalidNumber { variable, value } => {
                assert_eq!(variable, "INDEX_TREND_UP");
                assert_eq!(value, "steep");
            }
            other => panic!("expected invalid number, got {other:?}"),
        }
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("INDEX_MAX_CONCURRENCY", "0");
        let err = AppConfig::load().expect_err("zero workers");
        reset_env();

        assert!(err.to_string().contains("INDEX_MAX_CONCURRENCY"));
    }

    #[test]
    fn non_finite_thresholds_are_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        for (variable, value) in [
            ("INDEX_TREND_UP", "NaN"),
            ("INDEX_TREND_DOWN", "-inf"),
            ("INDEX_MAX_FAILED_FRACTION", "NaN"),
        ] {
            reset_env();
            env::set_var(variable, value);
            let err = AppConfig::load().expect_err("non-finite value");
            reset_env();

            match err {
                ConfigError::OutOfRange {
                    variable: reported,
                    expected,
                } => {
                    assert_eq!(reported, variable);
                    assert_eq!(expected, "a finite number");
                }
                other => panic!("expected out of range for {variable}, got {other:?}"),
            }
        }
    }
}
