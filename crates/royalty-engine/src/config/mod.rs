use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::calculation::tiers::RoundingMode;

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
    pub calculation: CalculationConfig,
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
        let ansi = env_flag("APP_LOG_ANSI", environment == AppEnvironment::Development);
        let include_targets = env_flag("APP_LOG_TARGETS", false);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi,
                include_targets,
            },
            calculation: CalculationConfig::from_env()?,
        })
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

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
    pub include_targets: bool,
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Organization-level choice of which rule path computes fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationApproach {
    Manual,
    ErpMapping,
    Hybrid,
}

impl CalculationApproach {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "erp" | "erp_mapping" | "erp-mapping" => Some(Self::ErpMapping),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// What to do with a rule whose blueprint is missing confirmed mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteBlueprintPolicy {
    FallbackToManual,
    Halt,
}

impl IncompleteBlueprintPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fallback" | "manual" | "fallback_to_manual" => Some(Self::FallbackToManual),
            "halt" | "fail" => Some(Self::Halt),
            _ => None,
        }
    }
}

/// Knobs for the calculation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationConfig {
    pub approach: CalculationApproach,
    pub rounding: RoundingMode,
    pub scale: u32,
    pub incomplete_blueprint: IncompleteBlueprintPolicy,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            approach: CalculationApproach::Manual,
            rounding: RoundingMode::HalfUp,
            scale: 2,
            incomplete_blueprint: IncompleteBlueprintPolicy::FallbackToManual,
        }
    }
}

impl CalculationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let approach = match env::var("CALC_APPROACH") {
            Ok(raw) => CalculationApproach::parse(&raw)
                .ok_or(ConfigError::InvalidSetting { key: "CALC_APPROACH", value: raw })?,
            Err(_) => defaults.approach,
        };

        let rounding = match env::var("CALC_ROUNDING") {
            Ok(raw) => RoundingMode::parse(&raw)
                .ok_or(ConfigError::InvalidSetting { key: "CALC_ROUNDING", value: raw })?,
            Err(_) => defaults.rounding,
        };

        let scale = match env::var("CALC_SCALE") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|scale| *scale <= 10)
                .ok_or(ConfigError::InvalidSetting { key: "CALC_SCALE", value: raw })?,
            Err(_) => defaults.scale,
        };

        let incomplete_blueprint = match env::var("CALC_INCOMPLETE_BLUEPRINT") {
            Ok(raw) => IncompleteBlueprintPolicy::parse(&raw).ok_or(
                ConfigError::InvalidSetting {
                    key: "CALC_INCOMPLETE_BLUEPRINT",
                    value: raw,
                },
            )?,
            Err(_) => defaults.incomplete_blueprint,
        };

        Ok(Self {
            approach,
            rounding,
            scale,
            incomplete_blueprint,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidSetting { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSetting { key, value } => {
                write!(f, "{key} has unsupported value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidSetting { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
