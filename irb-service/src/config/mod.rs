use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct IrbConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageConfig,
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub limits: LimitsConfig,
    pub automation: AutomationConfig,
    pub bootstrap: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_document_bytes: usize,
    pub stats_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Seconds between passes; 0 disables the worker.
    pub interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: Secret<String>,
}

const MIN_PROD_SECRET_LEN: usize = 32;

impl IrbConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let storage_backend: StorageBackend = get_env("STORAGE_BACKEND", Some("postgres"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database_url = match storage_backend {
            StorageBackend::Postgres => get_env("DATABASE_URL", None, is_prod)?,
            StorageBackend::Memory => get_optional_env("DATABASE_URL").unwrap_or_default(),
        };

        let bootstrap = match (
            get_optional_env("BOOTSTRAP_ADMIN_EMAIL"),
            get_optional_env("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email,
                password: Secret::new(password),
            }),
            _ => None,
        };

        let config = IrbConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("irb-service"), is_prod)?,
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            storage: StorageConfig {
                backend: storage_backend,
                database_url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
            },
            redis: get_optional_env("REDIS_URL").map(|url| RedisConfig { url }),
            jwt: JwtConfig {
                secret: Secret::new(get_env(
                    "JWT_SECRET",
                    Some("dev-only-secret-change-me-0123456789abcdef"),
                    is_prod,
                )?),
                expiry_minutes: parse_env("JWT_EXPIRY_MINUTES", "60", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                cookie_secure: parse_env("COOKIE_SECURE", if is_prod { "true" } else { "false" }, false)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10", false)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "300", false)?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "300", false)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    false,
                )?,
            },
            limits: LimitsConfig {
                max_document_bytes: parse_env("MAX_DOCUMENT_BYTES", "20971520", false)?,
                stats_cache_ttl_seconds: parse_env("STATS_CACHE_TTL_SECONDS", "30", false)?,
            },
            automation: AutomationConfig {
                interval_seconds: parse_env("AUTOMATION_INTERVAL_SECONDS", "3600", false)?,
            },
            bootstrap,
        };

        config.validate()?;
        Ok(config)
    }

    /// Development settings with an in-memory store, independent of the
    /// process environment.
    pub fn local() -> Self {
        IrbConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "irb-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: String::new(),
                max_connections: 1,
            },
            redis: None,
            jwt: JwtConfig {
                secret: Secret::new("local-secret-0123456789abcdef0123456789".to_string()),
                expiry_minutes: 60,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                cookie_secure: false,
            },
            rate_limit: RateLimitConfig {
                login_attempts: 10,
                login_window_seconds: 300,
                global_ip_limit: 300,
                global_ip_window_seconds: 60,
            },
            limits: LimitsConfig {
                max_document_bytes: 20 * 1024 * 1024,
                stats_cache_ttl_seconds: 30,
            },
            automation: AutomationConfig { interval_seconds: 0 },
            bootstrap: None,
        }
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if self.rate_limit.login_attempts == 0 || self.rate_limit.global_ip_limit == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Rate limits must allow at least one request"
            )));
        }

        if self.limits.max_document_bytes == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAX_DOCUMENT_BYTES must be positive"
            )));
        }

        if self.is_prod() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.jwt.secret.expose_secret().len() < MIN_PROD_SECRET_LEN {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least {} characters in production",
                    MIN_PROD_SECRET_LEN
                )));
            }

            if self.storage.backend == StorageBackend::Memory {
                tracing::warn!("In-memory storage configured in production; data is lost on restart");
            }

            if !self.security.cookie_secure {
                tracing::warn!("COOKIE_SECURE is false in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}
