use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("booking settings rejected: {0}")]
    Booking(String),
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Параметры удержания мест и фоновой сверки.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// Сколько живёт бронь в Redis до подтверждения оплаты.
    pub hold_ttl: Duration,
    /// Период запуска сверки Redis и БД.
    pub sweep_interval: Duration,
    /// Сколько мероприятий сверяются одновременно.
    pub sweep_concurrency: usize,
    /// Бронь моложе этого возраста сверка не трогает, даже если ключа нет:
    /// её могли поставить между проверкой ключа и UPDATE.
    pub fresh_hold_grace: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(360),
            sweep_concurrency: 8,
            fresh_hold_grace: Duration::from_secs(5),
        }
    }
}

impl BookingConfig {
    /// TTL брони обязан быть строго меньше интервала сверки: иначе проход
    /// может застать ещё живую бронь и гоняться с ней.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_ttl.is_zero() {
            return Err(ConfigError::Booking("hold ttl must be positive".to_string()));
        }
        if self.sweep_concurrency == 0 {
            return Err(ConfigError::Booking(
                "sweep concurrency must be at least 1".to_string(),
            ));
        }
        if self.hold_ttl >= self.sweep_interval {
            return Err(ConfigError::Booking(format!(
                "hold ttl ({}s) must be shorter than sweep interval ({}s)",
                self.hold_ttl.as_secs_f64(),
                self.sweep_interval.as_secs_f64()
            )));
        }
        // Запись reserved_at отстаёт от ключа на время похода в БД, поэтому
        // порог свежести должен оставлять запас внутри TTL
        if self.fresh_hold_grace >= self.hold_ttl {
            return Err(ConfigError::Booking(format!(
                "fresh hold grace ({}s) must be shorter than hold ttl ({}s)",
                self.fresh_hold_grace.as_secs_f64(),
                self.hold_ttl.as_secs_f64()
            )));
        }
        Ok(())
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: FromStr>(
    name: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parsed("PORT", "8081", "port number")?,
                environment: env::var("ENVIRONMENT")
                    .unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "event_booker=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20", "number")?,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
            },
            booking: BookingConfig {
                hold_ttl: Duration::from_secs(parsed(
                    "BOOK_HOLD_TTL_SECONDS",
                    "300",
                    "number of seconds",
                )?),
                sweep_interval: Duration::from_secs(parsed(
                    "SWEEP_INTERVAL_SECONDS",
                    "360",
                    "number of seconds",
                )?),
                sweep_concurrency: parsed("SWEEP_CONCURRENCY", "8", "number")?,
                fresh_hold_grace: Duration::from_secs(parsed(
                    "SWEEP_FRESH_HOLD_GRACE_SECONDS",
                    "5",
                    "number of seconds",
                )?),
            },
        };

        config.booking.validate()?;
        Ok(config)
    }
}
