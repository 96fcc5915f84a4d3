//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use inventory::{AlertConfig, ReservationPolicy, SweeperConfig};
use saga::RetryPolicy;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on the in-memory store
/// - `RESERVATION_DEFAULT_TTL_SECS`, `RESERVATION_MAX_TTL_SECS`,
///   `RESERVATION_EXTENSION_WINDOW_SECS`: hold times (900 / 3600 / 3600)
/// - `SWEEP_INTERVAL_SECS`, `SWEEP_BATCH_SIZE`: expiry sweeper (5 / 100)
/// - `LOCK_TIMEOUT_MS`: per-product lock wait (5000)
/// - `CONSUMER_PARTITIONS`, `CONSUMER_MAX_RETRIES`, `CONSUMER_RETRY_INITIAL_MS`,
///   `CONSUMER_RETRY_MAX_MS`: event consumers (3 / 3 / 1000 / 10000)
/// - `ALERTS_ENABLED`, `LOW_STOCK_CHECK_INTERVAL_SECS`,
///   `ALERT_SUPPRESSION_WINDOW_SECS`: low-stock alerts (true / 1800 / 86400)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub reservation_default_ttl_secs: i64,
    pub reservation_max_ttl_secs: i64,
    pub reservation_extension_window_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
    pub lock_timeout_ms: u64,
    pub consumer_partitions: usize,
    pub consumer_max_retries: usize,
    pub consumer_retry_initial_ms: u64,
    pub consumer_retry_max_ms: u64,
    pub alerts_enabled: bool,
    pub low_stock_check_interval_secs: u64,
    pub alert_suppression_window_secs: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            reservation_default_ttl_secs: parse_var(&lookup, "RESERVATION_DEFAULT_TTL_SECS")
                .unwrap_or(defaults.reservation_default_ttl_secs),
            reservation_max_ttl_secs: parse_var(&lookup, "RESERVATION_MAX_TTL_SECS")
                .unwrap_or(defaults.reservation_max_ttl_secs),
            reservation_extension_window_secs: parse_var(
                &lookup,
                "RESERVATION_EXTENSION_WINDOW_SECS",
            )
            .unwrap_or(defaults.reservation_extension_window_secs),
            sweep_interval_secs: parse_var(&lookup, "SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            sweep_batch_size: parse_var(&lookup, "SWEEP_BATCH_SIZE")
                .unwrap_or(defaults.sweep_batch_size),
            lock_timeout_ms: parse_var(&lookup, "LOCK_TIMEOUT_MS")
                .unwrap_or(defaults.lock_timeout_ms),
            consumer_partitions: parse_var(&lookup, "CONSUMER_PARTITIONS")
                .unwrap_or(defaults.consumer_partitions),
            consumer_max_retries: parse_var(&lookup, "CONSUMER_MAX_RETRIES")
                .unwrap_or(defaults.consumer_max_retries),
            consumer_retry_initial_ms: parse_var(&lookup, "CONSUMER_RETRY_INITIAL_MS")
                .unwrap_or(defaults.consumer_retry_initial_ms),
            consumer_retry_max_ms: parse_var(&lookup, "CONSUMER_RETRY_MAX_MS")
                .unwrap_or(defaults.consumer_retry_max_ms),
            alerts_enabled: parse_var(&lookup, "ALERTS_ENABLED")
                .unwrap_or(defaults.alerts_enabled),
            low_stock_check_interval_secs: parse_var(&lookup, "LOW_STOCK_CHECK_INTERVAL_SECS")
                .unwrap_or(defaults.low_stock_check_interval_secs),
            alert_suppression_window_secs: parse_var(&lookup, "ALERT_SUPPRESSION_WINDOW_SECS")
                .unwrap_or(defaults.alert_suppression_window_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Out-of-range durations fall back to the defaults.
    pub fn reservation_policy(&self) -> ReservationPolicy {
        let defaults = ReservationPolicy::default();
        let seconds = |secs: i64, fallback: chrono::Duration| {
            chrono::Duration::try_seconds(secs).unwrap_or(fallback)
        };
        ReservationPolicy {
            default_ttl: seconds(self.reservation_default_ttl_secs, defaults.default_ttl),
            max_ttl: seconds(self.reservation_max_ttl_secs, defaults.max_ttl),
            extension_window: seconds(
                self.reservation_extension_window_secs,
                defaults.extension_window,
            ),
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            batch_size: self.sweep_batch_size.max(1),
        }
    }

    /// A negative or out-of-range suppression window falls back to the default.
    pub fn alert_config(&self) -> AlertConfig {
        let defaults = AlertConfig::default();
        AlertConfig {
            enabled: self.alerts_enabled,
            suppression_window: chrono::Duration::try_seconds(self.alert_suppression_window_secs)
                .filter(|window| *window >= chrono::Duration::zero())
                .unwrap_or(defaults.suppression_window),
            check_interval: Duration::from_secs(self.low_stock_check_interval_secs.max(1)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.consumer_max_retries,
            Duration::from_millis(self.consumer_retry_initial_ms),
            Duration::from_millis(self.consumer_retry_max_ms),
        )
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            reservation_default_ttl_secs: 900,
            reservation_max_ttl_secs: 3600,
            reservation_extension_window_secs: 3600,
            sweep_interval_secs: 5,
            sweep_batch_size: 100,
            lock_timeout_ms: 5000,
            consumer_partitions: 3,
            consumer_max_retries: 3,
            consumer_retry_initial_ms: 1000,
            consumer_retry_max_ms: 10_000,
            alerts_enabled: true,
            low_stock_check_interval_secs: 1800,
            alert_suppression_window_secs: 86_400,
        }
    }
}
