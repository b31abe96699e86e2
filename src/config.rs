use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "Carepath";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default look-ahead window for recurring tasks.
pub const DEFAULT_HORIZON_DAYS: u32 = 90;

/// Longest accepted look-ahead window (ten years).
pub const MAX_HORIZON_DAYS: u32 = 3650;

/// Default cap on instances written per task definition.
pub const DEFAULT_MAX_OCCURRENCES: usize = 10;

/// Idle seconds before a typing indicator is cleared.
pub const DEFAULT_TYPING_EXPIRY_SECS: u64 = 3;

/// Get the application data directory
/// ~/Carepath/ on all platforms. Falls back to the working directory when
/// no home directory can be determined (containers, service accounts).
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default SQLite database location.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("carepath.db")
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "carepath_lib=info,carepath=info,tower_http=warn"
}

/// Recurrence scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    pub horizon_days: u32,
    /// Upper bound on instances per definition, to bound write volume.
    pub max_occurrences_per_task: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            max_occurrences_per_task: DEFAULT_MAX_OCCURRENCES,
        }
    }
}

/// Realtime fan-out knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Capacity of the change-event broadcast channel.
    pub event_buffer: usize,
    /// Capacity of each subscriber's delivery channel.
    pub subscriber_buffer: usize,
    pub typing_expiry_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            subscriber_buffer: 64,
            typing_expiry_secs: DEFAULT_TYPING_EXPIRY_SECS,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub scheduling: SchedulingConfig,
    pub realtime: RealtimeConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            scheduling: SchedulingConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with `CAREPATH_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable lookup (tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("CAREPATH_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(addr) = parse_var(&lookup, "CAREPATH_BIND") {
            config.bind_addr = addr;
        }
        if let Some(days) = parse_var::<_, u32>(&lookup, "CAREPATH_HORIZON_DAYS") {
            if days > MAX_HORIZON_DAYS {
                tracing::warn!(
                    requested = days,
                    max = MAX_HORIZON_DAYS,
                    "CAREPATH_HORIZON_DAYS too large, clamping"
                );
            }
            config.scheduling.horizon_days = days.min(MAX_HORIZON_DAYS);
        }
        if let Some(max) = parse_var(&lookup, "CAREPATH_MAX_OCCURRENCES") {
            config.scheduling.max_occurrences_per_task = max;
        }
        if let Some(secs) = parse_var(&lookup, "CAREPATH_TYPING_EXPIRY_SECS") {
            config.realtime.typing_expiry_secs = secs;
        }

        config
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Ignoring malformed config value");
            None
        }
    }
}
