use std::sync::OnceLock;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

mod log_config;
pub use log_config::LogConfig;

pub static CONFIG: OnceLock<HubConfig> = OnceLock::new();

/// Load configuration from `config.toml` (or the file named by `APP_CONFIG`),
/// then the bare `DATABASE_URL` env var, then any `APP_`-prefixed env var,
/// and install it as the process-global config.
///
/// Exits the process on an invalid or incomplete config, matching the
/// fail-fast behavior of a service that cannot do anything useful without it.
pub fn init() {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("APP_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::raw().only(&["database_url"]))
        .merge(Env::prefixed("APP_").global());

    let config = match raw_config.extract::<HubConfig>() {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            std::process::exit(1);
        }
    };
    if config.database_url.is_empty() {
        eprintln!("DATABASE_URL is not set");
        std::process::exit(1);
    }
    crate::config::CONFIG
        .set(config)
        .expect("config should be set");
}

pub fn get() -> &'static HubConfig {
    CONFIG.get().expect("config should be set")
}

/// All options recognized by the core, per spec §6.
#[derive(Deserialize, Clone, Debug)]
pub struct HubConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub database_url: String,
    #[serde(default)]
    pub log: LogConfig,

    /// Emit `ConnectionEvent` frames to all peers on open/close.
    #[serde(default = "default_true")]
    pub broadcast_connection_events: bool,
    /// Method name used for the `ConnectionEvent` frame.
    #[serde(default = "default_connection_event_method")]
    pub connection_event_method: String,
    /// Sweep globally on every open, not just for the opening user.
    #[serde(default = "default_true")]
    pub auto_purge_offline: bool,
    /// Staleness horizon, in seconds.
    #[serde(default = "default_stale_age_secs")]
    pub stale_age_secs: u64,
    /// Capture a free-form `UserAgent` label at open.
    #[serde(default = "default_true")]
    pub track_user_agent: bool,

    /// Admission control: max concurrently in-flight `invoke` calls.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Deadline for a single `invoke` call awaiting its reply, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Deadline for acquiring an admission permit, in milliseconds.
    #[serde(default = "default_semaphore_timeout_ms")]
    pub semaphore_timeout_ms: u64,

    /// Inline-vs-blob threshold, in bytes.
    #[serde(default = "default_max_direct_data_size")]
    pub max_direct_data_size: usize,
    /// Folder blobs live under; also governs `auto_delete_temp_files`.
    #[serde(default = "default_temp_folder")]
    pub temp_folder: String,
    /// Read-once cleanup of blobs inside `temp_folder`.
    #[serde(default = "default_true")]
    pub auto_delete_temp_files: bool,
}

impl HubConfig {
    pub fn stale_age(&self) -> Duration {
        Duration::from_secs(self.stale_age_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn semaphore_timeout(&self) -> Duration {
        Duration::from_millis(self.semaphore_timeout_ms)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_connection_event_method() -> String {
    "ConnectionEvent".into()
}

/// Five minutes, per spec §4.2.
fn default_stale_age_secs() -> u64 {
    5 * 60
}

/// Per spec §4.6.
fn default_max_concurrent_requests() -> usize {
    10
}

/// Five minutes, per spec §4.3.
fn default_request_timeout_secs() -> u64 {
    300
}

/// Five seconds, per spec §4.3.
fn default_semaphore_timeout_ms() -> u64 {
    5_000
}

/// 10 KiB, per spec §4.7.
fn default_max_direct_data_size() -> usize {
    10 * 1024
}

fn default_temp_folder() -> String {
    "signalr-temp".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_convert_from_configured_units() {
        let cfg = HubConfig {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            database_url: "sqlite::memory:".into(),
            log: LogConfig::default(),
            broadcast_connection_events: true,
            connection_event_method: default_connection_event_method(),
            auto_purge_offline: true,
            stale_age_secs: 300,
            track_user_agent: true,
            max_concurrent_requests: 10,
            request_timeout_secs: 300,
            semaphore_timeout_ms: 5_000,
            max_direct_data_size: 10 * 1024,
            temp_folder: default_temp_folder(),
            auto_delete_temp_files: true,
        };
        assert_eq!(cfg.stale_age(), Duration::from_secs(300));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.semaphore_timeout(), Duration::from_millis(5_000));
    }
}
