//! Config & entry point (C0, ambient): loads `signet.toml`, applies
//! `SIGNET_*` environment overrides, and validates before anything binds
//! a socket or opens the database.
//!
//! Parsing shape grounded on the `toml`-crate usage the pack favors for
//! on-disk manifests (e.g. the mini-app-manifest loaders), generalized
//! from an archive-embedded TOML to a daemon config file plus env layer.

use crate::atoms::error::{SignetError, SignetResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

fn default_http_bind() -> SocketAddr {
    "127.0.0.1:4869".parse().unwrap()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("signet.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadManSwitchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timeframe_sec")]
    pub timeframe_sec: i64,
}

fn default_timeframe_sec() -> i64 {
    7 * 24 * 60 * 60
}

impl Default for DeadManSwitchConfig {
    fn default() -> Self {
        DeadManSwitchConfig { enabled: false, timeframe_sec: default_timeframe_sec() }
    }
}

/// An unencrypted bootstrap key loaded straight from config. Discouraged;
/// every use is logged loudly at startup (§4.13).
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapKey {
    pub name: String,
    pub nsec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub relays: Vec<String>,
    #[serde(default)]
    pub admin_npub: Option<String>,
    #[serde(default)]
    pub admin_relays: Vec<String>,
    #[serde(default = "default_http_bind")]
    pub http_bind: SocketAddr,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub dead_man_switch: DeadManSwitchConfig,
    #[serde(default)]
    pub bootstrap_keys: Vec<BootstrapKey>,
}

impl Config {
    /// Reads `path`, applies `SIGNET_*` overrides, and validates. Errors
    /// here are fatal: the caller should log and exit before opening the
    /// database or binding the HTTP listener.
    pub fn load(path: &std::path::Path) -> SignetResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SignetError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Config =
            toml::from_str(&raw).map_err(|e| SignetError::Config(format!("invalid config: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIGNET_RELAYS") {
            self.relays = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("SIGNET_ADMIN_NPUB") {
            self.admin_npub = Some(v);
        }
        if let Ok(v) = std::env::var("SIGNET_ADMIN_RELAYS") {
            self.admin_relays = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("SIGNET_HTTP_BIND") {
            if let Ok(addr) = v.parse() {
                self.http_bind = addr;
            }
        }
        if let Ok(v) = std::env::var("SIGNET_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
    }

    fn validate(&self) -> SignetResult<()> {
        if self.relays.is_empty() {
            return Err(SignetError::Config("relays must not be empty".to_string()));
        }
        for relay in &self.relays {
            if !(relay.starts_with("ws://") || relay.starts_with("wss://")) {
                return Err(SignetError::Config(format!("relay url must be ws:// or wss://: {relay}")));
            }
        }
        if self.dead_man_switch.timeframe_sec <= 0 {
            return Err(SignetError::Config("dead_man_switch.timeframe_sec must be positive".to_string()));
        }
        if !self.bootstrap_keys.is_empty() {
            log::warn!(
                "{} unencrypted bootstrap key(s) configured; this discloses secret key material on disk",
                self.bootstrap_keys.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_temp("relays = [\"wss://relay.example\"]\n");
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.relays, vec!["wss://relay.example"]);
        assert_eq!(config.http_bind, default_http_bind());
        assert!(!config.dead_man_switch.enabled);
    }

    #[test]
    fn rejects_empty_relay_list() {
        let file = write_temp("relays = []\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn rejects_non_websocket_relay_url() {
        let file = write_temp("relays = [\"https://relay.example\"]\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn env_override_replaces_relay_list() {
        let file = write_temp("relays = [\"wss://relay.example\"]\n");
        std::env::set_var("SIGNET_RELAYS", "wss://override.example");
        let config = Config::load(file.path()).unwrap();
        std::env::remove_var("SIGNET_RELAYS");
        assert_eq!(config.relays, vec!["wss://override.example"]);
    }
}
