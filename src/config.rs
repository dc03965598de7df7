//! Runtime configuration for the ShadowPI engine.
//!
//! Settings are layered figment-style: built-in defaults, then
//! `shadowpi.toml`, then `SHADOWPI_`-prefixed environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Score thresholds driving the enforcement tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warn: i64,
    pub mute: i64,
    pub ban: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn: 30,
            mute: 60,
            ban: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the sled database.
    pub data_dir: String,

    /// Reputation service endpoints.
    pub reputation_base_url: String,
    pub reputation_export_url: String,
    /// Upper bound on any reputation/export HTTP call.
    pub http_timeout_secs: u64,
    /// TTL for cached per-identity reputation verdicts.
    pub reputation_cache_ttl_secs: u64,

    /// Interval between watchlist export syncs.
    pub watchlist_sync_interval_secs: u64,
    /// Whether entries absent from a newer export are removed.
    pub prune_stale_watchlist: bool,

    /// Flood rule: this many events inside the window scores.
    pub flood_window_secs: i64,
    pub flood_event_threshold: usize,
    /// Repeat-content rule: matching hash inside this window scores.
    pub repeat_window_secs: i64,
    /// How many recent content hashes are kept per identity.
    pub repeat_history_len: usize,
    /// Post-join probation during which links score more severely.
    pub probation_secs: i64,

    /// Score decay: points removed per full interval of inactivity.
    pub decay_interval_secs: i64,
    pub decay_step_points: i64,

    pub blacklisted_keywords: Vec<String>,
    pub blacklisted_domains: Vec<String>,

    /// Out-of-band secret unlocking a group's activation gate.
    pub activation_secret: String,
    /// Unlock attempts allowed per admin inside the attempt window.
    pub activation_max_attempts: usize,
    pub activation_attempt_window_secs: u64,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Sweep tuning.
    pub sweep_page_size: usize,
    pub sweep_shadowban_cutoff: i64,
    pub sweep_flag_cutoff: i64,
    pub sweep_silent_days: i64,
    pub sweep_ghost_days: i64,
    pub sweep_join_window_secs: i64,

    /// Bounded retries for transient storage failures.
    pub storage_retry_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: "shadowpi_data".to_string(),
            reputation_base_url: "https://api.cas.chat".to_string(),
            reputation_export_url: "https://api.cas.chat/export.csv".to_string(),
            http_timeout_secs: 10,
            reputation_cache_ttl_secs: 300,
            watchlist_sync_interval_secs: 1800,
            prune_stale_watchlist: false,
            flood_window_secs: 10,
            flood_event_threshold: 5,
            repeat_window_secs: 120,
            repeat_history_len: 8,
            probation_secs: 600,
            decay_interval_secs: 3600,
            decay_step_points: 5,
            blacklisted_keywords: vec![
                "crypto".to_string(),
                "nude".to_string(),
                "porn".to_string(),
                "investment".to_string(),
            ],
            blacklisted_domains: vec![
                "t.me/joinchat".to_string(),
                "bit.ly".to_string(),
                "tinyurl.com".to_string(),
                "grabify".to_string(),
            ],
            activation_secret: String::new(),
            activation_max_attempts: 5,
            activation_attempt_window_secs: 300,
            thresholds: Thresholds::default(),
            sweep_page_size: 128,
            sweep_shadowban_cutoff: 80,
            sweep_flag_cutoff: 60,
            sweep_silent_days: 7,
            sweep_ghost_days: 30,
            sweep_join_window_secs: 600,
            storage_retry_attempts: 3,
        }
    }
}

/// Load settings from defaults, `shadowpi.toml`, and the environment.
pub fn load_settings() -> Result<Settings, figment::Error> {
    let figment = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file("shadowpi.toml"))
        .merge(Env::prefixed("SHADOWPI_"));

    let settings: Settings = figment.extract()?;

    if settings.activation_secret.trim().is_empty() {
        return Err(figment::Error::from(
            "activation_secret must be set".to_string(),
        ));
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tiers() {
        let t = Thresholds::default();
        assert_eq!((t.warn, t.mute, t.ban), (30, 60, 100));
    }

    #[test]
    fn default_settings_are_safe() {
        let settings = Settings::default();
        // Ships locked: no usable secret until the operator sets one.
        assert!(settings.activation_secret.is_empty());
        assert!(!settings.prune_stale_watchlist);
        assert_eq!(settings.flood_event_threshold, 5);
        assert_eq!(settings.flood_window_secs, 10);
    }
}
