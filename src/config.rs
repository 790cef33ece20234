use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ProxyError;

/// Runtime settings for the proxy core.
///
/// Loaded from a TOML file, overridden by `BISONGATE_*` environment
/// variables, with standalone defaults. Precedence: env > file > defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// First/next batch size applied when the client sends none.
    pub default_batch_size: u32,
    /// Hard cap on any requested batch size.
    pub max_batch_size: u32,
    /// Cursors idle longer than this are reclaimed by the sweeper.
    pub cursor_idle_secs: u64,
    /// Sweep cadence for the idle-cursor reclaimer.
    pub sweep_interval_secs: u64,
    /// Offer eligible filter clauses to the backend natively.
    pub enable_filter_pushdown: bool,
    /// Offer single-key sorts to the backend natively.
    pub enable_sort_pushdown: bool,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 101,
            max_batch_size: 16384,
            cursor_idle_secs: 600,
            sweep_interval_secs: 60,
            enable_filter_pushdown: true,
            enable_sort_pushdown: false,
            log_dir: None,
            log_level: None,
        }
    }
}

impl ProxyConfig {
    /// Loads settings from a TOML file and applies env overrides.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ProxyError> {
        let s = std::fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&s)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Defaults plus env overrides, no file involved.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Applies `BISONGATE_*` environment variables over the current values.
    pub fn apply_env(&mut self) {
        if let Ok(s) = std::env::var("BISONGATE_DEFAULT_BATCH_SIZE")
            && let Ok(n) = s.parse::<u32>()
        {
            self.default_batch_size = n;
        }
        if let Ok(s) = std::env::var("BISONGATE_MAX_BATCH_SIZE")
            && let Ok(n) = s.parse::<u32>()
        {
            self.max_batch_size = n;
        }
        if let Ok(s) = std::env::var("BISONGATE_CURSOR_IDLE_SECS")
            && let Ok(n) = s.parse::<u64>()
        {
            self.cursor_idle_secs = n;
        }
        if let Ok(s) = std::env::var("BISONGATE_SWEEP_INTERVAL_SECS")
            && let Ok(n) = s.parse::<u64>()
        {
            self.sweep_interval_secs = n;
        }
        if let Ok(s) = std::env::var("BISONGATE_FILTER_PUSHDOWN") {
            self.enable_filter_pushdown =
                matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(s) = std::env::var("BISONGATE_SORT_PUSHDOWN") {
            self.enable_sort_pushdown =
                matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(s) = std::env::var("BISONGATE_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(s));
        }
        if let Ok(s) = std::env::var("BISONGATE_LOG_LEVEL") {
            self.log_level = Some(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.default_batch_size, 101);
        assert_eq!(cfg.cursor_idle_secs, 600);
        assert!(cfg.enable_filter_pushdown);
        assert!(!cfg.enable_sort_pushdown);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ProxyConfig = toml::from_str("default_batch_size = 5\n").unwrap();
        assert_eq!(cfg.default_batch_size, 5);
        assert_eq!(cfg.max_batch_size, 16384);
    }
}
