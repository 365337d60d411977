//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{CacheError, Result};

/// Upper bound on the dirty-notification delay.
const MAX_DIRTY_DELAY_MS: u64 = 60_000;

/// Full engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub loader: LoaderConfig,
    pub prefetch: PrefetchConfig,
}

/// Ring capacity and reload policy for the windowed variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of ring slots; also the widest allowed active window.
    pub capacity: usize,
    /// How far the centered candidate may drift from the current content start
    /// before the content window is replaced.
    pub reload_slack: usize,
    /// Most records fetched by a single load step.
    pub batch_max: usize,
}

/// Background context behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Delay between a dirty notification and its reload task.
    pub dirty_delay_ms: u64,
    /// Keep at most one pending dirty task per cache.
    pub coalesce_dirty: bool,
    /// Name given to the background thread.
    pub thread_name: String,
}

/// Slideshow prefetch queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Queue capacity and in-flight credit bound.
    pub capacity: usize,
    /// Restart at index 0 after the last record instead of draining.
    pub wrap_around: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            reload_slack: 4,
            batch_max: 32,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dirty_delay_ms: 100,
            coalesce_dirty: true,
            thread_name: "wcache-loader".to_string(),
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            wrap_around: false,
        }
    }
}

impl LoaderConfig {
    #[must_use]
    pub const fn dirty_delay(&self) -> Duration {
        Duration::from_millis(self.dirty_delay_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                tracing::warn!(
                    target: "wcache::config",
                    "HOME not set, falling back to /tmp for config path"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        home_dir.join(".config").join("wcache").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw =
                fs::read_to_string(&path_buf).map_err(|source| CacheError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(CacheError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// Uses FNV-1a so the value is stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // window
        if let Some(raw) = lookup("WCACHE_WINDOW_CAPACITY") {
            self.window.capacity = parse_env("WCACHE_WINDOW_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("WCACHE_WINDOW_RELOAD_SLACK") {
            self.window.reload_slack = parse_env("WCACHE_WINDOW_RELOAD_SLACK", &raw)?;
        }
        if let Some(raw) = lookup("WCACHE_WINDOW_BATCH_MAX") {
            self.window.batch_max = parse_env("WCACHE_WINDOW_BATCH_MAX", &raw)?;
        }

        // loader
        if let Some(raw) = lookup("WCACHE_LOADER_DIRTY_DELAY_MS") {
            self.loader.dirty_delay_ms = parse_env("WCACHE_LOADER_DIRTY_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("WCACHE_LOADER_COALESCE_DIRTY") {
            self.loader.coalesce_dirty = parse_env("WCACHE_LOADER_COALESCE_DIRTY", &raw)?;
        }

        // prefetch
        if let Some(raw) = lookup("WCACHE_PREFETCH_CAPACITY") {
            self.prefetch.capacity = parse_env("WCACHE_PREFETCH_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("WCACHE_PREFETCH_WRAP_AROUND") {
            self.prefetch.wrap_around = parse_env("WCACHE_PREFETCH_WRAP_AROUND", &raw)?;
        }

        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.window.capacity == 0 {
            return Err(CacheError::InvalidConfig {
                details: "window.capacity must be >= 1".to_string(),
            });
        }
        if self.window.batch_max == 0 {
            return Err(CacheError::InvalidConfig {
                details: "window.batch_max must be >= 1".to_string(),
            });
        }
        if self.window.reload_slack >= self.window.capacity {
            return Err(CacheError::InvalidConfig {
                details: format!(
                    "window.reload_slack ({}) must be < window.capacity ({})",
                    self.window.reload_slack, self.window.capacity
                ),
            });
        }
        if self.loader.dirty_delay_ms > MAX_DIRTY_DELAY_MS {
            return Err(CacheError::InvalidConfig {
                details: format!(
                    "loader.dirty_delay_ms ({}) must be <= {MAX_DIRTY_DELAY_MS}",
                    self.loader.dirty_delay_ms
                ),
            });
        }
        if self.loader.thread_name.trim().is_empty() {
            return Err(CacheError::InvalidConfig {
                details: "loader.thread_name must not be empty".to_string(),
            });
        }
        if self.prefetch.capacity == 0 {
            return Err(CacheError::InvalidConfig {
                details: "prefetch.capacity must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| CacheError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{CacheError, Config};
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::Path;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.prefetch.capacity, 3);
        assert_eq!(cfg.loader.dirty_delay_ms, 100);
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.window.capacity = 0;
        let err = cfg.validate().expect_err("expected capacity error");
        assert!(err.to_string().contains("window.capacity"));
    }

    #[test]
    fn slack_must_be_below_capacity() {
        let mut cfg = Config::default();
        cfg.window.capacity = 8;
        cfg.window.reload_slack = 8;
        let err = cfg.validate().expect_err("expected slack error");
        match err {
            CacheError::InvalidConfig { details } => assert!(details.contains("reload_slack")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_batch_and_prefetch_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.window.batch_max = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.prefetch.capacity = 0;
        let err = cfg.validate().expect_err("expected prefetch error");
        assert!(err.to_string().contains("prefetch.capacity"));
    }

    #[test]
    fn oversized_dirty_delay_rejected() {
        let mut cfg = Config::default();
        cfg.loader.dirty_delay_ms = 120_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("WCACHE_WINDOW_CAPACITY", "8"),
            ("WCACHE_WINDOW_BATCH_MAX", "16"),
            ("WCACHE_WINDOW_RELOAD_SLACK", "2"),
            ("WCACHE_LOADER_COALESCE_DIRTY", "false"),
            ("WCACHE_PREFETCH_WRAP_AROUND", "true"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");

        assert_eq!(cfg.window.capacity, 8);
        assert_eq!(cfg.window.batch_max, 16);
        assert_eq!(cfg.window.reload_slack, 2);
        assert!(!cfg.loader.coalesce_dirty);
        assert!(cfg.prefetch.wrap_around);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("WCACHE_PREFETCH_CAPACITY", "three")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            CacheError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("WCACHE_PREFETCH_CAPACITY"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/wcache/config.toml")));
        assert!(matches!(result, Err(CacheError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(file, "[window]\ncapacity = 16\n\n[prefetch]\ncapacity = 5").expect("write");
        drop(file);

        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.window.capacity, 16);
        assert_eq!(cfg.window.batch_max, 32);
        assert_eq!(cfg.prefetch.capacity, 5);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[window\ncapacity = ").expect("write");
        let err = Config::load(Some(&path)).expect_err("malformed toml");
        assert_eq!(err.code(), "WC-1003");
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        let h1 = cfg.stable_hash().expect("hash");
        assert_eq!(h1, cfg.stable_hash().expect("hash"));
        let mut modified = Config::default();
        modified.window.capacity += 1;
        assert_ne!(h1, modified.stable_hash().expect("hash"));
    }
}
