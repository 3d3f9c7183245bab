//! Service settings read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `SIMWPS_CACHE_DIR` | `~/.simwps/cache` | disk cache location |
//! | `SIMWPS_RUNNER` | `docker` | runner name (`docker` or `local`) |
//! | `SIMWPS_CACHE_MAX_MB` | `512` | cache size limit in MiB |
//! | `SIMWPS_CACHE_TTL_DAYS` | `60` | cache entry lifetime in days |

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_MAX_BYTES, DEFAULT_CACHE_TTL, ENV_CACHE_DIR, ENV_CACHE_MAX_MB,
    ENV_CACHE_TTL_DAYS, ENV_RUNNER,
};
use crate::error::{Error, Result};
use crate::storage::DiskCache;

const DEFAULT_RUNNER: &str = "docker";
const KNOWN_RUNNERS: [&str; 2] = ["docker", "local"];
const MIB: u64 = 1024 * 1024;
const DAY: u64 = 24 * 60 * 60;

/// Resolved service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub runner: String,
    pub cache_max_bytes: u64,
    pub cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: DiskCache::default_path(),
            runner: DEFAULT_RUNNER.to_string(),
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.is_empty()) {
            settings.cache_dir = PathBuf::from(dir);
        }
        if let Some(runner) = lookup(ENV_RUNNER) {
            if !KNOWN_RUNNERS.contains(&runner.as_str()) {
                return Err(Error::InvalidSettings(format!(
                    "{}: unknown runner '{}'",
                    ENV_RUNNER, runner
                )));
            }
            settings.runner = runner;
        }
        if let Some(mb) = lookup(ENV_CACHE_MAX_MB) {
            settings.cache_max_bytes = positive(ENV_CACHE_MAX_MB, &mb)? * MIB;
        }
        if let Some(days) = lookup(ENV_CACHE_TTL_DAYS) {
            settings.cache_ttl = Duration::from_secs(positive(ENV_CACHE_TTL_DAYS, &days)? * DAY);
        }

        Ok(settings)
    }

    /// Opens the disk cache these settings describe.
    pub fn open_cache(&self) -> Result<DiskCache> {
        Ok(DiskCache::with_path(self.cache_dir.clone())?
            .with_ttl(self.cache_ttl)
            .with_max_bytes(self.cache_max_bytes))
    }
}

fn positive(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidSettings(format!(
            "{}: expected a positive integer, got '{}'",
            name, value
        ))),
    }
}
