// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::Result;

static CONFIG: OnceCell<RwLock<Arc<Config>>> = OnceCell::new();

/// Default concurrency and dedup knobs for the scheduler (C6).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Jobs {
    /// Default value of `--jobs` when not given on the command line.
    pub default_count: usize,

    /// Force buffered (tee'd) stdio even with a single job.
    pub force_buffered_io: bool,
}

impl Default for Jobs {
    fn default() -> Self {
        Self {
            default_count: 1,
            force_buffered_io: false,
        }
    }
}

/// Reachability and timeout knobs for the external archive collaborator.
#[derive(Clone, Default, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Archive {
    /// Base URL of the remote archive, empty if none is configured.
    pub url: String,

    /// Seconds to wait for a download/upload before giving up.
    pub timeout_seconds: u64,
}

/// Namespace-sandbox knobs consumed by the script harness (C4).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sandbox {
    /// Path to the `namespace-sandbox` helper binary.
    pub binary: String,

    /// Extra host paths always bind-mounted into every sandboxed step.
    pub default_mounts: Vec<String>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self {
            binary: "namespace-sandbox".to_string(),
            default_mounts: Vec::new(),
        }
    }
}

/// Default logging verbosity and target.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// One of `quiet`, `normal`, `info`, `debug`, `trace`.
    pub verbosity: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            verbosity: "normal".to_string(),
        }
    }
}

/// Layered configuration for the build core.
///
/// Loaded from `/etc/bob.toml`, then `$XDG_CONFIG_HOME/bob/bob.toml`, then
/// the project-local `bob.toml` in the current directory, each overriding
/// the last, and finally from `BOB_<SECTION>_<NAME>` environment variables.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub jobs: Jobs,
    pub archive: Archive,
    pub sandbox: Sandbox,
    pub logging: Logging,
}

impl Config {
    /// Get the current loaded config, loading it if needed.
    pub fn current() -> Result<Arc<Self>> {
        get_config()
    }

    /// Load the config from disk, even if it's already been loaded before.
    pub fn load() -> Result<Self> {
        load_config()
    }

    /// Make this config the current global one.
    pub fn make_current(self) -> Result<Arc<Self>> {
        let config = CONFIG.get_or_try_init(|| -> Result<RwLock<Arc<Config>>> {
            Ok(RwLock::new(Arc::new(self.clone())))
        })?;

        let mut lock = config
            .write()
            .map_err(|err| crate::Error::LockPoisonedWrite(err.to_string()))?;
        *Arc::make_mut(&mut lock) = self;
        Ok(Arc::clone(&lock))
    }
}

/// Get the current config, fetching it from disk if needed.
pub fn get_config() -> Result<Arc<Config>> {
    let config = CONFIG.get_or_try_init(|| -> Result<RwLock<Arc<Config>>> {
        Ok(RwLock::new(Arc::new(load_config()?)))
    })?;
    let lock = config
        .read()
        .map_err(|err| crate::Error::LockPoisonedRead(err.to_string()))?;
    Ok(Arc::clone(&lock))
}

/// Load configuration from disk, even if it has already been loaded.
///
/// Includes the system, user, and project-local configs (if present), each
/// layered over the last, then `BOB_*` environment variable overrides.
pub fn load_config() -> Result<Config> {
    use config::{Config as RawConfig, File};

    const USER_CONFIG_BASE: &str = "bob/bob";
    let user_config = dirs::config_local_dir().map(|config| config.join(USER_CONFIG_BASE));

    let mut config_builder = RawConfig::builder()
        .add_source(File::with_name("/etc/bob").required(false));
    if let Some(user_config) = user_config {
        config_builder =
            config_builder.add_source(File::with_name(&format!("{}", user_config.display())).required(false));
    }
    config_builder = config_builder.add_source(File::with_name("bob").required(false));

    for (var, value) in std::env::vars() {
        let Some(tail) = var.strip_prefix("BOB_") else {
            continue;
        };
        let Some((section, name)) = tail.split_once('_') else {
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        config_builder = config_builder.set_override(key, value)?;
    }

    let config = config_builder.build()?;
    Ok(Config::deserialize(config)?)
}

#[cfg(test)]
mod config_test {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn default_jobs_is_one() {
        let cfg = Config::default();
        assert_eq!(cfg.jobs.default_count, 1);
    }

    #[test]
    #[serial]
    fn env_override_applies() {
        std::env::set_var("BOB_JOBS_DEFAULT_COUNT", "4");
        let cfg = load_config().expect("config loads");
        assert_eq!(cfg.jobs.default_count, 4);
        std::env::remove_var("BOB_JOBS_DEFAULT_COUNT");
    }
}
