//! Config Locator - find the YAML config the CLI should load
//!
//! Looked up in order: `--config`, `$DOCFILER_CONFIG`, then
//! `<config dir>/docfiler/config.yaml` (e.g. `~/.config/docfiler/config.yaml`
//! on Linux). An explicitly named file must exist; the per-user file is
//! optional and built-in defaults apply without it.

use anyhow::{bail, Result};
use docfiler_core::FilerConfig;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "DOCFILER_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Flag,
    Env,
    UserConfigDir,
    BuiltIn,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfigSource::Flag => "--config",
            ConfigSource::Env => CONFIG_ENV,
            ConfigSource::UserConfigDir => "user config directory",
            ConfigSource::BuiltIn => "built-in defaults",
        };
        f.write_str(label)
    }
}

pub struct ConfigLocator {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    user_default: Option<PathBuf>,
}

impl ConfigLocator {
    pub fn new(
        explicit: Option<PathBuf>,
        env: Option<PathBuf>,
        user_default: Option<PathBuf>,
    ) -> Self {
        Self {
            explicit,
            env,
            user_default,
        }
    }

    /// Locator for this process: `--config` value plus the real environment
    pub fn from_env(explicit: Option<PathBuf>) -> Self {
        let env = std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::new(explicit, env, Self::user_config_path())
    }

    /// `<config dir>/docfiler/config.yaml`, if the platform has a config dir
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docfiler").join("config.yaml"))
    }

    /// Which file to load, if any. Named files that do not exist are errors.
    pub fn locate(&self) -> Result<(ConfigSource, Option<PathBuf>)> {
        if let Some(path) = &self.explicit {
            return Self::require(ConfigSource::Flag, path);
        }
        if let Some(path) = &self.env {
            return Self::require(ConfigSource::Env, path);
        }
        if let Some(path) = &self.user_default {
            if path.is_file() {
                return Ok((ConfigSource::UserConfigDir, Some(path.clone())));
            }
        }
        Ok((ConfigSource::BuiltIn, None))
    }

    fn require(source: ConfigSource, path: &Path) -> Result<(ConfigSource, Option<PathBuf>)> {
        if !path.is_file() {
            bail!("config file {} (from {source}) not found", path.display());
        }
        Ok((source, Some(path.to_path_buf())))
    }

    /// Locate and parse. Validation is left to the caller so CLI overrides
    /// can be applied first.
    pub fn load(&self) -> Result<(ConfigSource, FilerConfig)> {
        match self.locate()? {
            (source, Some(path)) => Ok((source, FilerConfig::load_from_file(&path)?)),
            (source, None) => Ok((source, FilerConfig::default())),
        }
    }
}
