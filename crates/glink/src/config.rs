//! Link-context configuration.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;
use glink_driver::DriverCapabilities;
use tracing::warn;

use crate::program::{LinkStrategy, MonolithicLink, SeparableLink};

/// Which linking strategy a context uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    /// Separable when the driver supports program pipelines, else monolithic.
    #[default]
    Auto,
    Monolithic,
    Separable,
}

impl FromStr for StrategyChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "auto" => StrategyChoice::Auto,
            "monolithic" => StrategyChoice::Monolithic,
            "separable" => StrategyChoice::Separable,
            other => bail!("unknown link strategy `{other}`"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryCacheConfig {
    /// Try cached binaries before compiling from source.
    pub enabled: bool,
    /// Store binaries after a successful source link.
    pub save: bool,
    /// Load on context creation and save on [`LinkContext::save_binary_cache`].
    ///
    /// [`LinkContext::save_binary_cache`]: crate::LinkContext::save_binary_cache
    pub path: Option<PathBuf>,
}

impl Default for BinaryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            save: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkConfig {
    pub strategy: StrategyChoice,
    pub binary_cache: BinaryCacheConfig,
}

impl LinkConfig {
    /// Defaults overridden by `GLINK_STRATEGY` and `GLINK_BINARY_CACHE`.
    ///
    /// `GLINK_BINARY_CACHE` is a file path, or `off` to disable the cache.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("GLINK_STRATEGY") {
            match value.parse() {
                Ok(strategy) => config.strategy = strategy,
                Err(err) => warn!(%err, "ignoring GLINK_STRATEGY"),
            }
        }

        if let Ok(value) = std::env::var("GLINK_BINARY_CACHE") {
            match value.trim() {
                "" => {}
                "off" | "0" | "false" => config.binary_cache.enabled = false,
                path => {
                    config.binary_cache.enabled = true;
                    config.binary_cache.save = true;
                    config.binary_cache.path = Some(PathBuf::from(path));
                }
            }
        }

        config
    }

    /// Pick the strategy for a driver with `caps`.
    pub fn strategy_for(&self, caps: &DriverCapabilities) -> Box<dyn LinkStrategy> {
        match self.strategy {
            StrategyChoice::Monolithic => Box::new(MonolithicLink),
            StrategyChoice::Separable if caps.separate_shader_objects => Box::new(SeparableLink),
            StrategyChoice::Separable => {
                warn!("separable programs requested but unsupported; linking monolithically");
                Box::new(MonolithicLink)
            }
            StrategyChoice::Auto if caps.separate_shader_objects => Box::new(SeparableLink),
            StrategyChoice::Auto => Box::new(MonolithicLink),
        }
    }
}
