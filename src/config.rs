use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    engine::MatchEngine,
    error::{Error, Result},
};

/// Environment variable naming a settings file.
pub const CONFIG_ENV: &str = "DOCSIFT_CONFIG";

const MAX_NGRAM_SIZE: usize = 8;

/// Normalization and n-gram parameters of a [`MatchEngine`].
///
/// The worker and the coordinator must build their engines from the same
/// value, otherwise terms indexed on one side and queries normalized on the
/// other stop lining up. [`EngineConfig::build_engine`] is the only place
/// engines are constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Length of the character n-grams terms are split into.
    pub ngram_size: usize,
    /// Keep letters outside the Latin scripts instead of treating them as
    /// separators.
    pub allow_non_latin: bool,
    /// Character used to pad both ends of a term before splitting.
    pub padding: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ngram_size: 3,
            allow_non_latin: false,
            padding: '$',
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ngram_size == 0 || self.ngram_size > MAX_NGRAM_SIZE {
            return Err(Error::Config(format!(
                "ngramSize must be between 1 and {MAX_NGRAM_SIZE}, got {}",
                self.ngram_size
            )));
        }
        if self.padding.is_alphanumeric() || self.padding.is_whitespace() {
            return Err(Error::Config(format!(
                "padding must not be alphanumeric or whitespace, got {:?}",
                self.padding
            )));
        }
        Ok(())
    }

    /// Build an empty engine. Used for both indexing and querying.
    pub fn build_engine(&self) -> Result<MatchEngine> {
        self.validate()?;
        Ok(MatchEngine::new(self.clone()))
    }
}

/// What happens when `index_data` is called while a round is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlapPolicy {
    /// Every round is sent; each successful response replaces the engine,
    /// so the last one received wins.
    #[default]
    LastWins,
    /// A second round is refused until the first one has answered.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    /// How long a round may take, from `index_data` to its response, before
    /// the worker is abandoned. `None` waits forever.
    pub index_timeout_ms: Option<u64>,
    pub overlap: OverlapPolicy,
    pub default_top_n: usize,
    pub default_min_quality: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            index_timeout_ms: Some(120_000),
            overlap: OverlapPolicy::LastWins,
            default_top_n: 10,
            default_min_quality: 0.3,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_top_n == 0 {
            return Err(Error::Config("defaultTopN must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.default_min_quality) {
            return Err(Error::Config(format!(
                "defaultMinQuality must be within [0, 1], got {}",
                self.default_min_quality
            )));
        }
        Ok(())
    }

    pub fn index_timeout(&self) -> Option<Duration> {
        self.index_timeout_ms.map(Duration::from_millis)
    }
}

/// Everything that can be set from a settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub coordinator: CoordinatorConfig,
}

impl Settings {
    /// Load settings from, in order of priority:
    /// 1. An explicit path (from --config)
    /// 2. The DOCSIFT_CONFIG environment variable
    /// 3. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = if let Some(path) = explicit {
            Some(path.to_path_buf())
        } else {
            std::env::var_os(CONFIG_ENV).map(PathBuf::from)
        };

        let settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.engine.validate()?;
        settings.coordinator.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
