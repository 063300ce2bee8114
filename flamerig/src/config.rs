//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Every setting has a
//! default so that flamerig runs with no configuration file at all.
use std::{
    fs, io,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{driver, profiler, report};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The target list has no members
    #[error("targets must not be empty")]
    EmptyTargets,
    /// The report pipeline has no stages
    #[error("report stages must not be empty")]
    EmptyReport,
}

fn default_seed() -> u64 {
    123_456_789
}

fn default_random_limit() -> NonZeroU32 {
    NonZeroU32::new(1_000).unwrap_or(NonZeroU32::MIN)
}

fn default_shot_count() -> u32 {
    100
}

fn default_cooldown_milliseconds() -> u64 {
    100
}

fn default_settle_milliseconds() -> u64 {
    1_000
}

fn default_targets() -> Vec<String> {
    vec![
        "localhost:8080/api/v1/maps/map1".to_string(),
        "localhost:8080/api/v1/maps".to_string(),
    ]
}

/// Main configuration struct for this program
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The seed for the target selection sequence
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Exclusive upper bound of each random draw, reduced modulo the number
    /// of targets afterward
    #[serde(default = "default_random_limit")]
    pub random_limit: NonZeroU32,
    /// The number of shots to fire
    #[serde(default = "default_shot_count")]
    pub shot_count: u32,
    /// Delay after each shot
    #[serde(default = "default_cooldown_milliseconds")]
    pub cooldown_milliseconds: u64,
    /// Delay between profiler attach and the first shot
    #[serde(default)]
    pub warmup_milliseconds: u64,
    /// Delay between profiler exit and rendering, lets the sample file settle
    /// on disk
    #[serde(default = "default_settle_milliseconds")]
    pub settle_milliseconds: u64,
    /// The endpoints shots are fired at
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    /// How shots are fired
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub client: driver::Config,
    /// The profiler attached to the target
    #[serde(default)]
    pub profiler: profiler::Config,
    /// The tools that render the samples
    #[serde(default)]
    pub report: report::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            random_limit: default_random_limit(),
            shot_count: default_shot_count(),
            cooldown_milliseconds: default_cooldown_milliseconds(),
            warmup_milliseconds: 0,
            settle_milliseconds: default_settle_milliseconds(),
            targets: default_targets(),
            client: driver::Config::default(),
            profiler: profiler::Config::default(),
            report: report::Config::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from YAML. Absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Function will return an error if the YAML does not describe a valid
    /// configuration.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Function will return an error if the file cannot be read or does not
    /// describe a valid configuration.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml(&contents)
    }

    /// Check the invariants serde cannot.
    ///
    /// # Errors
    ///
    /// Function will return an error if there are no targets or no report
    /// stages.
    pub fn validate(&self) -> Result<(), Error> {
        if self.targets.is_empty() {
            return Err(Error::EmptyTargets);
        }
        if self.report.stages.is_empty() {
            return Err(Error::EmptyReport);
        }
        Ok(())
    }

    /// Delay after each shot
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_milliseconds)
    }

    /// Delay before the first shot
    #[must_use]
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_milliseconds)
    }

    /// Delay before rendering
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_milliseconds)
    }
}
