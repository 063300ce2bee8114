use std::{fmt, fs, io, path::PathBuf, process::Stdio, str};

use serde::Deserialize;

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Defines how sub-process stderr and stdout are handled.
pub struct Output {
    #[serde(default)]
    /// Determines how stderr is routed.
    pub stderr: Behavior,
    #[serde(default)]
    /// Determines how stdout is routed.
    pub stdout: Behavior,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
/// Defines the [`Output`] behavior for stderr and stdout.
pub enum Behavior {
    /// Redirect stdout, stderr to /dev/null
    #[default]
    Quiet,
    /// Write to a location on-disk.
    Log(PathBuf),
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Behavior::Quiet => write!(f, "/dev/null")?,
            Behavior::Log(path) => write!(f, "{}", path.display())?,
        }
        Ok(())
    }
}

impl str::FromStr for Behavior {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() || input == "/dev/null" {
            return Ok(Behavior::Quiet);
        }
        Ok(Behavior::Log(PathBuf::from(input)))
    }
}

/// Open the [`Stdio`] for a [`Behavior`]. Log files are truncated.
pub(crate) fn stdio(behavior: &Behavior) -> io::Result<Stdio> {
    match behavior {
        Behavior::Quiet => Ok(Stdio::null()),
        Behavior::Log(path) => {
            let fp = fs::File::create(path)?;
            Ok(Stdio::from(fp))
        }
    }
}
