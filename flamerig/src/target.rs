//! Manages flamerig's target
//!
//! The flamerig 'target' is the subject server that is profiled while the
//! [`crate::driver::Driver`] fires shots at it. flamerig launches the target as
//! a child process and hands its PID to the [`crate::profiler`]. The target is
//! shut down by SIGTERM once shooting is complete; see
//! [`crate::process::Process::stop`].

use std::{io, path::PathBuf};

use tracing::info;

use crate::{
    common::stdio,
    process::{self, Process},
};
pub use crate::common::{Behavior, Output};

/// Errors produced by [`spawn`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unable to open a file for the target's output
    #[error("unable to open target output {path}: {source}")]
    Output {
        /// Output destination
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// See [`crate::process::Error`]
    #[error(transparent)]
    Process(#[from] process::Error),
}

/// Configuration for the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The target command line.
    pub command: process::Config,
    /// Manages stderr, stdout of the target sub-process.
    pub output: Output,
}

impl Config {
    /// Create a new [`Config`] from an executable and its arguments, with
    /// output discarded.
    pub fn new(command: impl Into<PathBuf>, arguments: Vec<String>) -> Self {
        Self {
            command: process::Config::new(command, arguments),
            output: Output::default(),
        }
    }
}

fn open(behavior: &Behavior) -> Result<std::process::Stdio, Error> {
    stdio(behavior).map_err(|source| Error::Output {
        path: behavior.to_string(),
        source,
    })
}

/// Launch the target. Returns as soon as the child is spawned.
///
/// # Errors
///
/// Function will return an error if an output file cannot be opened or the
/// target cannot be spawned.
pub fn spawn(config: &Config) -> Result<Process, Error> {
    let mut cmd = config.command.command();
    cmd.stdout(open(&config.output.stdout)?)
        .stderr(open(&config.output.stderr)?);
    let target = Process::spawn("target", cmd)?;
    info!(
        "target is running with PID {pid}, stdout to {stdout}, stderr to {stderr}",
        pid = target.pid(),
        stdout = config.output.stdout,
        stderr = config.output.stderr
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_routes_stdout_to_log() {
        let tmp_dir = tempfile::tempdir().expect("directory could not be created");
        let log = tmp_dir.path().join("target.out");
        let mut config = Config::new("echo", vec!["listening".to_string()]);
        config.output.stdout = Behavior::Log(log.clone());

        let mut target = spawn(&config).expect("target must spawn");
        let status = target.wait().await.expect("target must exit");
        assert!(status.success());
        let contents = std::fs::read_to_string(log).expect("log must be readable");
        assert_eq!(contents, "listening\n");
    }

    #[tokio::test]
    async fn spawn_missing_target_fails() {
        let config = Config::new("/nonexistent/flamerig-target", Vec::new());
        assert!(matches!(
            spawn(&config),
            Err(Error::Process(process::Error::Spawn { .. }))
        ));
    }

    #[test]
    fn unopenable_output_names_path() {
        let mut config = Config::new("sleep", vec!["30".to_string()]);
        config.output.stdout = Behavior::Log(PathBuf::from("/nonexistent/dir/target.out"));

        let res = spawn(&config);
        assert!(matches!(
            res,
            Err(Error::Output { ref path, .. }) if path == "/nonexistent/dir/target.out"
        ));
    }
}
