//! Manage the profiler sub-process
//!
//! The profiler is attached to the running target by PID and writes its
//! samples to a file on disk. By default this is Linux `perf`, run as
//! `perf record -p <pid> -o perf.data`. The profiler is expected to exit on its
//! own once the target it samples has exited, flushing the sample file as it
//! does.

use std::{io, path::PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::{
    common::{Behavior, Output, stdio},
    process::{self, Process},
};

/// Errors produced by [`attach`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unable to open a file for the profiler's output
    #[error("unable to open profiler output {path}: {source}")]
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

fn default_command() -> PathBuf {
    PathBuf::from("perf")
}

fn default_arguments() -> Vec<String> {
    vec!["record".to_string()]
}

/// Default location of the sample file.
#[must_use]
pub fn default_sample_path() -> PathBuf {
    PathBuf::from("perf.data")
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for the profiler
pub struct Config {
    /// The path to the profiler executable.
    #[serde(default = "default_command")]
    pub command: PathBuf,
    /// Arguments for the profiler, placed ahead of the PID and sample file.
    #[serde(default = "default_arguments")]
    pub arguments: Vec<String>,
    /// Where the profiler writes its samples.
    #[serde(default = "default_sample_path")]
    pub sample_path: PathBuf,
    /// Manages stderr, stdout of the profiler sub-process.
    #[serde(default)]
    pub output: Output,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: default_command(),
            arguments: default_arguments(),
            sample_path: default_sample_path(),
            output: Output::default(),
        }
    }
}

impl Config {
    /// The complete command line that attaches the profiler to `pid`.
    #[must_use]
    pub fn command_for(&self, pid: u32) -> process::Config {
        let mut arguments = self.arguments.clone();
        arguments.extend([
            "-p".to_string(),
            pid.to_string(),
            "-o".to_string(),
            self.sample_path.display().to_string(),
        ]);
        process::Config::new(self.command.clone(), arguments)
    }
}

fn open(behavior: &Behavior) -> Result<std::process::Stdio, Error> {
    stdio(behavior).map_err(|source| Error::Output {
        path: behavior.to_string(),
        source,
    })
}

/// Attach the profiler to the process with `pid`. Returns as soon as the
/// profiler is spawned.
///
/// # Errors
///
/// Function will return an error if an output file cannot be opened or the
/// profiler cannot be spawned.
pub fn attach(config: &Config, pid: u32) -> Result<Process, Error> {
    let mut cmd = config.command_for(pid).command();
    cmd.stdout(open(&config.output.stdout)?)
        .stderr(open(&config.output.stderr)?);
    let profiler = Process::spawn("profiler", cmd)?;
    info!(
        "profiler attached to PID {pid}, writing samples to {path}",
        path = config.sample_path.display()
    );
    Ok(profiler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_line_matches_perf_record() {
        let command = Config::default().command_for(4242);
        assert_eq!(command.command, PathBuf::from("perf"));
        assert_eq!(
            command.arguments,
            vec!["record", "-p", "4242", "-o", "perf.data"]
        );
    }

    #[tokio::test]
    async fn attach_passes_pid_and_sample_path() {
        let tmp_dir = tempfile::tempdir().expect("directory could not be created");
        let sample_path = tmp_dir.path().join("samples");
        // $1..$4 are `-p <pid> -o <sample>`.
        let config = Config {
            command: PathBuf::from("sh"),
            arguments: vec![
                "-c".to_string(),
                r#"echo "$2" > "$4""#.to_string(),
                "profiler".to_string(),
            ],
            sample_path: sample_path.clone(),
            output: Output::default(),
        };

        let profiler = attach(&config, 4242).expect("profiler must spawn");
        let status = profiler.stop(true).await.expect("profiler must stop");
        assert!(status.success());
        let contents = std::fs::read_to_string(sample_path).expect("samples must be readable");
        assert_eq!(contents, "4242\n");
    }

    #[test]
    fn unopenable_output_names_path() {
        let mut config = Config::default();
        config.output.stderr = Behavior::Log(PathBuf::from("/nonexistent/dir/perf.err"));

        let res = attach(&config, 4242);
        assert!(matches!(
            res,
            Err(Error::Output { ref path, .. }) if path == "/nonexistent/dir/perf.err"
        ));
    }
}
