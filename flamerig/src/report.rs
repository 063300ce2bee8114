//! The report pipeline.
//!
//! Once the profiler has flushed its samples the report pipeline turns them
//! into an artifact on disk. The pipeline is a chain of external tools, by
//! default:
//!
//! * `perf script -i <sample file>`, the sample reader,
//! * `./FlameGraph/stackcollapse-perf.pl`, the stack collapser,
//! * `./FlameGraph/flamegraph.pl`, the renderer.
//!
//! Each stage's stdout is the next stage's stdin and the final stage's stdout
//! is the artifact file. Success is judged by the final stage. An earlier stage
//! that exits non-zero is only warned about, after the fact.

use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::process::{self, Process};

/// Errors produced by [`Pipeline`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The pipeline has no stages
    #[error("report pipeline must have at least one stage")]
    NoStages,
    /// Unable to create the artifact file
    #[error("unable to create artifact {path:?}: {source}")]
    Artifact {
        /// Artifact path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// A stage's stdout was not captured
    #[error("report stage {0} has no stdout to pipe")]
    MissingStdout(usize),
    /// Unable to connect a stage's stdout to the next stage
    #[error("unable to pipe report stage {stage}: {source}")]
    Pipe {
        /// Index of the upstream stage
        stage: usize,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// The final stage exited unsuccessfully
    #[error("report stage {stage} failed with {status}")]
    StageFailed {
        /// Index of the failed stage
        stage: usize,
        /// Exit status of the stage
        status: ExitStatus,
    },
    /// See [`crate::process::Error`]
    #[error(transparent)]
    Process(#[from] process::Error),
}

fn default_stages() -> Vec<process::Config> {
    vec![
        process::Config::new("perf", ["script", "-i"]),
        process::Config::new("./FlameGraph/stackcollapse-perf.pl", Vec::<String>::new()),
        process::Config::new("./FlameGraph/flamegraph.pl", Vec::<String>::new()),
    ]
}

/// Default location of the rendered artifact.
#[must_use]
pub fn default_artifact_path() -> PathBuf {
    PathBuf::from("graph.svg")
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Pipeline`]
pub struct Config {
    /// The tools to chain, in order. The sample file path is appended to the
    /// first stage's arguments.
    #[serde(default = "default_stages")]
    pub stages: Vec<process::Config>,
    /// Where the final stage's output is written.
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            artifact_path: default_artifact_path(),
        }
    }
}

/// The report pipeline.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// Create a new [`Pipeline`] instance
    ///
    /// # Errors
    ///
    /// Function will return an error if no stages are configured.
    pub fn new(config: Config) -> Result<Self, Error> {
        if config.stages.is_empty() {
            return Err(Error::NoStages);
        }
        Ok(Self { config })
    }

    /// Render `sample_file` into the artifact, returning the artifact path.
    ///
    /// Stages are started in order. If a stage cannot be started no later
    /// stage is started and stages already running are killed.
    ///
    /// # Errors
    ///
    /// Function will return an error if a stage cannot be started, the
    /// artifact cannot be created or the final stage exits unsuccessfully.
    pub async fn render(&self, sample_file: &Path) -> Result<PathBuf, Error> {
        let stages = &self.config.stages;
        let last = stages.len() - 1;
        let mut upstream: Option<Stdio> = None;
        let mut running: Vec<Process> = Vec::with_capacity(stages.len());

        for (idx, stage) in stages.iter().enumerate() {
            let mut cmd = stage.command();
            if idx == 0 {
                cmd.arg(sample_file);
            }
            if let Some(stdin) = upstream.take() {
                cmd.stdin(stdin);
            }
            if idx == last {
                let path = &self.config.artifact_path;
                let artifact = fs::File::create(path).map_err(|source| Error::Artifact {
                    path: path.clone(),
                    source,
                })?;
                cmd.stdout(Stdio::from(artifact));
            } else {
                cmd.stdout(Stdio::piped());
            }

            let name = format!("report stage {idx} ({})", stage.command.display());
            let mut process = Process::spawn(name, cmd)?;
            if idx != last {
                let stdout = process.take_stdout().ok_or(Error::MissingStdout(idx))?;
                let stdin: Result<Stdio, io::Error> = stdout.try_into();
                upstream = Some(stdin.map_err(|source| Error::Pipe { stage: idx, source })?);
            }
            running.push(process);
        }

        let Some(terminal) = running.pop() else {
            return Err(Error::NoStages);
        };
        let status = terminal.stop(true).await?;
        for (idx, stage) in running.into_iter().enumerate() {
            let stage_status = stage.stop(true).await?;
            if !stage_status.success() {
                warn!(
                    "report stage {idx} exited with {stage_status}, the artifact may be incomplete"
                );
            }
        }
        if !status.success() {
            return Err(Error::StageFailed {
                stage: last,
                status,
            });
        }

        info!("rendered {path}", path = self.config.artifact_path.display());
        Ok(self.config.artifact_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> process::Config {
        process::Config::new("cat", Vec::<String>::new())
    }

    fn sh(script: &str) -> process::Config {
        process::Config::new("sh", ["-c", script])
    }

    struct Scratch {
        _dir: tempfile::TempDir,
        sample: PathBuf,
        artifact: PathBuf,
    }

    fn scratch(samples: &str) -> Scratch {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let sample = dir.path().join("perf.data");
        let artifact = dir.path().join("graph.svg");
        fs::write(&sample, samples).expect("samples could not be written");
        Scratch {
            _dir: dir,
            sample,
            artifact,
        }
    }

    #[test]
    fn empty_pipeline_rejected() {
        let res = Pipeline::new(Config {
            stages: Vec::new(),
            artifact_path: default_artifact_path(),
        });
        assert!(matches!(res, Err(Error::NoStages)));
    }

    #[test]
    fn default_stages_match_flamegraph_tooling() {
        let config = Config::default();
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[0].command, PathBuf::from("perf"));
        assert_eq!(config.stages[0].arguments, vec!["script", "-i"]);
        assert_eq!(config.artifact_path, PathBuf::from("graph.svg"));
    }

    #[tokio::test]
    async fn passthrough_chain_copies_samples() {
        let samples = "main;serve;handle 12\nmain;idle 3\n";
        let scratch = scratch(samples);
        // Truncate-create: stale content must not survive.
        fs::write(&scratch.artifact, "stale content that is longer than the samples by far")
            .expect("artifact could not be written");

        let pipeline = Pipeline::new(Config {
            stages: vec![cat(), cat(), cat()],
            artifact_path: scratch.artifact.clone(),
        })
        .expect("pipeline must build");
        let artifact = pipeline
            .render(&scratch.sample)
            .await
            .expect("render must succeed");

        assert_eq!(artifact, scratch.artifact);
        let contents = fs::read_to_string(artifact).expect("artifact must be readable");
        assert_eq!(contents, samples);
    }

    #[tokio::test]
    async fn missing_stage_stops_pipeline() {
        let scratch = scratch("main 1\n");
        let pipeline = Pipeline::new(Config {
            stages: vec![
                cat(),
                process::Config::new("/nonexistent/stackcollapse", Vec::<String>::new()),
                cat(),
            ],
            artifact_path: scratch.artifact.clone(),
        })
        .expect("pipeline must build");

        let res = pipeline.render(&scratch.sample).await;
        assert!(matches!(
            res,
            Err(Error::Process(process::Error::Spawn { .. }))
        ));
        assert!(!scratch.artifact.exists());
    }

    #[tokio::test]
    async fn intermediate_failure_is_not_fatal() {
        let scratch = scratch("main 1\n");
        let pipeline = Pipeline::new(Config {
            stages: vec![cat(), sh("cat > /dev/null; exit 3"), cat()],
            artifact_path: scratch.artifact.clone(),
        })
        .expect("pipeline must build");

        let artifact = pipeline
            .render(&scratch.sample)
            .await
            .expect("render must succeed");
        let contents = fs::read_to_string(artifact).expect("artifact must be readable");
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_is_fatal() {
        let scratch = scratch("main 1\n");
        let pipeline = Pipeline::new(Config {
            stages: vec![cat(), cat(), sh("cat > /dev/null; exit 1")],
            artifact_path: scratch.artifact.clone(),
        })
        .expect("pipeline must build");

        let res = pipeline.render(&scratch.sample).await;
        assert!(matches!(res, Err(Error::StageFailed { stage: 2, .. })));
    }
}
