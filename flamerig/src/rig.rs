//! The flamerig run sequence.
//!
//! A [`Rig`] owns one complete run:
//!
//! 1. launch the target,
//! 2. attach the profiler to the target's PID,
//! 3. fire every shot of the load sequence,
//! 4. stop the target without waiting on it, then stop the profiler waiting
//!    for it to flush,
//! 5. render the samples into the artifact.
//!
//! Any error aborts the run. Processes still running at that point are killed
//! as their handles drop.

use std::{path::PathBuf, process::ExitStatus};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    config::{self, Config},
    driver::{self, Driver, Summary},
    process, profiler,
    report::{self, Pipeline},
    sequence::{self, Sequence},
    target,
};

/// Errors produced by [`Rig`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`crate::config::Error`]
    #[error(transparent)]
    Config(#[from] config::Error),
    /// See [`crate::sequence::Error`]
    #[error(transparent)]
    Sequence(#[from] sequence::Error),
    /// See [`crate::target::Error`]
    #[error("Target related error: {0}")]
    Target(#[from] target::Error),
    /// See [`crate::profiler::Error`]
    #[error("Profiler related error: {0}")]
    Profiler(#[from] profiler::Error),
    /// See [`crate::driver::Error`]
    #[error(transparent)]
    Driver(#[from] driver::Error),
    /// See [`crate::report::Error`]
    #[error("Report related error: {0}")]
    Report(#[from] report::Error),
    /// See [`crate::process::Error`]
    #[error(transparent)]
    Process(#[from] process::Error),
    /// The target exited while it was being shot at
    #[error("target exited unexpectedly: {0:?}")]
    TargetExited(Option<ExitStatus>),
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Shot totals
    pub summary: Summary,
    /// The rendered artifact
    pub artifact: PathBuf,
}

/// A single profiled load run.
#[derive(Debug)]
pub struct Rig {
    config: Config,
    target: target::Config,
}

impl Rig {
    /// Create a new [`Rig`] instance
    ///
    /// # Errors
    ///
    /// Function will return an error if `config` is not valid.
    pub fn new(config: Config, target: target::Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config, target })
    }

    /// Run to completion.
    ///
    /// # Errors
    ///
    /// Function will return an error if any process cannot be spawned or
    /// stopped, if the target exits before shooting completes, or if the
    /// report cannot be rendered. Failed shots are not errors.
    pub async fn run(self) -> Result<Outcome, Error> {
        let config = &self.config;
        let pipeline = Pipeline::new(config.report.clone())?;
        let driver = Driver::new(&config.client, config.cooldown())?;
        let sequence = Sequence::seeded(
            &config.targets,
            config.seed,
            config.random_limit,
            config.shot_count,
        )?;

        let mut target = target::spawn(&self.target)?;
        let mut profiler = profiler::attach(&config.profiler, target.pid())?;

        if !config.warmup().is_zero() {
            info!("target is running, now sleeping {:?} for warmup", config.warmup());
            sleep(config.warmup()).await;
        }
        let summary = driver.run(sequence).await?;

        if !target.is_running()? {
            let status = target.state().exit_status();
            error!("target exited before shooting completed: {status:?}");
            return Err(Error::TargetExited(status));
        }
        if !profiler.is_running()? {
            warn!(
                "profiler exited before the target was stopped: {status:?}",
                status = profiler.state().exit_status()
            );
        }

        target.stop(false).await?;
        let profiler_status = profiler.stop(true).await?;
        if !profiler_status.success() {
            warn!("profiler exited with {profiler_status}, samples may be incomplete");
        }

        sleep(config.settle()).await;
        let artifact = pipeline.render(&config.profiler.sample_path).await?;
        info!("job done, artifact at {}", artifact.display());
        Ok(Outcome { summary, artifact })
    }
}
