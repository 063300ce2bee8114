//! Managed sub-processes
//!
//! Every external program flamerig runs -- the subject server, the profiler,
//! the report tools and optionally the HTTP client -- is held in a
//! [`Process`]. A `Process` is created by [`Process::spawn`], which never waits
//! on the child, and is destroyed by [`Process::stop`], which terminates and
//! reaps it. A `Process` dropped while its child is still running kills the
//! child so that an early return or an interrupted run does not leave orphans
//! behind.
//!
//! Commands are always built from a structured argument list, see
//! [`Config`]. No shell is involved.

use std::{
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::signal::{SIGTERM, kill},
    unistd::Pid,
};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tokio::{
    process::{Child, ChildStdout, Command},
    time,
};
use tracing::{debug, info, warn};

/// The time a process is given to exit after SIGTERM before it is sent
/// SIGKILL.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Errors produced by [`Process`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unable to spawn the process
    #[error("unable to spawn {name} ({program}): {source}")]
    Spawn {
        /// Role of the process in the run
        name: String,
        /// The program that failed to launch
        program: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// Unable to await the process exit
    #[error("unable to wait for {name} exit: {source}")]
    Wait {
        /// Role of the process in the run
        name: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// SIGTERM error
    #[error("unable to terminate {name}: {source}")]
    SigTerm {
        /// Role of the process in the run
        name: String,
        /// Underlying errno
        #[source]
        source: Errno,
    },
    /// SIGKILL error, sent once the termination grace period elapses
    #[error("unable to kill {name}: {source}")]
    Kill {
        /// Role of the process in the run
        name: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// The child was reaped before its PID could be read
    #[error("{0} has already been polled to completion")]
    ProcessFinished(String),
    /// The PID does not fit a `pid_t`
    #[error("PID {0} cannot be signaled")]
    InvalidPid(u32),
}

fn default_inherit_environment() -> bool {
    true
}

/// A command line, expressed as a program and a structured list of arguments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The path to, or name of, the executable.
    pub command: PathBuf,
    /// Arguments for the sub-process.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Inherit the environment variables from flamerig's environment.
    #[serde(default = "default_inherit_environment")]
    pub inherit_environment: bool,
    /// Environment variables to set for the sub-process, in addition to the
    /// inherited ones if `inherit_environment` is set.
    #[serde(default)]
    pub environment_variables: FxHashMap<String, String>,
}

impl Config {
    /// Create a new [`Config`] that inherits flamerig's environment.
    pub fn new<C, I, S>(command: C, arguments: I) -> Self
    where
        C: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            inherit_environment: true,
            environment_variables: FxHashMap::default(),
        }
    }

    /// Build a [`Command`] for this configuration. Standard input is closed,
    /// standard output and error are left for the caller to route.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.stdin(Stdio::null());
        if !self.inherit_environment {
            cmd.env_clear();
        }
        cmd.args(&self.arguments)
            .envs(self.environment_variables.iter());
        cmd
    }
}

/// Lifecycle state of a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The child has been spawned and has not been observed to exit.
    Running,
    /// The child exited on its own.
    Exited(ExitStatus),
    /// The child was terminated by [`Process::terminate`].
    Stopped(ExitStatus),
}

impl State {
    /// The exit status, if the child is no longer running.
    #[must_use]
    pub fn exit_status(self) -> Option<ExitStatus> {
        match self {
            State::Running => None,
            State::Exited(status) | State::Stopped(status) => Some(status),
        }
    }
}

/// A spawned external process, exclusively owned.
#[derive(Debug)]
pub struct Process {
    name: String,
    pid: u32,
    child: Child,
    state: State,
    grace: Duration,
}

impl Process {
    /// Spawn `command`. Does not wait for the child to do anything.
    ///
    /// `name` is the role of the process in the run and is used in logs and
    /// errors.
    ///
    /// # Errors
    ///
    /// Function will return an error if the program cannot be launched, for
    /// instance if it does not exist or is not executable.
    pub fn spawn(name: impl Into<String>, mut command: Command) -> Result<Self, Error> {
        let name = name.into();
        let program = command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned();
        command.kill_on_drop(true);
        let child = command.spawn().map_err(|source| Error::Spawn {
            name: name.clone(),
            program: program.clone(),
            source,
        })?;
        let pid = child
            .id()
            .ok_or_else(|| Error::ProcessFinished(name.clone()))?;
        info!("spawned {name} ({program}) with PID {pid}");
        Ok(Self {
            name,
            pid,
            child,
            state: State::Running,
            grace: DEFAULT_TERMINATION_GRACE,
        })
    }

    /// Set the time allowed between SIGTERM and SIGKILL.
    #[must_use]
    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The role of this process in the run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operating system PID of the child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The last observed lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Take the captured standard output, if it was piped.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Check, without blocking, whether the child is still running.
    ///
    /// # Errors
    ///
    /// Function will return an error if the child's status cannot be queried.
    pub fn is_running(&mut self) -> Result<bool, Error> {
        if self.state != State::Running {
            return Ok(false);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("{name} exited with {status}", name = self.name);
                self.state = State::Exited(status);
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(source) => Err(Error::Wait {
                name: self.name.clone(),
                source,
            }),
        }
    }

    /// Block until the child exits on its own.
    ///
    /// # Errors
    ///
    /// Function will return an error if the child cannot be waited on.
    pub async fn wait(&mut self) -> Result<ExitStatus, Error> {
        if let Some(status) = self.state.exit_status() {
            return Ok(status);
        }
        let status = self.child.wait().await.map_err(|source| Error::Wait {
            name: self.name.clone(),
            source,
        })?;
        debug!("{name} exited with {status}", name = self.name);
        self.state = State::Exited(status);
        Ok(status)
    }

    /// Send SIGTERM to the child and reap it. If the child has not exited once
    /// the termination grace period elapses it is sent SIGKILL. Terminating a
    /// child that has already exited returns its exit status.
    ///
    /// # Errors
    ///
    /// Function will return an error if the child cannot be signaled or
    /// waited on.
    pub async fn terminate(&mut self) -> Result<ExitStatus, Error> {
        if !self.is_running()? {
            if let Some(status) = self.state.exit_status() {
                return Ok(status);
            }
        }

        // Note that `Child::kill` sends SIGKILL which is not what we want
        // first. SIGTERM gives the child, a profiler especially, a chance to
        // flush.
        let raw_pid = i32::try_from(self.pid).map_err(|_| Error::InvalidPid(self.pid))?;
        match kill(Pid::from_raw(raw_pid), SIGTERM) {
            // ESRCH: exited between the liveness check and the signal.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => {
                return Err(Error::SigTerm {
                    name: self.name.clone(),
                    source,
                });
            }
        }

        let status = if let Ok(res) = time::timeout(self.grace, self.child.wait()).await {
            res.map_err(|source| Error::Wait {
                name: self.name.clone(),
                source,
            })?
        } else {
            warn!(
                "{name} did not exit within {grace:?} of SIGTERM, sending SIGKILL",
                name = self.name,
                grace = self.grace
            );
            self.child.kill().await.map_err(|source| Error::Kill {
                name: self.name.clone(),
                source,
            })?;
            self.child.wait().await.map_err(|source| Error::Wait {
                name: self.name.clone(),
                source,
            })?
        };
        info!("{name} stopped with {status}", name = self.name);
        self.state = State::Stopped(status);
        Ok(status)
    }

    /// Stop and reap the child, consuming this handle.
    ///
    /// If `wait` is true and the child is still running this blocks until the
    /// child exits on its own. The child is always sent a termination signal
    /// afterward, which is a no-op if it has already exited.
    ///
    /// # Errors
    ///
    /// See [`Process::wait`] and [`Process::terminate`].
    pub async fn stop(mut self, wait: bool) -> Result<ExitStatus, Error> {
        if wait && self.is_running()? {
            info!("waiting for {name} to exit", name = self.name);
            self.wait().await?;
        }
        self.terminate().await
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.state == State::Running && matches!(self.child.try_wait(), Ok(None)) {
            // `kill_on_drop` delivers the signal once `child` drops.
            warn!(
                "{name} (PID {pid}) dropped while running, killing it",
                name = self.name,
                pid = self.pid
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt, time::Instant};

    use super::*;

    fn command(program: &str, arguments: &[&str]) -> Command {
        Config::new(program, arguments.iter().copied()).command()
    }

    #[tokio::test]
    async fn spawn_missing_program_fails() {
        let res = Process::spawn("server", command("/nonexistent/flamerig-server", &[]));
        match res {
            Err(Error::Spawn { name, program, .. }) => {
                assert_eq!(name, "server");
                assert_eq!(program, "/nonexistent/flamerig-server");
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_with_wait_on_exited_process_returns_immediately() {
        let mut process =
            Process::spawn("true", command("true", &[])).expect("could not spawn true");
        let status = process.wait().await.expect("could not wait on true");
        assert!(status.success());
        assert_eq!(process.state(), State::Exited(status));

        let start = Instant::now();
        let stopped = process.stop(true).await.expect("stop must not fail");
        assert!(stopped.success());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stop_without_wait_terminates_running_process() {
        let mut process =
            Process::spawn("sleep", command("sleep", &["30"])).expect("could not spawn sleep");
        assert!(process.is_running().expect("could not query sleep"));

        let start = Instant::now();
        let status = process.stop(false).await.expect("stop must not fail");
        assert_eq!(status.signal(), Some(SIGTERM as i32));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stop_with_wait_waits_for_natural_exit() {
        let process = Process::spawn("sleep", command("sleep", &["0.2"]))
            .expect("could not spawn sleep");
        let start = Instant::now();
        let status = process.stop(true).await.expect("stop must not fail");
        assert!(status.success());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let mut process =
            Process::spawn("sleep", command("sleep", &["30"])).expect("could not spawn sleep");
        let first = process.terminate().await.expect("terminate must not fail");
        assert_eq!(process.state(), State::Stopped(first));
        assert!(!process.is_running().expect("could not query sleep"));

        let second = process.terminate().await.expect("terminate must not fail");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn terminate_escalates_to_sigkill_after_grace() {
        let mut process = Process::spawn(
            "stubborn",
            command("sh", &["-c", "trap '' TERM; while :; do sleep 0.05; done"]),
        )
        .expect("could not spawn sh")
        .with_termination_grace(Duration::from_millis(200));
        // Give the shell time to install its trap.
        time::sleep(Duration::from_millis(300)).await;

        let status = process.terminate().await.expect("terminate must not fail");
        assert_eq!(status.signal(), Some(nix::sys::signal::SIGKILL as i32));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: Config = serde_yaml::from_str("command: perf\narguments: [record]\n")
            .expect("config must deserialize");
        assert_eq!(config, Config::new("perf", ["record"]));
        assert!(config.inherit_environment);
    }
}
