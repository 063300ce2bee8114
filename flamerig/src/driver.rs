//! The request driver.
//!
//! The driver fires one HTTP GET, a "shot", per target drawn from a
//! [`Sequence`], strictly one at a time, sleeping a fixed cooldown after each.
//! A shot that fails is logged and counted and the run continues. Nothing is
//! retried.
//!
//! ## Metrics
//!
//! `requests_sent`: Total number of shots fired
//! `request_ok`: Successful shots
//! `request_failure`: Failed shots
//!

use std::{process::Stdio, time::Duration};

use metrics::counter;
use rand::RngCore;
use serde::Deserialize;
use tokio::time;
use tracing::{debug, info, warn};

use crate::{process, sequence::Sequence};

fn default_timeout_milliseconds() -> u64 {
    5_000
}

/// How each shot is fired.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Config {
    /// Fire shots from an in-process HTTP client.
    Http {
        /// Per-request timeout
        #[serde(default = "default_timeout_milliseconds")]
        timeout_milliseconds: u64,
    },
    /// Fire each shot by running an external HTTP client, the target is
    /// appended to its arguments.
    Command(process::Config),
}

impl Default for Config {
    fn default() -> Self {
        Self::Http {
            timeout_milliseconds: default_timeout_milliseconds(),
        }
    }
}

impl Config {
    /// An external `curl` client that discards the response body. A non-2xx
    /// response is a non-zero exit.
    #[must_use]
    pub fn curl() -> Self {
        Self::Command(process::Config::new(
            "curl",
            ["--silent", "--fail", "--output", "/dev/null"],
        ))
    }
}

/// Errors produced by [`Driver`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The in-process HTTP client could not be built
    #[error("unable to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    /// The external HTTP client could not be run
    #[error(transparent)]
    Process(#[from] process::Error),
}

/// The result of one shot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target answered successfully.
    Hit {
        /// HTTP status, when known
        status: Option<u16>,
    },
    /// The shot failed.
    Miss {
        /// Why the shot failed
        reason: String,
    },
}

/// Totals for a completed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Shots fired
    pub sent: u32,
    /// Shots that hit
    pub hits: u32,
    /// Shots that missed
    pub misses: u32,
}

#[derive(Debug)]
enum Client {
    Http(reqwest::Client),
    Command(process::Config),
}

/// Address targets without a scheme over plain HTTP.
fn target_url(target: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}

/// The request driver.
#[derive(Debug)]
pub struct Driver {
    client: Client,
    cooldown: Duration,
    metric_labels: Vec<(String, String)>,
}

impl Driver {
    /// Create a new [`Driver`] instance
    ///
    /// # Errors
    ///
    /// Function will return an error if the in-process HTTP client cannot be
    /// built.
    pub fn new(config: &Config, cooldown: Duration) -> Result<Self, Error> {
        let (client, kind) = match config {
            Config::Http {
                timeout_milliseconds,
            } => {
                // Targets are local, system proxy settings do not apply.
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_millis(*timeout_milliseconds))
                    .no_proxy()
                    .build()?;
                (Client::Http(client), "http")
            }
            Config::Command(command) => (Client::Command(command.clone()), "command"),
        };
        Ok(Self {
            client,
            cooldown,
            metric_labels: vec![("client".to_string(), kind.to_string())],
        })
    }

    /// Fire one shot at `target`, then sleep for the cooldown.
    ///
    /// # Errors
    ///
    /// A failed shot is not an error. Function will return an error only if
    /// the external HTTP client cannot be spawned.
    pub async fn fire(&self, target: &str) -> Result<Outcome, Error> {
        counter!("requests_sent", &self.metric_labels).increment(1);
        let outcome = match &self.client {
            Client::Http(client) => Self::get(client, target).await,
            Client::Command(command) => Self::run_client(command, target).await?,
        };
        match &outcome {
            Outcome::Hit { status } => {
                let mut labels = self.metric_labels.clone();
                if let Some(status) = status {
                    labels.push(("status_code".to_string(), status.to_string()));
                }
                counter!("request_ok", &labels).increment(1);
            }
            Outcome::Miss { reason } => {
                warn!("shot at {target} missed: {reason}");
                let mut labels = self.metric_labels.clone();
                labels.push(("error".to_string(), reason.clone()));
                counter!("request_failure", &labels).increment(1);
            }
        }
        time::sleep(self.cooldown).await;
        Ok(outcome)
    }

    async fn get(client: &reqwest::Client, target: &str) -> Outcome {
        let response = match client.get(target_url(target)).send().await {
            Ok(response) => response,
            Err(err) => {
                return Outcome::Miss {
                    reason: err.to_string(),
                };
            }
        };
        let status = response.status();
        // Drain the body so the connection completes, the contents are unused.
        if let Err(err) = response.bytes().await {
            return Outcome::Miss {
                reason: err.to_string(),
            };
        }
        if status.is_success() {
            Outcome::Hit {
                status: Some(status.as_u16()),
            }
        } else {
            Outcome::Miss {
                reason: format!("status {status}"),
            }
        }
    }

    async fn run_client(command: &process::Config, target: &str) -> Result<Outcome, Error> {
        let mut cmd = command.command();
        cmd.arg(target).stdout(Stdio::null()).stderr(Stdio::null());
        let client = process::Process::spawn("http client", cmd)?;
        let status = client.stop(true).await?;
        if status.success() {
            Ok(Outcome::Hit { status: None })
        } else {
            Ok(Outcome::Miss {
                reason: format!("client exited with {status}"),
            })
        }
    }

    /// Fire every shot in `sequence`, one at a time.
    ///
    /// # Errors
    ///
    /// See [`Driver::fire`].
    pub async fn run<R>(&self, sequence: Sequence<'_, R>) -> Result<Summary, Error>
    where
        R: RngCore,
    {
        let mut summary = Summary::default();
        for target in sequence {
            debug!("firing at {target}");
            summary.sent += 1;
            match self.fire(target).await? {
                Outcome::Hit { .. } => summary.hits += 1,
                Outcome::Miss { .. } => summary.misses += 1,
            }
        }
        info!(
            "shooting complete: {sent} sent, {hits} hit, {misses} missed",
            sent = summary.sent,
            hits = summary.hits,
            misses = summary.misses
        );
        Ok(summary)
    }
}
