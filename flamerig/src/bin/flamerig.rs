use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use flamerig::{
    config::{self, Config},
    rig::{self, Rig},
    target::{self, Behavior, Output},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{runtime::Builder, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load flamerig config: {0}")]
    Config(#[from] config::Error),
    #[error("flamerig run failed: {0}")]
    Rig(#[from] rig::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Interrupted before the run completed")]
    Interrupted,
}

fn default_server_behavior() -> Behavior {
    Behavior::Quiet
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file, defaults apply when absent
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// seed for the target selection sequence
    #[clap(long)]
    seed: Option<u64>,
    /// the number of shots to fire
    #[clap(long)]
    shot_count: Option<u32>,
    /// the time, in milliseconds, to wait after each shot
    #[clap(long)]
    cooldown_milliseconds: Option<u64>,
    /// the path to write the rendered flame graph
    #[clap(long)]
    artifact_path: Option<PathBuf>,
    /// the path to write the server's stdout
    #[clap(long, default_value_t = default_server_behavior())]
    server_stdout_path: Behavior,
    /// the path to write the server's stderr
    #[clap(long, default_value_t = default_server_behavior())]
    server_stderr_path: Behavior,
    /// address to bind a prometheus exporter for shot metrics to
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// the command that starts the server
    server: PathBuf,
    /// arguments for the server
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    server_arguments: Vec<String>,
}

fn get_config(cli: &Cli) -> Result<(Config, target::Config), Error> {
    let mut config = match &cli.config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::from_path(path)?
        }
        None => Config::default(),
    };

    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(shot_count) = cli.shot_count {
        config.shot_count = shot_count;
    }
    if let Some(cooldown) = cli.cooldown_milliseconds {
        config.cooldown_milliseconds = cooldown;
    }
    if let Some(path) = &cli.artifact_path {
        config.report.artifact_path.clone_from(path);
    }

    let mut target = target::Config::new(cli.server.clone(), cli.server_arguments.clone());
    target.output = Output {
        stdout: cli.server_stdout_path.clone(),
        stderr: cli.server_stderr_path.clone(),
    };
    Ok((config, target))
}

async fn inner_main(
    config: Config,
    target: target::Config,
    prometheus_addr: Option<SocketAddr>,
) -> Result<(), Error> {
    if let Some(addr) = prometheus_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Prometheus exporter listening on {addr}");
    }

    let rig = Rig::new(config, target)?;
    tokio::select! {
        res = rig.run() => {
            let outcome = res?;
            info!(
                "{hits} of {sent} shots hit, flame graph written to {artifact}",
                hits = outcome.summary.hits,
                sent = outcome.summary.sent,
                artifact = outcome.artifact.display()
            );
            Ok(())
        },
        _ = signal::ctrl_c() => {
            error!("received ctrl-c, abandoning run");
            Err(Error::Interrupted)
        }
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting flamerig {version} run.");

    let cli = Cli::parse();
    let (config, target) = get_config(&cli)?;

    let runtime = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, target, cli.prometheus_addr));
    info!("Bye. :)");
    res
}
