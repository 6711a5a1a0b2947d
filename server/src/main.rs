mod cli;
mod signals;

use clap::Parser;
use clap::error::ErrorKind;
use cli::Cli;
use guesthost_host::{DefaultSubsystems, HostError, ServiceLoop, SubsystemLifecycle};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> Result<(), HostError> {
    let config = cli.host_config()?;
    config.prepare_layout()?;
    signals::install()?;

    tracing::info!(
        base = %config.base_path.display(),
        width = config.geometry.width,
        height = config.geometry.height,
        dpi = config.geometry.dpi,
        "Starting guest host"
    );

    let mut lifecycle = SubsystemLifecycle::new(config, Arc::new(DefaultSubsystems::new()));
    lifecycle.bring_up()?;

    ServiceLoop::new(&lifecycle).run(&mut lifecycle, signals::stop_flag());

    let signal = signals::received();
    tracing::info!(signal = ?signal, "Stop requested");
    lifecycle.shutdown(signal);
    Ok(())
}
