// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod dispatcher;
mod error;
mod utils;

use camhal::{
    adapter::{AdapterConfig, CameraHalAdapter, CameraModuleOps},
    device::ZslSelection,
    loader,
    reprocess::{MonochromeEffect, ReprocessEffect},
};
use clap::Parser;
use error::{result_to_exit_code, ServerError};
use log::{error, info, warn};
use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{atomic::Ordering, Arc},
    thread,
    time::Duration,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Camera HAL adapter server - serves vendor camera modules to the dispatcher
#[derive(Parser, Debug)]
#[command(name = "camhal-server")]
#[command(version)]
#[command(about = "Camera HAL adapter server - serves vendor camera modules to the dispatcher")]
#[command(long_about = None)]
struct Cli {
    /// Directory holding the vendor camera module libraries (*.so)
    #[arg(long, env = "CAMHAL_MODULE_DIR", default_value = "/usr/lib/camera_hal")]
    module_dir: PathBuf,

    /// Unix socket of the camera dispatcher
    #[arg(
        long,
        env = "CAMHAL_DISPATCHER_SOCKET",
        default_value = "/run/camera/dispatcher.sock"
    )]
    dispatcher_socket: PathBuf,

    /// Buffer mapper library; enables the software reprocessing effects
    #[arg(long, env = "CAMHAL_MAPPER_LIBRARY")]
    mapper: Option<PathBuf>,

    /// Zero shutter lag frame selection: last-submitted, closest,
    /// closest-3a or off. Needs --mapper
    #[arg(long, env = "CAMHAL_ZSL_SELECTION", default_value = "closest-3a")]
    zsl_selection: String,

    /// Name announced to the dispatcher
    #[arg(long, default_value = "camhal")]
    name: String,

    /// Enable verbose logging (use RUST_LOG=trace for more)
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    result_to_exit_code(run(cli))
}

fn run(cli: Cli) -> Result<(), ServerError> {
    if !cli.module_dir.is_dir() {
        return Err(ServerError::InvalidArgs(format!(
            "module directory {} does not exist",
            cli.module_dir.display()
        )));
    }

    let zsl_selection = match cli.zsl_selection.as_str() {
        "off" => None,
        name => Some(
            name.parse::<ZslSelection>()
                .map_err(|err| ServerError::InvalidArgs(err.to_string()))?,
        ),
    };

    let modules = loader::load_modules(&cli.module_dir)?;
    if modules.is_empty() {
        warn!("no camera modules in {}", cli.module_dir.display());
    }
    let mapper = cli
        .mapper
        .as_deref()
        .map(loader::load_mapper)
        .transpose()?;
    let effects: Vec<Arc<dyn ReprocessEffect>> = vec![Arc::new(MonochromeEffect::new())];

    let config = AdapterConfig {
        zsl_selection,
        ..AdapterConfig::default()
    };
    let adapter = CameraHalAdapter::new(modules, effects, mapper, config)?;
    adapter.start()?;
    let cameras = {
        let hal = adapter.open_camera_hal()?;
        let count = hal.get_number_of_cameras()?;
        hal.close();
        count
    };
    info!("serving {} cameras", cameras);

    let term = utils::install_signal_handler()?;
    let result = dispatcher::register(&cli.dispatcher_socket, &cli.name, cameras)
        .and_then(|registration| serve(&registration, &term));

    adapter.shutdown();
    result
}

/// Waits for a termination signal or the loss of the dispatcher.
fn serve(
    registration: &dispatcher::Registration,
    term: &std::sync::atomic::AtomicBool,
) -> Result<(), ServerError> {
    loop {
        if term.load(Ordering::Relaxed) {
            info!("termination requested, shutting down");
            return Ok(());
        }
        if registration.is_lost() {
            error!("dispatcher went away, exiting for restart");
            return Err(ServerError::DispatcherLost);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    // Determine log level from flags or RUST_LOG environment variable
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
