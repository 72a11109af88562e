//! Protonect: synchronized color, IR and depth viewer

use std::sync::Arc;

use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use protonect::acquisition::LoopSummary;
use protonect::cli::Args;
use protonect::device::SimulatedDriver;
use protonect::display::{DisplaySink, HeadlessDisplay};
use protonect::error::AppError;
use protonect::shutdown::{try_install_interrupt_handler, ShutdownToken};
use protonect::{app, Config, DisplayConfig};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("protonect=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Protonect launching...");

    match launch() {
        Ok(summary) => {
            info!(
                "Protonect shutting down after {} frame sets ({:?})",
                summary.frame_sets, summary.exit_reason
            );
            Ok(())
        }
        Err(err) => {
            match &err {
                AppError::Usage(text) => print!("{text}"),
                AppError::Open(cause) => {
                    println!("no device connected or failure opening the default one!");
                    error!("{}", cause);
                }
                other => error!("{}", other),
            }
            std::process::exit(err.exit_code());
        }
    }
}

fn launch() -> Result<LoopSummary, AppError> {
    let args = Args::parse_args(std::env::args_os())?;

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    protonect::CONFIG.store(Arc::new(config.clone()));

    let shutdown = ShutdownToken::new();
    try_install_interrupt_handler(&shutdown);

    let driver = SimulatedDriver::new(config.device.clone());
    let mut sink = display_sink(&config.display)?;

    app::run(&config, args.pipeline(), &driver, sink.as_mut(), &shutdown)
}

fn display_sink(display: &DisplayConfig) -> Result<Box<dyn DisplaySink>, AppError> {
    #[cfg(feature = "sdl-display")]
    if !display.headless {
        let sdl = protonect::display::SdlDisplay::new(display.window_scale)?;
        return Ok(Box::new(sdl));
    }

    #[cfg(not(feature = "sdl-display"))]
    if !display.headless {
        info!("Built without a window backend, running headless");
    }
    Ok(Box::new(HeadlessDisplay::new()))
}
