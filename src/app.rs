//! One protonect run: open, stream, show, tear down

use tracing::{info, instrument, warn};

use crate::acquisition::{AcquisitionLoop, LoopSummary};
use crate::capture::{FrameTypes, SyncMultiFrameListener};
use crate::cli::PipelineSelection;
use crate::device::{DeviceSession, Driver};
use crate::display::DisplaySink;
use crate::error::{AppError, Result};
use crate::shutdown::ShutdownToken;
use crate::Config;

/// Open the default device of `driver` and stream it into `sink` until stopped.
///
/// The device is stopped and closed after the loop, whatever the loop's
/// outcome. A loop error wins over a teardown error.
#[instrument(skip_all, fields(pipeline = ?selection))]
pub fn run(
    config: &Config,
    selection: PipelineSelection,
    driver: &dyn Driver,
    sink: &mut dyn DisplaySink,
    shutdown: &ShutdownToken,
) -> Result<LoopSummary> {
    let mut session = DeviceSession::open(driver, selection.kind()).map_err(AppError::Open)?;

    let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
    session.register_listeners(listener.handle(), listener.handle())?;
    session.start()?;

    println!("device serial: {}", session.serial_number());
    println!("device firmware: {}", session.firmware_version());

    let acquisition = AcquisitionLoop::new(&config.acquisition, &config.display);
    let outcome = acquisition.run(&mut listener, sink, shutdown);

    let teardown = teardown(&mut session);
    match (outcome, teardown) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown_err)) => {
            warn!("Teardown after failed acquisition also failed: {}", teardown_err);
            Err(e)
        }
    }
}

fn teardown(session: &mut DeviceSession) -> Result<()> {
    session.stop().map_err(AppError::from)?;
    session.close().map_err(AppError::from)?;
    info!("Device session torn down");
    Ok(())
}
