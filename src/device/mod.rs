//! Device drivers and the device session state machine

pub mod pipeline;
pub mod session;
pub mod sim;

use std::sync::Arc;

use tracing::debug;

use crate::capture::FrameListener;
use crate::error::DeviceError;

pub use pipeline::{PacketPipeline, PipelineKind};
pub use session::{DeviceSession, SessionState};
pub use sim::{SimulatedDevice, SimulatedDriver};

/// Connected device as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub name: String,
}

/// Entry point of a device library: enumeration and opening
pub trait Driver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    fn open(&self, serial: &str, pipeline: PipelineKind) -> Result<Box<dyn Device>, DeviceError>;

    /// Open the first enumerated device with `pipeline`, or the default backend
    fn open_default(&self, pipeline: Option<PipelineKind>) -> Result<Box<dyn Device>, DeviceError> {
        let devices = self.enumerate()?;
        let first = devices.first().ok_or(DeviceError::NoDeviceFound)?;
        debug!(serial = %first.serial, name = %first.name, "Opening default device");
        self.open(&first.serial, pipeline.unwrap_or_default())
    }
}

/// One opened device.
///
/// Listeners are registered before `start`; frames are pushed to them from
/// the device's own threads until `stop` returns.
pub trait Device: Send {
    fn serial_number(&self) -> String;

    fn firmware_version(&self) -> String;

    fn pipeline(&self) -> PipelineKind;

    fn set_color_frame_listener(&mut self, listener: Arc<dyn FrameListener>);

    fn set_ir_and_depth_frame_listener(&mut self, listener: Arc<dyn FrameListener>);

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}
