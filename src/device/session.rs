use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::capture::FrameListener;
use crate::device::{Device, Driver, PipelineKind};
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Started,
    Stopped,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Opened => "opened",
            SessionState::Started => "started",
            SessionState::Stopped => "stopped",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle guard around one opened device.
///
/// Enforces Opened -> Started -> Stopped -> Closed and keeps the registered
/// listeners alive until the device is stopped. Dropping an unclosed session
/// stops and closes the device.
pub struct DeviceSession {
    device: Box<dyn Device>,
    state: SessionState,
    listeners: Vec<Arc<dyn FrameListener>>,
}

impl DeviceSession {
    /// Open the default device of `driver`
    pub fn open(driver: &dyn Driver, pipeline: Option<PipelineKind>) -> Result<Self, DeviceError> {
        let device = driver.open_default(pipeline)?;
        info!(
            serial = %device.serial_number(),
            pipeline = %device.pipeline(),
            "Device opened"
        );
        Ok(Self::from_device(device))
    }

    pub fn from_device(device: Box<dyn Device>) -> Self {
        Self {
            device,
            state: SessionState::Opened,
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn serial_number(&self) -> String {
        self.device.serial_number()
    }

    pub fn firmware_version(&self) -> String {
        self.device.firmware_version()
    }

    pub fn pipeline(&self) -> PipelineKind {
        self.device.pipeline()
    }

    fn expect_state(&self, op: &'static str, allowed: &[SessionState]) -> Result<(), DeviceError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DeviceError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    pub fn register_listeners(
        &mut self,
        color: Arc<dyn FrameListener>,
        ir_and_depth: Arc<dyn FrameListener>,
    ) -> Result<(), DeviceError> {
        self.expect_state("register listeners", &[SessionState::Opened])?;

        self.device.set_color_frame_listener(color.clone());
        self.device.set_ir_and_depth_frame_listener(ir_and_depth.clone());
        self.listeners.push(color);
        self.listeners.push(ir_and_depth);
        Ok(())
    }

    /// Start streaming. Only one start is permitted per session.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.expect_state("start", &[SessionState::Opened])?;
        self.device.start()?;
        self.state = SessionState::Started;
        info!("Device started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DeviceError> {
        self.expect_state("stop", &[SessionState::Started])?;
        // A failed stop still leaves the session stopped
        self.state = SessionState::Stopped;
        self.device.stop()?;
        info!("Device stopped");
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        self.expect_state("close", &[SessionState::Opened, SessionState::Stopped])?;
        self.state = SessionState::Closed;
        self.device.close()?;
        self.listeners.clear();
        info!("Device closed");
        Ok(())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.state == SessionState::Started {
            if let Err(e) = self.stop() {
                warn!("Failed to stop device on drop: {}", e);
            }
        }
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                warn!("Failed to close device on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameTypes, SyncMultiFrameListener};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<&'static str>>);

    impl Calls {
        fn push(&self, call: &'static str) {
            self.0.lock().unwrap().push(call);
        }

        fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct FakeDevice(Arc<Calls>);

    impl Device for FakeDevice {
        fn serial_number(&self) -> String {
            "000000000001".into()
        }

        fn firmware_version(&self) -> String {
            "1.0".into()
        }

        fn pipeline(&self) -> PipelineKind {
            PipelineKind::Cpu
        }

        fn set_color_frame_listener(&mut self, _listener: Arc<dyn FrameListener>) {
            self.0.push("color listener");
        }

        fn set_ir_and_depth_frame_listener(&mut self, _listener: Arc<dyn FrameListener>) {
            self.0.push("ir/depth listener");
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            self.0.push("start");
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DeviceError> {
            self.0.push("stop");
            Ok(())
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.0.push("close");
            Ok(())
        }
    }

    fn session() -> (DeviceSession, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let session = DeviceSession::from_device(Box::new(FakeDevice(calls.clone())));
        (session, calls)
    }

    #[test]
    fn test_full_lifecycle_order() {
        let (mut session, calls) = session();
        let listener = SyncMultiFrameListener::new(FrameTypes::ALL);

        session
            .register_listeners(listener.handle(), listener.handle())
            .unwrap();
        session.start().unwrap();
        session.stop().unwrap();
        session.close().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            calls.take(),
            vec!["color listener", "ir/depth listener", "start", "stop", "close"]
        );
    }

    #[test]
    fn test_second_start_rejected() {
        let (mut session, calls) = session();
        session.start().unwrap();

        let err = session.start().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::InvalidState {
                op: "start",
                state: SessionState::Started
            }
        ));
        assert_eq!(calls.take(), vec!["start"]);
    }

    #[test]
    fn test_restart_after_stop_rejected() {
        let (mut session, _calls) = session();
        session.start().unwrap();
        session.stop().unwrap();
        assert!(session.start().is_err());
    }

    #[test]
    fn test_close_requires_stop() {
        let (mut session, calls) = session();
        session.start().unwrap();

        assert!(session.close().is_err());
        assert_eq!(session.state(), SessionState::Started);
        assert_eq!(calls.take(), vec!["start"]);
    }

    #[test]
    fn test_registration_after_start_rejected() {
        let (mut session, _calls) = session();
        let listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        session.start().unwrap();

        assert!(session
            .register_listeners(listener.handle(), listener.handle())
            .is_err());
    }

    /// Device whose stop reports a USB error
    struct StopFails(Arc<Calls>);

    impl Device for StopFails {
        fn serial_number(&self) -> String {
            "000000000002".into()
        }

        fn firmware_version(&self) -> String {
            "1.0".into()
        }

        fn pipeline(&self) -> PipelineKind {
            PipelineKind::Cpu
        }

        fn set_color_frame_listener(&mut self, _listener: Arc<dyn FrameListener>) {}

        fn set_ir_and_depth_frame_listener(&mut self, _listener: Arc<dyn FrameListener>) {}

        fn start(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DeviceError> {
            self.0.push("stop");
            Err(DeviceError::Runtime("transfer cancelled".into()))
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.0.push("close");
            Ok(())
        }
    }

    #[test]
    fn test_failed_stop_still_allows_close() {
        let calls = Arc::new(Calls::default());
        let mut session = DeviceSession::from_device(Box::new(StopFails(calls.clone())));
        session.start().unwrap();

        assert!(session.stop().is_err());
        assert_eq!(session.state(), SessionState::Stopped);
        session.close().unwrap();
        assert_eq!(calls.take(), vec!["stop", "close"]);
    }

    #[test]
    fn test_drop_stops_then_closes() {
        let (mut session, calls) = session();
        session.start().unwrap();
        drop(session);
        assert_eq!(calls.take(), vec!["start", "stop", "close"]);
    }
}
