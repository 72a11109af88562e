//! Error types shared by the device session, the acquisition loop and the launcher

use std::time::Duration;

use thiserror::Error;

use crate::device::SessionState;

/// Failures reported by a driver or an opened device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no device connected or failure opening the default one")]
    NoDeviceFound,

    #[error("device with serial {0} not found")]
    DeviceNotFound(String),

    #[error("cannot {op} while the device is {state}")]
    InvalidState { op: &'static str, state: SessionState },

    #[error("failed to start device: {0}")]
    StartFailure(String),

    #[error("device runtime failure: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a wait on a frame listener that did not yield a frame set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("no synchronized frame set within {0:?}")]
    Timeout(Duration),

    #[error("device was lost while waiting for frames")]
    DeviceLost,
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display backend error: {0}")]
    Backend(String),
}

/// Top-level error of a protonect run
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Opening the default device failed, for whatever reason
    #[error("no device connected or failure opening the default one: {0}")]
    Open(#[source] DeviceError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error("device stalled: {timeouts} consecutive waits timed out")]
    DeviceStalled { timeouts: u32 },
}

impl AppError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Usage(_) | AppError::Config(_) => 1,
            AppError::Open(_) => -1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
