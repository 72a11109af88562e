pub mod acquisition;
pub mod app;
pub mod capture;
pub mod cli;
pub mod device;
pub mod display;
pub mod error;
pub mod shutdown;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSet, FrameType, FrameTypes, SyncMultiFrameListener};
pub use device::{DeviceSession, PipelineKind};
pub use error::{AcquireError, AppError, DeviceError};
pub use shutdown::ShutdownToken;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment overrides, e.g. `PROTONECT__ACQUISITION__WAIT_TIMEOUT_MS=500`
pub const ENV_PREFIX: &str = "PROTONECT";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub acquisition: AcquisitionConfig,
    pub display: DisplayConfig,
}

/// Settings of the simulated device driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Devices reported on the bus
    pub count: usize,
    pub serial_prefix: String,
    pub firmware_version: String,
    pub fps: u32,
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    /// Raw packets buffered between capture and processing
    pub packet_queue: usize,
    /// Sample buffers kept for reuse
    pub pool_size: usize,
    /// Stop emitting packets after this many frames (device hangs)
    pub stall_after_frames: Option<u64>,
    /// Report device loss after this many frames
    pub disconnect_after_frames: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Bound on a single wait for a frame set; 0 waits forever
    pub wait_timeout_ms: u64,
    /// Consecutive timed-out waits tolerated before the device counts as stalled
    pub max_consecutive_timeouts: u32,
    /// Stop after this many frame sets
    pub max_frames: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub headless: bool,
    /// IR amplitude mapped to full white
    pub ir_scale: f32,
    /// Depth in millimetres mapped to full white
    pub depth_scale: f32,
    /// Window size relative to the frame size
    pub window_scale: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            count: 1,
            serial_prefix: "SIM".into(),
            firmware_version: "4.0.3916.0".into(),
            fps: 30,
            color_width: 1920,
            color_height: 1080,
            depth_width: 512,
            depth_height: 424,
            packet_queue: 4,
            pool_size: 8,
            stall_after_frames: None,
            disconnect_after_frames: None,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 1000,
            max_consecutive_timeouts: 3,
            max_frames: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            headless: false,
            ir_scale: 20000.0,
            depth_scale: 4500.0,
            window_scale: 0.5,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `PROTONECT__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

impl AcquisitionConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        match self.wait_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
