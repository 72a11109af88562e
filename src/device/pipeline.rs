//! Packet processing pipelines
//!
//! A pipeline turns raw packets coming off the device into frames. The
//! backend kind is chosen once, when the device is opened.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::frame::{Frame, FrameMetadata, FramePool, FrameType};

/// Depth packet processing backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Cpu,
    #[default]
    OpenGl,
    OpenCl,
}

impl PipelineKind {
    /// Whether this backend was compiled into the binary
    pub fn is_available(self) -> bool {
        match self {
            PipelineKind::Cpu | PipelineKind::OpenGl => true,
            PipelineKind::OpenCl => cfg!(feature = "opencl"),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineKind::Cpu => "CPU",
            PipelineKind::OpenGl => "OpenGL",
            PipelineKind::OpenCl => "OpenCL",
        };
        f.write_str(name)
    }
}

/// Raw color packet, already unpacked to BGR
pub struct RawColorPacket {
    pub sequence: u64,
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    pub bgr: Vec<u8>,
}

/// Raw depth packet: per-pixel IR amplitude and measured distance in millimetres
pub struct RawDepthPacket {
    pub sequence: u64,
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    pub amplitude: Vec<u16>,
    pub distance: Vec<u16>,
}

/// Valid depth window, in millimetres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub min_mm: f32,
    pub max_mm: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_mm: 500.0,
            max_mm: 4500.0,
        }
    }
}

pub trait DepthPacketProcessor: Send {
    fn name(&self) -> &'static str;

    /// Fill `ir` and `depth` from `packet`. Both frames match the packet geometry.
    fn process(&self, packet: &RawDepthPacket, ir: &mut Frame, depth: &mut Frame);
}

/// Host-side reference kernel. Depth outside the valid range reads as 0.
pub struct ReferenceDepthProcessor {
    kind: PipelineKind,
    range: DepthRange,
}

impl ReferenceDepthProcessor {
    pub fn new(kind: PipelineKind, range: DepthRange) -> Self {
        Self { kind, range }
    }
}

impl DepthPacketProcessor for ReferenceDepthProcessor {
    fn name(&self) -> &'static str {
        match self.kind {
            PipelineKind::Cpu => "cpu-depth",
            PipelineKind::OpenGl => "opengl-depth",
            PipelineKind::OpenCl => "opencl-depth",
        }
    }

    fn process(&self, packet: &RawDepthPacket, ir: &mut Frame, depth: &mut Frame) {
        let samples = packet.amplitude.iter().zip(&packet.distance).enumerate();
        for (i, (&amplitude, &distance)) in samples {
            ir.write_f32(i, f32::from(amplitude));

            let mm = f32::from(distance);
            let mm = if mm < self.range.min_mm || mm > self.range.max_mm {
                0.0
            } else {
                mm
            };
            depth.write_f32(i, mm);
        }
    }
}

/// Packet pipeline bound to one device
pub struct PacketPipeline {
    depth: Box<dyn DepthPacketProcessor>,
}

impl PacketPipeline {
    pub fn new(kind: PipelineKind) -> Self {
        Self::with_processor(Box::new(ReferenceDepthProcessor::new(
            kind,
            DepthRange::default(),
        )))
    }

    pub fn with_processor(depth: Box<dyn DepthPacketProcessor>) -> Self {
        Self { depth }
    }

    pub fn depth_processor_name(&self) -> &'static str {
        self.depth.name()
    }

    pub fn process_color(&self, packet: &RawColorPacket, pool: &Arc<FramePool>) -> Frame {
        let mut meta =
            FrameMetadata::new(FrameType::Color, packet.sequence, packet.width, packet.height);
        meta.device_timestamp = packet.timestamp;

        let mut frame = Frame::from_pool(meta, pool);
        let len = frame.data().len().min(packet.bgr.len());
        frame.data_mut()[..len].copy_from_slice(&packet.bgr[..len]);
        frame
    }

    /// Returns the IR and depth frames of one packet
    pub fn process_depth(&self, packet: &RawDepthPacket, pool: &Arc<FramePool>) -> (Frame, Frame) {
        let mut ir_meta =
            FrameMetadata::new(FrameType::Ir, packet.sequence, packet.width, packet.height);
        ir_meta.device_timestamp = packet.timestamp;
        let mut depth_meta = ir_meta.clone();
        depth_meta.kind = FrameType::Depth;

        let mut ir = Frame::from_pool(ir_meta, pool);
        let mut depth = Frame::from_pool(depth_meta, pool);
        self.depth.process(packet, &mut ir, &mut depth);
        (ir, depth)
    }
}
