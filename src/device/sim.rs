//! Simulated Kinect v2 class device
//!
//! Stands in for the USB device library. `start` brings up a tokio runtime
//! whose capture task emits raw color and depth packets at the configured
//! frame rate over a bounded flume channel. A processing thread turns the
//! packets into frames through the device's [`PacketPipeline`] and pushes
//! them to the registered listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TrySendError};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::capture::{FrameListener, FramePool, FrameType};
use crate::device::pipeline::{PacketPipeline, PipelineKind, RawColorPacket, RawDepthPacket};
use crate::device::{Device, DeviceInfo, Driver};
use crate::error::DeviceError;
use crate::DeviceConfig;

enum RawPacket {
    Color(RawColorPacket),
    Depth(RawDepthPacket),
}

/// Driver exposing `config.count` simulated devices
pub struct SimulatedDriver {
    config: DeviceConfig,
}

impl SimulatedDriver {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn serial(&self, index: usize) -> String {
        format!("{}{:09}", self.config.serial_prefix, index)
    }
}

impl Driver for SimulatedDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let devices: Vec<_> = (0..self.config.count)
            .map(|i| DeviceInfo {
                serial: self.serial(i),
                name: "Simulated Kinect v2".into(),
            })
            .collect();
        debug!("Enumerated {} simulated device(s)", devices.len());
        Ok(devices)
    }

    fn open(&self, serial: &str, pipeline: PipelineKind) -> Result<Box<dyn Device>, DeviceError> {
        if !(0..self.config.count).any(|i| self.serial(i) == serial) {
            return Err(DeviceError::DeviceNotFound(serial.to_string()));
        }
        if !pipeline.is_available() {
            return Err(DeviceError::Runtime(format!(
                "{pipeline} packet pipeline is not compiled in"
            )));
        }

        info!(serial, %pipeline, "Opening simulated device");
        Ok(Box::new(SimulatedDevice::new(
            serial.to_string(),
            self.config.clone(),
            pipeline,
        )))
    }
}

struct Running {
    runtime: Runtime,
    capture: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    processor: thread::JoinHandle<()>,
}

pub struct SimulatedDevice {
    serial: String,
    config: DeviceConfig,
    pipeline: PipelineKind,
    color_listener: Option<Arc<dyn FrameListener>>,
    ir_depth_listener: Option<Arc<dyn FrameListener>>,
    running: Option<Running>,
}

impl SimulatedDevice {
    pub fn new(serial: String, config: DeviceConfig, pipeline: PipelineKind) -> Self {
        Self {
            serial,
            config,
            pipeline,
            color_listener: None,
            ir_depth_listener: None,
            running: None,
        }
    }
}

impl Device for SimulatedDevice {
    fn serial_number(&self) -> String {
        self.serial.clone()
    }

    fn firmware_version(&self) -> String {
        self.config.firmware_version.clone()
    }

    fn pipeline(&self) -> PipelineKind {
        self.pipeline
    }

    fn set_color_frame_listener(&mut self, listener: Arc<dyn FrameListener>) {
        self.color_listener = Some(listener);
    }

    fn set_ir_and_depth_frame_listener(&mut self, listener: Arc<dyn FrameListener>) {
        self.ir_depth_listener = Some(listener);
    }

    #[instrument(skip(self), fields(serial = %self.serial))]
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.is_some() {
            return Err(DeviceError::StartFailure("device already streaming".into()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .thread_name("protonect-usb")
            .build()?;

        let (tx, rx) = flume::bounded(self.config.packet_queue.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let lost = Arc::new(AtomicBool::new(false));

        let capture = runtime.spawn(capture_packets(
            self.config.clone(),
            tx,
            stop_rx,
            lost.clone(),
        ));

        let worker = PacketWorker {
            pipeline: PacketPipeline::new(self.pipeline),
            pool: FramePool::new(self.config.pool_size),
            color: self.color_listener.clone(),
            ir_depth: self.ir_depth_listener.clone(),
            lost,
        };
        let processor = thread::Builder::new()
            .name("protonect-packets".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| DeviceError::StartFailure(e.to_string()))?;

        info!(
            "Streaming at {} fps ({}x{} color, {}x{} depth)",
            self.config.fps,
            self.config.color_width,
            self.config.color_height,
            self.config.depth_width,
            self.config.depth_height
        );

        self.running = Some(Running {
            runtime,
            capture,
            stop_tx,
            processor,
        });
        Ok(())
    }

    #[instrument(skip(self), fields(serial = %self.serial))]
    fn stop(&mut self) -> Result<(), DeviceError> {
        let Some(running) = self.running.take() else {
            debug!("Stop on idle device ignored");
            return Ok(());
        };

        // Receiver may be gone if the capture task already ended
        let _ = running.stop_tx.send(true);
        let capture = running.runtime.block_on(running.capture);
        running.runtime.shutdown_timeout(Duration::from_millis(100));

        // Capture task dropped the packet sender, so the processor drains and exits
        let processor = running.processor.join();

        capture.map_err(|e| DeviceError::Runtime(format!("capture task failed: {e}")))?;
        processor.map_err(|_| DeviceError::Runtime("packet processor panicked".into()))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.stop()?;
        self.color_listener = None;
        self.ir_depth_listener = None;
        debug!(serial = %self.serial, "Simulated device closed");
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop simulated device: {}", e);
        }
    }
}

/// Capture side: paces and emits raw packets until stopped
async fn capture_packets(
    config: DeviceConfig,
    tx: Sender<RawPacket>,
    mut stop: watch::Receiver<bool>,
    lost: Arc<AtomicBool>,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1)));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let epoch = Instant::now();
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        if config.disconnect_after_frames == Some(sequence) {
            warn!(sequence, "Simulated device disconnected");
            lost.store(true, Ordering::Release);
            break;
        }
        if config.stall_after_frames == Some(sequence) {
            warn!(sequence, "Simulated device stalled");
            let _ = stop.changed().await;
            break;
        }

        let timestamp = epoch.elapsed();
        let packets = [
            RawPacket::Color(color_packet(&config, sequence, timestamp)),
            RawPacket::Depth(depth_packet(&config, sequence, timestamp)),
        ];
        for packet in packets {
            match tx.try_send(packet) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    metrics::counter!("device_packets_dropped").increment(1);
                    debug!(sequence, "Packet queue full, dropping packet");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        sequence += 1;
    }
}

struct PacketWorker {
    pipeline: PacketPipeline,
    pool: Arc<FramePool>,
    color: Option<Arc<dyn FrameListener>>,
    ir_depth: Option<Arc<dyn FrameListener>>,
    lost: Arc<AtomicBool>,
}

impl PacketWorker {
    fn run(self, rx: Receiver<RawPacket>) {
        debug!(
            processor = self.pipeline.depth_processor_name(),
            "Packet processor running"
        );

        for packet in rx.iter() {
            match packet {
                RawPacket::Color(packet) => {
                    if let Some(listener) = &self.color {
                        let frame = self.pipeline.process_color(&packet, &self.pool);
                        listener.on_new_frame(FrameType::Color, frame);
                    }
                }
                RawPacket::Depth(packet) => {
                    if let Some(listener) = &self.ir_depth {
                        let (ir, depth) = self.pipeline.process_depth(&packet, &self.pool);
                        listener.on_new_frame(FrameType::Ir, ir);
                        listener.on_new_frame(FrameType::Depth, depth);
                    }
                }
            }
        }

        if self.lost.load(Ordering::Acquire) {
            for listener in self.color.iter().chain(self.ir_depth.iter()) {
                listener.on_device_lost();
            }
        }
        debug!("Packet processor finished");
    }
}

/// Moving diagonal gradient
fn color_packet(config: &DeviceConfig, sequence: u64, timestamp: Duration) -> RawColorPacket {
    let (width, height) = (config.color_width, config.color_height);
    let shift = (sequence * 4) as u32;
    let mut bgr = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            bgr.push((x.wrapping_add(shift) & 0xff) as u8);
            bgr.push((y & 0xff) as u8);
            bgr.push(((x + y) / 2).wrapping_add(shift) as u8);
        }
    }
    RawColorPacket {
        sequence,
        timestamp,
        width,
        height,
        bgr,
    }
}

/// Tilted plane that slowly moves back and forth, with an invalid border
fn depth_packet(config: &DeviceConfig, sequence: u64, timestamp: Duration) -> RawDepthPacket {
    let (width, height) = (config.depth_width, config.depth_height);
    let len = width as usize * height as usize;
    let offset = 500.0 * (sequence as f32 * 0.1).sin();
    let mut amplitude = Vec::with_capacity(len);
    let mut distance = Vec::with_capacity(len);

    for y in 0..height {
        for x in 0..width {
            let border = x < 4 || y < 4 || x + 4 >= width || y + 4 >= height;
            let plane = 1000.0 + 3000.0 * x as f32 / width.max(1) as f32 + offset;
            distance.push(if border { 0 } else { plane.max(0.0) as u16 });
            amplitude.push((((x ^ y) & 0xff) * 60 + (sequence % 1000) as u32) as u16);
        }
    }
    RawDepthPacket {
        sequence,
        timestamp,
        width,
        height,
        amplitude,
        distance,
    }
}
