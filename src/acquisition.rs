//! Frame acquisition loop: wait, show, release, until told to stop

use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::capture::{FrameSet, FrameType, SyncMultiFrameListener};
use crate::display::{DisplaySink, ImageView};
use crate::error::{AcquireError, AppError};
use crate::shutdown::ShutdownToken;
use crate::{AcquisitionConfig, DisplayConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown token was set (interrupt signal)
    Shutdown,
    /// The display sink reported an exit request (Escape, window closed)
    UserExit,
    /// Configured frame set limit reached
    FrameLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub frame_sets: u64,
    pub timeouts: u64,
    pub exit_reason: ExitReason,
}

pub struct AcquisitionLoop {
    wait_timeout: Option<Duration>,
    max_consecutive_timeouts: u32,
    max_frames: Option<u64>,
    ir_scale: f32,
    depth_scale: f32,
}

impl AcquisitionLoop {
    pub fn new(acquisition: &AcquisitionConfig, display: &DisplayConfig) -> Self {
        Self {
            wait_timeout: acquisition.wait_timeout(),
            max_consecutive_timeouts: acquisition.max_consecutive_timeouts,
            max_frames: acquisition.max_frames,
            ir_scale: display.ir_scale,
            depth_scale: display.depth_scale,
        }
    }

    /// Run until shutdown, a sink exit request or the frame limit.
    ///
    /// Every acquired frame set is released before the next wait and before
    /// returning, on error paths included. A timed-out wait is retried;
    /// `max_consecutive_timeouts` of them in a row (when non-zero) end the
    /// loop with [`AppError::DeviceStalled`]. Device loss ends it immediately.
    #[instrument(skip_all)]
    pub fn run(
        &self,
        listener: &mut SyncMultiFrameListener,
        sink: &mut dyn DisplaySink,
        shutdown: &ShutdownToken,
    ) -> Result<LoopSummary, AppError> {
        let mut summary = LoopSummary {
            frame_sets: 0,
            timeouts: 0,
            exit_reason: ExitReason::Shutdown,
        };
        let mut consecutive_timeouts: u32 = 0;

        while !shutdown.is_requested() {
            let frames = match listener.wait_for_new_frame(self.wait_timeout) {
                Ok(frames) => frames,
                Err(AcquireError::Timeout(limit)) => {
                    summary.timeouts += 1;
                    consecutive_timeouts += 1;
                    metrics::counter!("acquisition_wait_timeouts").increment(1);
                    warn!(
                        consecutive = consecutive_timeouts,
                        "No frame set within {:?}", limit
                    );

                    if shutdown.is_requested() {
                        break;
                    }
                    if self.max_consecutive_timeouts > 0
                        && consecutive_timeouts >= self.max_consecutive_timeouts
                    {
                        error!("Device stalled, giving up");
                        return Err(AppError::DeviceStalled {
                            timeouts: consecutive_timeouts,
                        });
                    }
                    continue;
                }
                Err(e) => {
                    error!("Frame acquisition failed: {}", e);
                    return Err(e.into());
                }
            };
            consecutive_timeouts = 0;

            let user_exit = self.present(&frames, sink)?;

            // Release before the next wait
            drop(frames);
            summary.frame_sets += 1;
            metrics::counter!("frame_sets_acquired").increment(1);

            if user_exit {
                summary.exit_reason = ExitReason::UserExit;
                break;
            }
            if self.max_frames.is_some_and(|max| summary.frame_sets >= max) {
                summary.exit_reason = ExitReason::FrameLimit;
                break;
            }
        }

        info!(
            frame_sets = summary.frame_sets,
            timeouts = summary.timeouts,
            reason = ?summary.exit_reason,
            "Acquisition loop finished"
        );
        Ok(summary)
    }

    /// Hand the set's streams to the sink and poll it for an exit request
    fn present(&self, frames: &FrameSet<'_>, sink: &mut dyn DisplaySink) -> Result<bool, AppError> {
        let started = Instant::now();

        for kind in FrameType::ALL {
            let Some(frame) = frames.get(kind) else {
                continue;
            };
            let view = match kind {
                FrameType::Color => ImageView::bgr(frame),
                FrameType::Ir => ImageView::gray(frame, self.ir_scale),
                FrameType::Depth => ImageView::gray(frame, self.depth_scale),
            };
            sink.show(kind.label(), view)?;
            metrics::histogram!("frame_latency_us", "stream" => kind.label())
                .record(frame.timestamp.elapsed().as_micros() as f64);
        }
        debug!("Frame set shown");

        let exit = sink.poll_exit();
        metrics::histogram!("display_time_us").record(started.elapsed().as_micros() as f64);
        Ok(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, FrameListener, FrameMetadata, FrameTypes};
    use crate::error::DisplayError;
    use std::sync::Arc;

    /// Sink that records what it was shown and can trip the token or exit
    #[derive(Default)]
    struct ScriptedSink {
        labels: Vec<String>,
        sets_seen: u64,
        exit_after: Option<u64>,
        shutdown_after: Option<(u64, ShutdownToken)>,
        fail_on: Option<u64>,
    }

    impl DisplaySink for ScriptedSink {
        fn show(&mut self, label: &str, _image: ImageView<'_>) -> Result<(), DisplayError> {
            if self.fail_on == Some(self.sets_seen + 1) {
                return Err(DisplayError::Backend("lost window".into()));
            }
            self.labels.push(label.to_string());
            Ok(())
        }

        fn poll_exit(&mut self) -> bool {
            self.sets_seen += 1;
            if let Some((after, token)) = &self.shutdown_after {
                if self.sets_seen >= *after {
                    token.request();
                }
            }
            self.exit_after.is_some_and(|n| self.sets_seen >= n)
        }
    }

    fn push_set(handle: &Arc<dyn FrameListener>, sequence: u64) {
        for kind in FrameType::ALL {
            handle.on_new_frame(kind, Frame::new(FrameMetadata::new(kind, sequence, 2, 2)));
        }
    }

    /// Keeps a set queued whenever the previous one was released
    fn feeder(handle: Arc<dyn FrameListener>, token: ShutdownToken) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let mut sequence = 0;
            while !token.is_requested() {
                push_set(&handle, sequence);
                sequence += 1;
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    }

    fn acquisition(wait_timeout_ms: u64, max_consecutive_timeouts: u32) -> AcquisitionLoop {
        AcquisitionLoop::new(
            &AcquisitionConfig {
                wait_timeout_ms,
                max_consecutive_timeouts,
                max_frames: None,
            },
            &DisplayConfig::default(),
        )
    }

    #[test]
    fn test_shutdown_before_start_skips_waiting() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let token = ShutdownToken::new();
        token.request();

        let summary = acquisition(10, 3)
            .run(&mut listener, &mut ScriptedSink::default(), &token)
            .unwrap();

        assert_eq!(summary.frame_sets, 0);
        assert_eq!(listener.stats().waits(), 0);
    }

    #[test]
    fn test_shutdown_during_iteration_finishes_that_iteration() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let token = ShutdownToken::new();
        let feeder_stop = ShutdownToken::new();
        let producer = feeder(listener.handle(), feeder_stop.clone());

        let mut sink = ScriptedSink {
            shutdown_after: Some((3, token.clone())),
            ..ScriptedSink::default()
        };
        let summary = acquisition(1000, 3)
            .run(&mut listener, &mut sink, &token)
            .unwrap();
        feeder_stop.request();
        producer.join().unwrap();

        assert_eq!(summary.frame_sets, 3);
        assert_eq!(summary.exit_reason, ExitReason::Shutdown);
        assert_eq!(listener.stats().waits(), 3);
        assert_eq!(listener.stats().releases(), 3);
        assert_eq!(&sink.labels[..3], &["rgb", "ir", "depth"]);
    }

    #[test]
    fn test_sink_exit_request_ends_loop() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let token = ShutdownToken::new();
        let feeder_stop = ShutdownToken::new();
        let producer = feeder(listener.handle(), feeder_stop.clone());

        let mut sink = ScriptedSink {
            exit_after: Some(2),
            ..ScriptedSink::default()
        };
        let summary = acquisition(1000, 3)
            .run(&mut listener, &mut sink, &token)
            .unwrap();
        feeder_stop.request();
        producer.join().unwrap();

        assert_eq!(summary.exit_reason, ExitReason::UserExit);
        assert_eq!(summary.frame_sets, 2);
        assert!(!token.is_requested());
        assert_eq!(listener.stats().releases(), 2);
    }

    #[test]
    fn test_frame_limit() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let feeder_stop = ShutdownToken::new();
        let producer = feeder(listener.handle(), feeder_stop.clone());

        let acquisition = AcquisitionLoop::new(
            &AcquisitionConfig {
                max_frames: Some(4),
                ..AcquisitionConfig::default()
            },
            &DisplayConfig::default(),
        );
        let summary = acquisition
            .run(&mut listener, &mut ScriptedSink::default(), &ShutdownToken::new())
            .unwrap();
        feeder_stop.request();
        producer.join().unwrap();

        assert_eq!(summary.exit_reason, ExitReason::FrameLimit);
        assert_eq!(summary.frame_sets, 4);
    }

    #[test]
    fn test_consecutive_timeouts_mean_stall() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let err = acquisition(5, 3)
            .run(&mut listener, &mut ScriptedSink::default(), &ShutdownToken::new())
            .unwrap_err();

        assert!(matches!(err, AppError::DeviceStalled { timeouts: 3 }));
        assert_eq!(listener.stats().waits(), 0);
    }

    #[test]
    fn test_timeout_streak_resets_on_frames() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let handle = listener.handle();
        let token = ShutdownToken::new();

        // One timeout, one set, one timeout, one set: never three in a row
        let producer = std::thread::spawn(move || {
            for sequence in 0..2 {
                std::thread::sleep(Duration::from_millis(45));
                push_set(&handle, sequence);
            }
        });

        let mut sink = ScriptedSink {
            exit_after: Some(2),
            ..ScriptedSink::default()
        };
        let summary = acquisition(30, 3).run(&mut listener, &mut sink, &token);
        producer.join().unwrap();

        let summary = summary.unwrap();
        assert_eq!(summary.frame_sets, 2);
        assert!(summary.timeouts >= 2);
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        listener.handle().on_device_lost();

        let err = acquisition(1000, 3)
            .run(&mut listener, &mut ScriptedSink::default(), &ShutdownToken::new())
            .unwrap_err();
        assert!(matches!(err, AppError::Acquire(AcquireError::DeviceLost)));
    }

    #[test]
    fn test_sink_error_still_releases() {
        let mut listener = SyncMultiFrameListener::new(FrameTypes::ALL);
        let handle = listener.handle();
        push_set(&handle, 0);

        let mut sink = ScriptedSink {
            fail_on: Some(1),
            ..ScriptedSink::default()
        };
        let err = acquisition(1000, 3)
            .run(&mut listener, &mut sink, &ShutdownToken::new())
            .unwrap_err();

        assert!(matches!(err, AppError::Display(_)));
        assert_eq!(listener.stats().waits(), 1);
        assert_eq!(listener.stats().releases(), 1);
    }
}
