//! Synchronizing frame listener
//!
//! Devices push individual frames into a [`FrameListener`]. The
//! [`SyncMultiFrameListener`] collects them until one frame of every
//! subscribed type is present and hands the complete set to a single
//! consumer. The consumer holds the set as a [`FrameSet`] guard; dropping the
//! guard releases it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tracing::{debug, warn};

use crate::capture::frame::{Frame, FrameType, FrameTypes};
use crate::error::AcquireError;

/// Receiving side of a device stream
pub trait FrameListener: Send + Sync {
    /// Offer a frame. Returns `false` if the listener did not take it.
    fn on_new_frame(&self, kind: FrameType, frame: Frame) -> bool;

    /// The device stopped producing for good (disconnect, pipeline fault)
    fn on_device_lost(&self) {}
}

/// One frame slot per stream type
#[derive(Default)]
struct FrameMap([Option<Frame>; 3]);

impl FrameMap {
    fn insert(&mut self, kind: FrameType, frame: Frame) {
        self.0[kind.index()] = Some(frame);
    }

    fn has_all(&self, types: FrameTypes) -> bool {
        types.iter().all(|k| self.0[k.index()].is_some())
    }
}

struct SyncState {
    next: FrameMap,
    ready: bool,
    current_released: bool,
    lost: bool,
}

#[derive(Default)]
pub struct ListenerStats {
    waits: AtomicU64,
    releases: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ListenerStats {
    /// Frame sets handed out by `wait_for_new_frame`
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Acquire)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Acquire)
    }

    /// Frames rejected because the consumer still held the previous set
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

struct Shared {
    types: FrameTypes,
    state: Mutex<SyncState>,
    cond: Condvar,
    stats: CachePadded<ListenerStats>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        self.lock().current_released = true;
        self.stats.releases.fetch_add(1, Ordering::AcqRel);
    }
}

impl FrameListener for Shared {
    fn on_new_frame(&self, kind: FrameType, frame: Frame) -> bool {
        if !self.types.contains(kind) {
            return false;
        }

        let mut state = self.lock();
        if !state.current_released {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("listener_frames_dropped").increment(1);
            return false;
        }

        state.next.insert(kind, frame);
        if state.next.has_all(self.types) {
            state.ready = true;
            self.cond.notify_one();
        }
        true
    }

    fn on_device_lost(&self) {
        warn!("Frame listener notified of device loss");
        self.lock().lost = true;
        self.cond.notify_all();
    }
}

/// Listener that delivers one synchronized set of the subscribed streams at a time
pub struct SyncMultiFrameListener {
    shared: Arc<Shared>,
}

impl SyncMultiFrameListener {
    pub fn new(types: FrameTypes) -> Self {
        Self {
            shared: Arc::new(Shared {
                types,
                state: Mutex::new(SyncState {
                    next: FrameMap::default(),
                    ready: false,
                    current_released: true,
                    lost: false,
                }),
                cond: Condvar::new(),
                stats: CachePadded::new(ListenerStats::default()),
            }),
        }
    }

    /// Producer handle to register with a device
    pub fn handle(&self) -> Arc<dyn FrameListener> {
        self.shared.clone()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.shared.stats
    }

    /// Block until a complete frame set is available.
    ///
    /// `None` waits without bound. The returned guard borrows the listener
    /// mutably, so it has to be dropped (released) before the next wait.
    pub fn wait_for_new_frame(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<FrameSet<'_>, AcquireError> {
        let shared = &*self.shared;
        let state = shared.lock();
        let pending = |s: &mut SyncState| !s.ready && !s.lost;

        let mut state = match timeout {
            Some(limit) => {
                let (state, result) = shared
                    .cond
                    .wait_timeout_while(state, limit, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && !state.ready && !state.lost {
                    return Err(AcquireError::Timeout(limit));
                }
                state
            }
            None => shared
                .cond
                .wait_while(state, pending)
                .unwrap_or_else(PoisonError::into_inner),
        };

        if !state.ready {
            return Err(AcquireError::DeviceLost);
        }

        let frames = std::mem::take(&mut state.next);
        state.ready = false;
        state.current_released = false;
        drop(state);

        let waits = shared.stats.waits.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(waits, "Frame set acquired");

        Ok(FrameSet {
            frames,
            shared,
        })
    }
}

/// A synchronized set of frames, valid until dropped
pub struct FrameSet<'a> {
    frames: FrameMap,
    shared: &'a Shared,
}

impl FrameSet<'_> {
    pub fn get(&self, kind: FrameType) -> Option<&Frame> {
        self.frames.0[kind.index()].as_ref()
    }

    pub fn color(&self) -> Option<&Frame> {
        self.get(FrameType::Color)
    }

    pub fn ir(&self) -> Option<&Frame> {
        self.get(FrameType::Ir)
    }

    pub fn depth(&self) -> Option<&Frame> {
        self.get(FrameType::Depth)
    }
}

impl Drop for FrameSet<'_> {
    fn drop(&mut self) {
        // Return buffers before accepting new frames
        self.frames = FrameMap::default();
        self.shared.release();
    }
}
