pub mod frame;
pub mod listener;

pub use frame::{Frame, FrameMetadata, FramePool, FrameType, FrameTypes};
pub use listener::{FrameListener, FrameSet, ListenerStats, SyncMultiFrameListener};
