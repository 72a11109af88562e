use tracing::{debug, trace};

use crate::display::{DisplaySink, ImageView};
use crate::error::DisplayError;

/// Sink for runs without a window system. Never asks to quit.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images accepted so far
    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, label: &str, image: ImageView<'_>) -> Result<(), DisplayError> {
        self.shown += 1;
        trace!(label, width = image.width, height = image.height, "Frame");
        if self.shown % 300 == 0 {
            debug!("{} images consumed", self.shown);
        }
        Ok(())
    }

    fn poll_exit(&mut self) -> bool {
        false
    }
}
