//! Display sinks for acquired frames

pub mod headless;
#[cfg(feature = "sdl-display")]
pub mod sdl;

use crate::capture::Frame;
use crate::error::DisplayError;

pub use headless::HeadlessDisplay;
#[cfg(feature = "sdl-display")]
pub use sdl::SdlDisplay;

/// Sample layout of an image handed to a sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelLayout {
    /// Packed 8-bit blue, green, red
    Bgr8,
    /// Native-endian f32, shown as gray after dividing by `scale`
    Gray32F { scale: f32 },
}

/// Borrowed view of one frame's samples
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: &'a [u8],
}

impl<'a> ImageView<'a> {
    pub fn bgr(frame: &'a Frame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            layout: PixelLayout::Bgr8,
            data: frame.data(),
        }
    }

    pub fn gray(frame: &'a Frame, scale: f32) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            layout: PixelLayout::Gray32F { scale },
            data: frame.data(),
        }
    }

    /// Gray levels in 0..=255 of a float image; `None` for color images
    pub fn gray_levels(&self) -> Option<impl Iterator<Item = u8> + 'a> {
        let PixelLayout::Gray32F { scale } = self.layout else {
            return None;
        };
        let scale = if scale > 0.0 { scale } else { 1.0 };
        Some(self.data.chunks_exact(4).map(move |b| {
            let v = f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) / scale;
            (v.clamp(0.0, 1.0) * 255.0) as u8
        }))
    }
}

/// Consumer of frame images, typically a set of windows
pub trait DisplaySink {
    /// Show `image` under `label`; the view is only valid for this call
    fn show(&mut self, label: &str, image: ImageView<'_>) -> Result<(), DisplayError>;

    /// Pump input and report whether the user asked to quit
    fn poll_exit(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, FrameType};

    #[test]
    fn test_gray_levels_scaled_and_clamped() {
        let mut frame = Frame::new(FrameMetadata::new(FrameType::Depth, 0, 4, 1));
        for (i, v) in [0.0, 2250.0, 4500.0, 9000.0].into_iter().enumerate() {
            frame.write_f32(i, v);
        }

        let view = ImageView::gray(&frame, 4500.0);
        let levels: Vec<u8> = view.gray_levels().unwrap().collect();
        assert_eq!(levels, vec![0, 127, 255, 255]);
    }

    #[test]
    fn test_color_view_has_no_gray_levels() {
        let frame = Frame::new(FrameMetadata::new(FrameType::Color, 0, 2, 2));
        let view = ImageView::bgr(&frame);
        assert_eq!(view.data.len(), 12);
        assert!(view.gray_levels().is_none());
    }
}
