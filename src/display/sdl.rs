//! SDL2 Window Display Module
//! One window per stream label, created on first use.

use std::collections::HashMap;

use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Scancode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl, VideoSubsystem};
use tracing::{debug, info};

use crate::display::{DisplaySink, ImageView, PixelLayout};
use crate::error::DisplayError;

fn backend<E: ToString>(e: E) -> DisplayError {
    DisplayError::Backend(e.to_string())
}

/// Shape a streaming texture was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextureKey {
    format: PixelFormatEnum,
    width: u32,
    height: u32,
}

struct StreamTexture {
    key: TextureKey,
    texture: Texture,
}

struct StreamWindow {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    texture: Option<StreamTexture>,
    rgb: Vec<u8>,
}

fn needs_new_texture(cached: Option<TextureKey>, wanted: TextureKey) -> bool {
    cached != Some(wanted)
}

/// Texture of `slot`, recreated only when the frame shape changes
fn streaming_texture<'a>(
    slot: &'a mut Option<StreamTexture>,
    creator: &TextureCreator<WindowContext>,
    key: TextureKey,
) -> Result<&'a mut Texture, DisplayError> {
    if needs_new_texture(slot.as_ref().map(|t| t.key), key) {
        if let Some(stale) = slot.take() {
            // SAFETY: created by this window's renderer, which outlives the slot
            unsafe { stale.texture.destroy() };
        }
        let texture = creator
            .create_texture_streaming(key.format, key.width, key.height)
            .map_err(backend)?;
        debug!(?key, "Streaming texture created");
        *slot = Some(StreamTexture { key, texture });
    }
    slot.as_mut()
        .map(|t| &mut t.texture)
        .ok_or_else(|| DisplayError::Backend("texture missing".into()))
}

/// SDL2 Window Display
/// Escape or closing any window requests exit.
pub struct SdlDisplay {
    _sdl: Sdl,
    video: VideoSubsystem,
    event_pump: EventPump,
    windows: HashMap<String, StreamWindow>,
    scale: f32,
}

impl SdlDisplay {
    pub fn new(scale: f32) -> Result<Self, DisplayError> {
        let sdl = sdl2::init().map_err(backend)?;
        let video = sdl.video().map_err(backend)?;
        let event_pump = sdl.event_pump().map_err(backend)?;

        Ok(Self {
            _sdl: sdl,
            video,
            event_pump,
            windows: HashMap::new(),
            scale: if scale > 0.0 { scale } else { 1.0 },
        })
    }

    fn window(&mut self, label: &str, width: u32, height: u32) -> Result<&mut StreamWindow, DisplayError> {
        if !self.windows.contains_key(label) {
            let w = ((width as f32 * self.scale) as u32).max(1);
            let h = ((height as f32 * self.scale) as u32).max(1);
            let window = self
                .video
                .window(label, w, h)
                .position_centered()
                .resizable()
                .build()
                .map_err(backend)?;
            let canvas = window.into_canvas().build().map_err(backend)?;
            let texture_creator = canvas.texture_creator();
            info!(label, w, h, "Window created");

            self.windows.insert(
                label.to_string(),
                StreamWindow {
                    canvas,
                    texture_creator,
                    texture: None,
                    rgb: Vec::new(),
                },
            );
        }
        self.windows
            .get_mut(label)
            .ok_or_else(|| DisplayError::Backend(format!("window {label} missing")))
    }
}

impl DisplaySink for SdlDisplay {
    fn show(&mut self, label: &str, image: ImageView<'_>) -> Result<(), DisplayError> {
        let stream = self.window(label, image.width, image.height)?;

        let (format, pixels): (PixelFormatEnum, &[u8]) = match image.layout {
            PixelLayout::Bgr8 => (PixelFormatEnum::BGR24, image.data),
            PixelLayout::Gray32F { .. } => {
                stream.rgb.clear();
                if let Some(levels) = image.gray_levels() {
                    stream.rgb.extend(levels.flat_map(|v| [v, v, v]));
                }
                (PixelFormatEnum::RGB24, stream.rgb.as_slice())
            }
        };

        let key = TextureKey {
            format,
            width: image.width,
            height: image.height,
        };
        let texture = streaming_texture(&mut stream.texture, &stream.texture_creator, key)?;
        texture
            .update(None, pixels, (image.width * 3) as usize)
            .map_err(backend)?;

        stream.canvas.clear();
        stream.canvas.copy(texture, None, None).map_err(backend)?;
        stream.canvas.present();
        Ok(())
    }

    fn poll_exit(&mut self) -> bool {
        let mut exit = false;
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::Window {
                    win_event: WindowEvent::Close,
                    ..
                } => {
                    info!("Quit event received");
                    exit = true;
                }
                Event::KeyDown {
                    scancode: Some(Scancode::Escape),
                    ..
                } => {
                    info!("Escape pressed");
                    exit = true;
                }
                _ => {}
            }
        }
        exit
    }
}
