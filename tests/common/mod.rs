//! Deterministic frame sources and a conformant-decoder harness shared by
//! the integration suites.

#![allow(dead_code)]

use gifmill::{ConversionRequest, Frame, FrameSource, GifResult};
use imgref::ImgVec;
use rgb::RGBA8;

/// Gradient frames whose colors shift with the timestamp. Same timestamp,
/// same pixels, always.
pub struct SyntheticSource {
    pub width: usize,
    pub height: usize,
    pub duration: f64,
}

impl FrameSource for SyntheticSource {
    fn frame_at(&self, timestamp: f64) -> GifResult<Frame> {
        let step = (timestamp * 10.0).round() as u32;
        let mut pixels = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(RGBA8::new(
                    (x * 255 / self.width.max(1)) as u8,
                    (y * 255 / self.height.max(1)) as u8,
                    ((step * 7) % 256) as u8,
                    255,
                ));
            }
        }
        Ok(Frame::new(ImgVec::new(pixels, self.width, self.height), timestamp))
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// One flat color for every frame; quantizes exactly.
pub struct SolidSource {
    pub width: usize,
    pub height: usize,
    pub duration: f64,
    pub color: RGBA8,
}

impl FrameSource for SolidSource {
    fn frame_at(&self, timestamp: f64) -> GifResult<Frame> {
        Ok(Frame::new(
            ImgVec::new(vec![self.color; self.width * self.height], self.width, self.height),
            timestamp,
        ))
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

pub struct DecodedGif {
    pub screen_width: u16,
    pub screen_height: u16,
    pub frames: Vec<DecodedFrame>,
}

pub struct DecodedFrame {
    pub width: u16,
    pub height: u16,
    pub delay_cs: u16,
    /// The composited screen after this frame, from gif-dispose.
    pub screen: ImgVec<RGBA8>,
}

/// Decodes with the `gif` crate, compositing each frame the way a viewer
/// would.
pub fn decode(bytes: &[u8]) -> DecodedGif {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options
        .read_info(std::io::Cursor::new(bytes))
        .expect("produced GIF must parse");
    let mut screen = gif_dispose::Screen::new_decoder(&decoder);
    let screen_width = decoder.width();
    let screen_height = decoder.height();

    let mut frames = Vec::new();
    while let Some(frame) = decoder.read_next_frame().expect("frame must parse") {
        screen.blit_frame(frame).expect("frame must composite");
        frames.push(DecodedFrame {
            width: frame.width,
            height: frame.height,
            delay_cs: frame.delay,
            screen: screen.pixels().map_buf(|buf| buf.to_owned()),
        });
    }

    DecodedGif {
        screen_width,
        screen_height,
        frames,
    }
}

pub fn encode_to_vec(request: &ConversionRequest, source: &dyn FrameSource) -> Vec<u8> {
    let mut bytes = Vec::new();
    gifmill::convert_into(request, source, None, &mut bytes).expect("conversion must succeed");
    bytes
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Surfaces pipeline traces when a test runs with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
