//! GIF89a bitstream assembly.
//!
//! Emits, in order: signature, logical screen descriptor, global color
//! table (when a shared palette is in use), the NETSCAPE2.0 looping
//! extension, then per frame a graphic control extension, image descriptor,
//! optional local color table and LZW-compressed image data, and finally
//! the `0x3B` trailer. The format tolerates no structural deviation, so
//! everything here is byte-exact and covered by decoder round-trip tests.

use std::io::Write;

use crate::error::{Error, GifResult};
use crate::lzw;
use crate::quantize::{IndexedFrame, Palette};

const TRAILER: u8 = 0x3B;
const EXTENSION: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const GRAPHIC_CONTROL: u8 = 0xF9;
const APPLICATION: u8 = 0xFF;

/// How many times the animation plays.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum Repeat {
    Infinite,
    Once,
}

pub(crate) struct GifEncoder<W: Write> {
    writer: W,
    screen_width: u16,
    screen_height: u16,
    global: Option<Palette>,
    frames_written: usize,
}

impl<W: Write> GifEncoder<W> {
    /// Writes the stream preamble. `global` becomes the global color table;
    /// frames without a local palette index into it.
    pub fn new(
        mut writer: W,
        screen_width: u16,
        screen_height: u16,
        global: Option<&Palette>,
        repeat: Repeat,
    ) -> GifResult<Self> {
        if screen_width == 0 || screen_height == 0 {
            return Err(Error::Encoding("logical screen dimensions must be positive".into()));
        }

        writer.write_all(b"GIF89a")?;
        writer.write_all(&screen_width.to_le_bytes())?;
        writer.write_all(&screen_height.to_le_bytes())?;
        // color resolution 8 bits per channel; sort flag off
        let mut packed = 0x70u8;
        if let Some(palette) = global {
            packed |= 0x80 | (palette.table_bits() - 1);
        }
        writer.write_all(&[packed, 0, 0])?; // background index, pixel aspect
        if let Some(palette) = global {
            write_color_table(&mut writer, palette)?;
        }
        if repeat == Repeat::Infinite {
            writer.write_all(&[EXTENSION, APPLICATION, 11])?;
            writer.write_all(b"NETSCAPE2.0")?;
            writer.write_all(&[3, 1, 0, 0, 0])?; // loop count 0 = forever
        }

        Ok(GifEncoder {
            writer,
            screen_width,
            screen_height,
            global: global.cloned(),
            frames_written: 0,
        })
    }

    pub fn write_frame(&mut self, frame: &IndexedFrame) -> GifResult<()> {
        if frame.width > usize::from(self.screen_width) || frame.height > usize::from(self.screen_height) {
            return Err(Error::Encoding(format!(
                "frame {} is {}×{}, larger than the {}×{} logical screen",
                self.frames_written + 1,
                frame.width,
                frame.height,
                self.screen_width,
                self.screen_height,
            )));
        }
        let palette = match (&frame.palette, &self.global) {
            (Some(local), _) => local,
            (None, Some(global)) => global,
            (None, None) => {
                return Err(Error::Encoding("frame references a shared palette but none was set".into()))
            }
        };
        debug_assert_eq!(frame.indices.len(), frame.width * frame.height);
        debug_assert!(frame.indices.iter().all(|&i| usize::from(i) < palette.colors().len()));

        // graphic control: delay, and transparency when the palette reserves it
        let mut packed = 1 << 2; // keep previous frame in place
        let mut transparent = 0u8;
        if let Some(t) = palette.transparent() {
            packed = (2 << 2) | 1; // restore to background, transparency on
            transparent = t;
        }
        self.writer.write_all(&[EXTENSION, GRAPHIC_CONTROL, 4, packed])?;
        self.writer.write_all(&frame.delay_cs.to_le_bytes())?;
        self.writer.write_all(&[transparent, 0])?;

        // image descriptor, frames anchored at the screen origin
        self.writer.write_all(&[IMAGE_SEPARATOR])?;
        self.writer.write_all(&0u16.to_le_bytes())?;
        self.writer.write_all(&0u16.to_le_bytes())?;
        self.writer.write_all(&(frame.width as u16).to_le_bytes())?;
        self.writer.write_all(&(frame.height as u16).to_le_bytes())?;
        if let Some(local) = &frame.palette {
            self.writer.write_all(&[0x80 | (local.table_bits() - 1)])?;
            write_color_table(&mut self.writer, local)?;
        } else {
            self.writer.write_all(&[0])?;
        }

        let min_code_size = palette.min_code_size();
        self.writer.write_all(&[min_code_size])?;
        let mut compressed = Vec::with_capacity(frame.indices.len() / 4);
        lzw::compress(min_code_size, &frame.indices, &mut compressed);
        for block in compressed.chunks(255) {
            self.writer.write_all(&[block.len() as u8])?;
            self.writer.write_all(block)?;
        }
        self.writer.write_all(&[0])?;

        self.frames_written += 1;
        Ok(())
    }

    /// Writes the trailer and hands the sink back.
    pub fn finish(mut self) -> GifResult<W> {
        if self.frames_written == 0 {
            return Err(Error::Encoding("refusing to encode a GIF with no frames".into()));
        }
        self.writer.write_all(&[TRAILER])?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Color table entries are RGB; the table is padded with black up to its
/// declared power-of-two size. The transparent slot's color is irrelevant
/// to decoders and written as black.
fn write_color_table<W: Write>(writer: &mut W, palette: &Palette) -> GifResult<()> {
    let mut table = Vec::with_capacity(palette.table_len() * 3);
    for color in palette.colors() {
        table.extend_from_slice(&[color.r, color.g, color.b]);
    }
    table.resize(palette.table_len() * 3, 0);
    writer.write_all(&table)?;
    Ok(())
}
