/*
 gifmill — samples video frames into animated GIFs

 This program is free software: you can redistribute it and/or modify
 it under the terms of the GNU Affero General Public License as
 published by the Free Software Foundation, either version 3 of the
 License, or (at your option) any later version.

 This program is distributed in the hope that it will be useful,
 but WITHOUT ANY WARRANTY; without even the implied warranty of
 MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 GNU Affero General Public License for more details.

 You should have received a copy of the GNU Affero General Public License
 along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Turns a span of video into an animated GIF.
//!
//! A [`FrameSource`] supplies timestamped RGBA frames (decoding the actual
//! container/codec is the caller's business); the conversion samples it at
//! the requested rate, scales each frame into the size bound, composites an
//! optional overlay, quantizes to a ≤256-color palette and writes a GIF89a
//! stream with in-crate LZW compression.
//!
//! Conversions run as [`Operation`]s on a [`WorkQueue`]. Each operation
//! reports transformed frames through its preview callback (zero or more
//! calls, in timestamp order) and finishes with exactly one completion
//! callback carrying either the persisted [`Artifact`], the error that
//! stopped the run, or [`Error::Cancelled`] after a [`CancelHandle`] fired.
//! Cancellation is cooperative: in-progress steps finish, nothing further
//! starts, and no partial file is left under the destination name.
//!
//! For synchronous, queue-less use there is [`convert_into`], which writes
//! the encoded stream to any `io::Write` sink.

#[macro_use]
extern crate quick_error;

use std::io::Write;
use std::sync::atomic::AtomicBool;

use imgref::ImgVec;
use rgb::RGBA8;

mod encodegif;
mod error;
mod lzw;
mod operation;
mod pipeline;
mod quantize;
mod queue;
mod source;
mod transform;

pub use crate::error::{Error, GifResult};
pub use crate::operation::{Artifact, CancelHandle, CompletionFn, Operation};
pub use crate::pipeline::PreviewFn;
pub use crate::queue::WorkQueue;
pub use crate::source::FrameSource;

/// Default ceiling on the mean squared RGB remap error before a frame
/// abandons the shared palette for a local one (roughly a 12-step miss per
/// channel on average).
pub const DEFAULT_SHARED_PALETTE_ERROR_LIMIT: f64 = 450.0;

/// One raster image with its presentation time, owned by whichever pipeline
/// stage is currently working on it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: ImgVec<RGBA8>,
    /// Seconds since the start of the source.
    pub pts: f64,
}

impl Frame {
    pub fn new(image: ImgVec<RGBA8>, pts: f64) -> Self {
        Frame { image, pts }
    }
}

/// Output size bound; frames are scaled down to fit inside it, never up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaxSize {
    pub width: u32,
    pub height: u32,
}

/// Everything one conversion needs to know. Read-only once the operation
/// is created.
#[derive(Clone)]
pub struct ConversionRequest {
    /// Output sampling rate, frames per second.
    pub fps: f64,
    pub max_size: MaxSize,
    /// Window start in seconds; defaults to the start of the source.
    pub start: Option<f64>,
    /// Window end in seconds; defaults to (and is capped by) the source
    /// duration.
    pub end: Option<f64>,
    /// Composited over every sampled frame, anchored top-left.
    pub overlay: Option<ImgVec<RGBA8>>,
    /// If true, the GIF plays once instead of looping forever.
    pub once: bool,
    /// See [`DEFAULT_SHARED_PALETTE_ERROR_LIMIT`].
    pub shared_palette_error_limit: f64,
}

impl ConversionRequest {
    pub fn new(fps: f64, max_size: MaxSize) -> Self {
        ConversionRequest {
            fps,
            max_size,
            start: None,
            end: None,
            overlay: None,
            once: false,
            shared_palette_error_limit: DEFAULT_SHARED_PALETTE_ERROR_LIMIT,
        }
    }

    /// Checks the request's invariants. Operations refuse to be created
    /// from a request that fails here.
    pub fn validate(&self) -> GifResult<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(Error::InvalidRequest("frames per second must be positive".into()));
        }
        if self.max_size.width == 0 || self.max_size.height == 0 {
            return Err(Error::InvalidRequest("maximum size dimensions must be positive".into()));
        }
        if let Some(start) = self.start {
            if !start.is_finite() || start < 0.0 {
                return Err(Error::InvalidRequest("start time must be zero or later".into()));
            }
        }
        if let Some(end) = self.end {
            if !end.is_finite() || end <= 0.0 {
                return Err(Error::InvalidRequest("end time must be positive".into()));
            }
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(Error::InvalidRequest("start time must come before end time".into()));
            }
        }
        if !self.shared_palette_error_limit.is_finite() || self.shared_palette_error_limit < 0.0 {
            return Err(Error::InvalidRequest("palette error limit must be non-negative".into()));
        }
        Ok(())
    }
}

/// Runs one conversion synchronously in the calling thread and writes the
/// GIF to `sink`. No queue, no cancellation, no persistence; the preview
/// callback contract matches the queued path.
pub fn convert_into<W: Write>(
    request: &ConversionRequest,
    source: &dyn FrameSource,
    mut preview: Option<PreviewFn>,
    sink: &mut W,
) -> GifResult<()> {
    let never_cancelled = AtomicBool::new(false);
    let bytes = pipeline::run(request, source, &never_cancelled, preview.as_mut())?;
    sink.write_all(&bytes)?;
    Ok(())
}
