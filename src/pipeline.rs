//! End-to-end drive of one conversion run.
//!
//! Stages run strictly in order within one worker: sample, transform,
//! quantize, encode. Cancellation is cooperative and checked before every
//! stage transition and before each frame inside a stage; a step already in
//! progress runs to completion.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};

use imgref::ImgRef;
use rgb::RGBA8;

use crate::encodegif::{GifEncoder, Repeat};
use crate::error::{Error, GifResult};
use crate::quantize::{self, IndexedFrame, Palette};
use crate::source::FrameSource;
use crate::transform;
use crate::ConversionRequest;

/// Invoked with each transformed frame and its presentation timestamp,
/// in sampling order, before the frame is quantized.
pub type PreviewFn = Box<dyn FnMut(ImgRef<'_, RGBA8>, f64) + Send>;

#[derive(Debug, Copy, Clone, PartialEq)]
enum Stage {
    Sampling,
    Quantizing,
    Encoding,
}

/// Runs the whole pipeline and returns the encoded GIF bytes.
/// Persistence and completion reporting belong to the operation layer.
pub(crate) fn run(
    request: &ConversionRequest,
    source: &dyn FrameSource,
    cancel: &AtomicBool,
    mut preview: Option<&mut PreviewFn>,
) -> GifResult<Vec<u8>> {
    request.validate()?;

    let duration = source.duration();
    let timestamps = sample_timestamps(request, duration);
    tracing::debug!(frames = timestamps.len(), duration, "conversion planned");

    // One raw frame in flight at a time: the next timestamp is not requested
    // until the current frame has been transformed and previewed.
    enter(Stage::Sampling, cancel)?;
    let overlay = request.overlay.as_ref().map(|o| o.as_ref());
    let mut frames = Vec::with_capacity(timestamps.len());
    for &ts in &timestamps {
        ensure_live(cancel)?;
        let sampled = source.frame_at(ts)?;
        let frame = transform::transform(sampled, request.max_size, overlay)?;
        if let Some(cb) = preview.as_mut() {
            // a broken preview consumer must not take the conversion down
            if catch_unwind(AssertUnwindSafe(|| (**cb)(frame.image.as_ref(), frame.pts))).is_err() {
                tracing::warn!(pts = frame.pts, "preview callback panicked, continuing");
            }
        }
        frames.push(frame);
    }
    if frames.is_empty() {
        return Err(Error::Encoding("the requested time window contains no frames".into()));
    }

    enter(Stage::Quantizing, cancel)?;
    let delay_cs = delay_centiseconds(request.fps);
    let samples: Vec<ImgRef<'_, RGBA8>> = sample_indices(frames.len())
        .map(|i| frames[i].image.as_ref())
        .collect();
    let shared = Palette::from_frames(&samples)?;
    drop(samples);

    let mut indexed = Vec::with_capacity(frames.len());
    for frame in &frames {
        ensure_live(cancel)?;
        let image = frame.image.as_ref();
        let (indices, error) = quantize::remap(image, &shared)?;
        let palette = if error > request.shared_palette_error_limit {
            tracing::debug!(pts = frame.pts, error, "shared palette too lossy, using a local one");
            Some(Palette::from_frames(&[image])?)
        } else {
            None
        };
        let indices = match &palette {
            Some(local) => quantize::remap(image, local)?.0,
            None => indices,
        };
        indexed.push(IndexedFrame {
            width: image.width(),
            height: image.height(),
            indices,
            palette,
            delay_cs,
        });
    }

    enter(Stage::Encoding, cancel)?;
    let screen_width = indexed.iter().map(|f| f.width).max().unwrap_or(0);
    let screen_height = indexed.iter().map(|f| f.height).max().unwrap_or(0);
    if screen_width > usize::from(u16::MAX) || screen_height > usize::from(u16::MAX) {
        return Err(Error::Encoding(format!(
            "logical screen {}×{} exceeds the GIF dimension limit",
            screen_width, screen_height,
        )));
    }
    let repeat = if request.once { Repeat::Once } else { Repeat::Infinite };
    let mut encoder = GifEncoder::new(
        Vec::new(),
        screen_width as u16,
        screen_height as u16,
        Some(&shared),
        repeat,
    )?;
    for frame in &indexed {
        ensure_live(cancel)?;
        encoder.write_frame(frame)?;
    }
    let bytes = encoder.finish()?;
    tracing::debug!(frames = indexed.len(), bytes = bytes.len(), "conversion encoded");
    Ok(bytes)
}

/// `start + k / fps` for `k = 0, 1, …` while inside the window. The end of
/// the window defaults to, and is capped by, the source duration.
fn sample_timestamps(request: &ConversionRequest, duration: f64) -> Vec<f64> {
    let start = request.start.unwrap_or(0.0);
    let end = request.end.unwrap_or(duration).min(duration);
    if !end.is_finite() || end <= start {
        return Vec::new();
    }
    let mut timestamps = Vec::new();
    let mut k = 0u64;
    loop {
        let ts = start + k as f64 / request.fps;
        if ts >= end {
            break;
        }
        timestamps.push(ts);
        k += 1;
    }
    timestamps
}

/// Frames the shared palette is built from: first, middle, last.
fn sample_indices(len: usize) -> impl Iterator<Item = usize> {
    let mut picks = vec![0, len / 2, len - 1];
    picks.dedup();
    picks.into_iter()
}

fn delay_centiseconds(fps: f64) -> u16 {
    // zero-delay frames are ignored by several viewers; floor at 1cs
    (100.0 / fps).round().clamp(1.0, f64::from(u16::MAX)) as u16
}

fn enter(stage: Stage, cancel: &AtomicBool) -> GifResult<()> {
    ensure_live(cancel)?;
    tracing::debug!(?stage, "entering stage");
    Ok(())
}

#[inline]
fn ensure_live(cancel: &AtomicBool) -> GifResult<()> {
    if cancel.load(SeqCst) {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
