//! Boundary with whatever decodes the actual video.

use crate::error::GifResult;
use crate::Frame;

/// Supplies timestamped RGBA frames on demand.
///
/// The conversion pipeline drives this with monotonically increasing
/// timestamps, but implementations must tolerate repeated and out-of-order
/// calls. A source may be shared by several concurrent conversions, each
/// owning its own sequence of requested timestamps, so all access is through
/// `&self`.
///
/// `frame_at` may block on I/O; the pipeline runs it on a queue worker.
pub trait FrameSource: Send + Sync {
    /// Decode the frame nearest to `timestamp` (seconds from source start).
    ///
    /// Fails with [`Error::FrameSource`](crate::Error::FrameSource) when the
    /// source is unreadable or has nothing near that time.
    fn frame_at(&self, timestamp: f64) -> GifResult<Frame>;

    /// Total duration of the source in seconds.
    fn duration(&self) -> f64;
}
