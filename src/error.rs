use std::io;

quick_error! {
    /// Everything that can cut a conversion short.
    ///
    /// `Cancelled` is a terminal state rather than a fault; it is delivered
    /// through the completion callback so callers can tell an aborted run
    /// apart from one that never ran.
    #[derive(Debug)]
    pub enum Error {
        /// The request failed validation. No operation is created for these.
        InvalidRequest(reason: String) {
            display("invalid conversion request: {}", reason)
        }
        /// The frame source was unreadable or had no frame near the
        /// requested timestamp.
        FrameSource(reason: String) {
            display("frame source failed: {}", reason)
        }
        Quantization(reason: String) {
            display("palette quantization failed: {}", reason)
        }
        Transform(reason: String) {
            display("frame transform failed: {}", reason)
        }
        Encoding(reason: String) {
            display("GIF encoding failed: {}", reason)
        }
        /// Encoding succeeded but the artifact could not be written out.
        /// Kept separate from `Encoding` so callers can retry just the write.
        SinkWrite(err: io::Error) {
            from()
            source(err)
            display("could not persist artifact: {}", err)
        }
        Cancelled {
            display("conversion cancelled")
        }
        /// A worker or channel went away mid-conversion.
        ThreadSend {
            display("internal channel disconnected")
        }
        /// A pipeline stage panicked. Reported instead of unwinding past the
        /// operation boundary.
        Internal(reason: String) {
            display("internal pipeline fault: {}", reason)
        }
    }
}

pub type GifResult<T, E = Error> = Result<T, E>;
