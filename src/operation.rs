//! One queued conversion: a request, a cancellation flag and the two
//! callbacks, bundled into something the work queue can run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Weak};

use std::io::Write;

use crate::error::{Error, GifResult};
use crate::pipeline::{self, PreviewFn};
use crate::source::FrameSource;
use crate::ConversionRequest;

/// Invoked exactly once per operation with the terminal result: the
/// persisted artifact, `Err(Error::Cancelled)` for a cancelled run, or the
/// failure that ended the run.
pub type CompletionFn = Box<dyn FnOnce(GifResult<Artifact>) + Send>;

/// The finished conversion: the encoded GIF bytes and where they were
/// persisted.
#[derive(Debug)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Requests cancellation of one operation from any thread.
///
/// Cancellation is cooperative and one-way: the pipeline stops at its next
/// check, discards partial work and reports `Cancelled` through the
/// completion callback. Calling this more than once, or after the operation
/// finished, is harmless.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(SeqCst)
    }

    pub(crate) fn downgrade(&self) -> WeakCancelHandle {
        WeakCancelHandle {
            flag: Arc::downgrade(&self.flag),
        }
    }
}

/// Registry entry held by the queue; dies with the operation so the queue
/// doesn't keep finished conversions alive.
pub(crate) struct WeakCancelHandle {
    flag: Weak<AtomicBool>,
}

impl WeakCancelHandle {
    pub fn cancel(&self) -> bool {
        match self.flag.upgrade() {
            Some(flag) => {
                flag.store(true, SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_gone(&self) -> bool {
        self.flag.strong_count() == 0
    }
}

/// A single conversion wrapped for the work queue: runs once, can be
/// cancelled from anywhere, never lets a failure escape its boundary.
pub struct Operation {
    request: ConversionRequest,
    source: Arc<dyn FrameSource>,
    destination: PathBuf,
    cancelled: Arc<AtomicBool>,
    preview: Option<PreviewFn>,
    completion: Option<CompletionFn>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("destination", &self.destination)
            .field("cancelled", &self.cancelled)
            .field("has_preview", &self.preview.is_some())
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

impl Operation {
    /// Validates the request up front; an invalid one never becomes an
    /// operation.
    pub fn new(
        request: ConversionRequest,
        source: Arc<dyn FrameSource>,
        destination: impl Into<PathBuf>,
    ) -> GifResult<Self> {
        request.validate()?;
        Ok(Operation {
            request,
            source,
            destination: destination.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
            preview: None,
            completion: None,
        })
    }

    /// Called with each transformed frame, in order. Zero or more calls per
    /// run; none after cancellation is observed.
    pub fn on_preview(mut self, preview: impl FnMut(imgref::ImgRef<'_, rgb::RGBA8>, f64) + Send + 'static) -> Self {
        self.preview = Some(Box::new(preview));
        self
    }

    /// Called exactly once with the terminal result.
    pub fn on_complete(mut self, completion: impl FnOnce(GifResult<Artifact>) + Send + 'static) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// Executes the pipeline in the caller's thread. All failures,
    /// cancellation included, come out through the completion callback;
    /// nothing unwinds past this call.
    pub(crate) fn run(mut self) {
        let result = catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|_| Err(Error::Internal("conversion pipeline panicked".into())));
        if let Err(err) = &result {
            tracing::debug!(error = %err, "operation finished without an artifact");
        }
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }

    fn execute(&mut self) -> GifResult<Artifact> {
        let bytes = pipeline::run(
            &self.request,
            &*self.source,
            &self.cancelled,
            self.preview.as_mut(),
        )?;
        let path = persist(&self.destination, &bytes)?;
        Ok(Artifact { path, bytes })
    }
}

/// Stages the encoded stream in a temporary file next to the destination
/// and renames it into place, so a partial artifact is never visible under
/// the final name.
fn persist(destination: &Path, bytes: &[u8]) -> GifResult<PathBuf> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file_mut().sync_all()?;
    staged
        .persist(destination)
        .map_err(|e| Error::SinkWrite(e.error))?;
    Ok(destination.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversionRequest, Frame, MaxSize};
    use imgref::ImgVec;
    use rgb::RGBA8;

    struct OneColorSource;

    impl FrameSource for OneColorSource {
        fn frame_at(&self, timestamp: f64) -> GifResult<Frame> {
            let px = RGBA8::new(40, 80, 120, 255);
            Ok(Frame::new(ImgVec::new(vec![px; 16], 4, 4), timestamp))
        }

        fn duration(&self) -> f64 {
            1.0
        }
    }

    #[test]
    fn invalid_request_never_becomes_an_operation() {
        let request = ConversionRequest::new(0.0, MaxSize { width: 4, height: 4 });
        let err = Operation::new(request, Arc::new(OneColorSource), "out.gif").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn persist_writes_the_final_name_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.gif");
        let path = persist(&dest, b"GIF89a-ish").unwrap();
        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"GIF89a-ish");
        // nothing else left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn completion_reports_cancelled_before_any_sampling() {
        let request = ConversionRequest::new(2.0, MaxSize { width: 4, height: 4 });
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("never.gif");
        let (tx, rx) = crossbeam_channel::bounded(1);
        let op = Operation::new(request, Arc::new(OneColorSource), &dest)
            .unwrap()
            .on_complete(move |res| {
                tx.send(res).unwrap();
            });
        op.cancel_handle().cancel();
        op.run();
        let result = rx.recv().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!dest.exists());
    }
}
