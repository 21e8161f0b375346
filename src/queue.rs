//! A small worker pool that runs operations.
//!
//! The queue hands whole operations to workers over a channel, FIFO. One
//! operation never runs concurrently with itself (it is consumed by the
//! worker that picks it up); distinct operations run concurrently up to the
//! worker count. The queue knows nothing about conversion semantics beyond
//! the `{run, cancel}` pair.

use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use crate::error::{Error, GifResult};
use crate::operation::{CancelHandle, Operation, WeakCancelHandle};

pub struct WorkQueue {
    sender: Option<Sender<Operation>>,
    workers: Vec<JoinHandle<()>>,
    submitted: Mutex<Vec<WeakCancelHandle>>,
}

impl WorkQueue {
    /// Spawns `workers` worker threads (at least one).
    pub fn new(workers: usize) -> WorkQueue {
        let (sender, receiver) = crossbeam_channel::unbounded::<Operation>();
        let workers = (0..workers.max(1))
            .map(|n| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("gifmill-worker-{}", n))
                    .spawn(move || {
                        for operation in receiver.iter() {
                            operation.run();
                        }
                    })
                    .expect("spawning queue worker")
            })
            .collect();
        WorkQueue {
            sender: Some(sender),
            workers,
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues an operation and returns its cancel handle. The operation's
    /// callbacks fire on whichever worker runs it.
    pub fn submit(&self, operation: Operation) -> GifResult<CancelHandle> {
        let handle = operation.cancel_handle();
        {
            let mut submitted = self.submitted.lock().unwrap();
            // drop entries whose operations have already finished
            submitted.retain(|weak| !weak.is_gone());
            submitted.push(handle.downgrade());
        }
        self.sender
            .as_ref()
            .ok_or(Error::ThreadSend)?
            .send(operation)
            .map_err(|_| Error::ThreadSend)?;
        Ok(handle)
    }

    /// Flags every queued and running operation as cancelled. Workers are
    /// not interrupted; each operation winds down at its next cancellation
    /// check and reports `Cancelled` through its completion callback.
    pub fn cancel_all(&self) {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.retain(|weak| weak.cancel());
    }
}

impl Drop for WorkQueue {
    /// Waits for in-flight operations to finish. Cancel first via
    /// [`WorkQueue::cancel_all`] for a fast shutdown.
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            worker.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FrameSource;
    use crate::{ConversionRequest, Frame, MaxSize};
    use imgref::ImgVec;
    use rgb::RGBA8;
    use std::sync::Arc;

    struct SlowSource;

    impl FrameSource for SlowSource {
        fn frame_at(&self, timestamp: f64) -> crate::GifResult<Frame> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(Frame::new(ImgVec::new(vec![RGBA8::new(1, 2, 3, 255); 4], 2, 2), timestamp))
        }

        fn duration(&self) -> f64 {
            5.0
        }
    }

    #[test]
    fn cancel_all_reaches_queued_operations() {
        let dir = tempfile::tempdir().unwrap();
        let queue = WorkQueue::new(1);
        let (tx, rx) = crossbeam_channel::unbounded();

        for n in 0..3 {
            let tx = tx.clone();
            let op = Operation::new(
                ConversionRequest::new(10.0, MaxSize { width: 2, height: 2 }),
                Arc::new(SlowSource),
                dir.path().join(format!("{}.gif", n)),
            )
            .unwrap()
            .on_complete(move |res| {
                tx.send(res.is_err()).unwrap();
            });
            queue.submit(op).unwrap();
        }
        queue.cancel_all();

        let mut failures = 0;
        for _ in 0..3 {
            if rx.recv_timeout(std::time::Duration::from_secs(10)).unwrap() {
                failures += 1;
            }
        }
        // every run was flagged before it could finish its 50 frames
        assert_eq!(failures, 3);
    }
}
