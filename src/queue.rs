//! The buffering stage at the core of every queued pipeline.
//!
//! A queued worker starts in the background, much like a background job in a
//! shell: it keeps running but everything it writes is buffered. When the
//! coordinator decides the worker's turn has come, the queue switches to
//! foreground, the buffer drains downstream, and subsequent writes go
//! straight through.
//!
//! One [`QueueCore`] is shared by the worker's stdout and stderr stages so
//! that the arrival order of writes across the two destinations is captured
//! by a single lock and survives into the drain.

use std::sync::Arc;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::chunk::{ChunkBuffer, Destination};
use crate::pipeline::{ChainWrite, WriteOutcome};

/// Queue life-cycle. `Draining` exists only inside the foreground
/// transition while the core lock is held; a write observing it means the
/// lock discipline is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    /// Writes buffer until the memory limit would be exceeded.
    BackgroundWithLimit,
    /// Writes buffer unconditionally.
    BackgroundNoLimit,
    /// Writers sleep until the foreground transition releases them.
    Blocked,
    /// Buffer drain in progress, never observable outside the core lock.
    Draining,
    /// Writes bypass the buffer and go straight downstream. Terminal.
    Foreground,
}

struct CoreInner {
    state: QueueState,
    /// Bytes currently buffered, compared against the limit before accepting
    /// more. Only meaningful in `BackgroundWithLimit`.
    used: u64,
    buf: ChunkBuffer,
}

/// State shared by the twin queue stages of one worker.
pub(crate) struct QueueCore {
    inner: Mutex<CoreInner>,
    /// Broadcast that wakes every writer parked in `Blocked`. Signalled once,
    /// after the state has become `Foreground`.
    released: Condvar,
    order_stderr: bool,
    /// Buffered-byte budget; 0 means unlimited.
    limit: u64,
    out: Arc<dyn ChainWrite>,
    err: Arc<dyn ChainWrite>,
}

impl QueueCore {
    pub fn new(
        order_stderr: bool,
        limit: u64,
        out: Arc<dyn ChainWrite>,
        err: Arc<dyn ChainWrite>,
    ) -> Self {
        let state =
            if limit > 0 { QueueState::BackgroundWithLimit } else { QueueState::BackgroundNoLimit };
        Self {
            inner: Mutex::new(CoreInner { state, used: 0, buf: ChunkBuffer::new() }),
            released: Condvar::new(),
            order_stderr,
            limit,
            out,
            err,
        }
    }

    fn downstream(&self, dest: Destination) -> &dyn ChainWrite {
        match dest {
            Destination::Stdout => self.out.as_ref(),
            Destination::Stderr => self.err.as_ref(),
        }
    }

    /// Accept one write aimed at `dest`.
    ///
    /// In the background states the bytes are copied into the buffer and
    /// control returns immediately, unless accepting them would bust the
    /// memory limit, in which case the caller blocks until the foreground
    /// transition. A blocked or foreground writer's bytes skip the buffer and
    /// go straight downstream.
    ///
    /// Concurrent writes to one destination are permitted but their relative
    /// order is whatever the lock hands out, the same as with concurrent
    /// writes to a raw process stream.
    fn write(&self, dest: Destination, p: &[u8]) -> WriteOutcome {
        let mut inner = self.inner.lock();

        loop {
            match inner.state {
                QueueState::BackgroundWithLimit => {
                    if inner.used + p.len() as u64 <= self.limit {
                        let n = inner.buf.push(dest, p);
                        inner.used += n as u64;
                        return (n, None);
                    }
                    trace!("queue buffer full ({} used, limit {}), blocking writer", inner.used, self.limit);
                    inner.state = QueueState::Blocked;
                    // Re-dispatch into the Blocked arm.
                }
                QueueState::Blocked => {
                    while inner.state != QueueState::Foreground {
                        self.released.wait(&mut inner);
                    }
                    drop(inner);
                    return self.downstream(dest).write(p);
                }
                QueueState::BackgroundNoLimit => {
                    let n = inner.buf.push(dest, p);
                    return (n, None);
                }
                QueueState::Foreground => {
                    drop(inner);
                    return self.downstream(dest).write(p);
                }
                QueueState::Draining => {
                    panic!("queue writer observed the Draining state under the core lock");
                }
            }
        }
    }

    /// Switch the queue to foreground, draining the buffer downstream and
    /// releasing any blocked writers. Idempotent, so the coordinator can
    /// re-request it for a runner that is already live.
    ///
    /// The core lock is held across the whole drain on purpose: the caller is
    /// the coordinator thread, which has nothing useful to do until the
    /// transition completes, and holding the lock keeps `Draining` invisible
    /// to writers.
    pub fn foreground(&self) {
        let mut inner = self.inner.lock();
        if inner.state == QueueState::Foreground {
            return;
        }

        let (out_bytes, err_bytes) = inner.buf.byte_counts();
        trace!("queue switching to foreground, draining {out_bytes}b stdout / {err_bytes}b stderr");

        inner.state = QueueState::Draining;
        inner.buf.drain(self.order_stderr, self.out.as_ref(), self.err.as_ref());
        inner.state = QueueState::Foreground;
        self.released.notify_all();
    }

    /// Buffered byte totals as `(stdout_bytes, stderr_bytes)`.
    #[cfg(test)]
    pub fn buffered_bytes(&self) -> (u64, u64) {
        self.inner.lock().buf.byte_counts()
    }

    #[cfg(test)]
    fn used(&self) -> u64 {
        self.inner.lock().used
    }
}

/// One of the twin stages fronting a shared [`QueueCore`].
pub(crate) struct QueueStage {
    dest: Destination,
    core: Arc<QueueCore>,
}

/// Build the stdout/stderr stage pair over one fresh core. `out` and `err`
/// are the downstream chains the buffer will drain into.
pub(crate) fn queue_pair(
    order_stderr: bool,
    limit: u64,
    out: Arc<dyn ChainWrite>,
    err: Arc<dyn ChainWrite>,
) -> (QueueStage, QueueStage, Arc<QueueCore>) {
    let core = Arc::new(QueueCore::new(order_stderr, limit, out, err));
    let stdout = QueueStage { dest: Destination::Stdout, core: Arc::clone(&core) };
    let stderr = QueueStage { dest: Destination::Stderr, core: Arc::clone(&core) };
    (stdout, stderr, core)
}

impl ChainWrite for QueueStage {
    fn write(&self, p: &[u8]) -> WriteOutcome {
        self.core.write(self.dest, p)
    }

    /// Closing forces the buffer out: whatever is still queued is flushed via
    /// a foreground transition before close propagates downstream.
    fn close(&self) {
        self.core.foreground();
        self.core.downstream(self.dest).close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::CollectingStage;
    use std::thread;
    use std::time::Duration;

    fn collect_pair() -> (Arc<CollectingStage>, Arc<CollectingStage>) {
        (Arc::new(CollectingStage::new()), Arc::new(CollectingStage::new()))
    }

    #[test]
    fn test_background_buffers_everything() {
        let (out, err) = collect_pair();
        let (out_q, err_q, core) = queue_pair(false, 100, out.clone(), err.clone());

        out_q.write(b"abc");
        out_q.write(b"1234");
        out_q.write(b"yz");
        assert_eq!(core.buffered_bytes(), (9, 0));
        assert_eq!(core.used(), 9);

        err_q.write(b"ABC");
        err_q.write(b"1234");
        err_q.write(b"YZ");
        assert_eq!(core.buffered_bytes(), (9, 9));
        assert_eq!(core.used(), 18);

        // Nothing reaches downstream until the foreground switch.
        assert_eq!(out.len(), 0);
        assert_eq!(err.len(), 0);

        core.foreground();
        core.foreground(); // idempotent
        assert_eq!(out.contents(), "abc1234yz");
        assert_eq!(err.contents(), "ABC1234YZ");
    }

    #[test]
    fn test_drain_interleaving_both_modes() {
        // One shared sink makes the cross-destination ordering observable.
        let sink = Arc::new(CollectingStage::new());
        let (out_q, err_q, core) = queue_pair(false, 0, sink.clone(), sink.clone());
        out_q.write(b"out a<<");
        err_q.write(b"err a<<");
        err_q.write(b"err b<<");
        out_q.write(b"out b<<");
        out_q.write(b"out c<<");
        err_q.write(b"err c<<");
        core.foreground();
        assert_eq!(sink.contents(), "out a<<err a<<err b<<out b<<out c<<err c<<");

        let sink = Arc::new(CollectingStage::new());
        let (out_q, err_q, core) = queue_pair(true, 0, sink.clone(), sink.clone());
        out_q.write(b"out a<<");
        err_q.write(b"err a<<");
        err_q.write(b"err b<<");
        out_q.write(b"out b<<");
        out_q.write(b"out c<<");
        err_q.write(b"err c<<");
        core.foreground();
        assert_eq!(sink.contents(), "out a<<out b<<out c<<err a<<err b<<err c<<");
    }

    #[test]
    fn test_foreground_writes_bypass_buffer() {
        let (out, err) = collect_pair();
        let (out_q, _err_q, core) = queue_pair(false, 0, out.clone(), err);

        core.foreground();
        let (n, e) = out_q.write(b"live");
        assert_eq!(n, 4);
        assert!(e.is_none());
        assert_eq!(out.contents(), "live");
        assert!(core.buffered_bytes() == (0, 0));
    }

    #[test]
    fn test_overflow_blocks_until_foreground() {
        let (out, err) = collect_pair();
        let (out_q, err_q, core) = queue_pair(false, 100, out.clone(), err.clone());
        let out_q = Arc::new(out_q);
        let err_q = Arc::new(err_q);

        let forty = [b'x'; 40];
        out_q.write(&forty);
        out_q.write(&forty);
        assert_eq!(core.used(), 80);

        // Third write busts the limit: the writer must park.
        let blocked_out = {
            let q = Arc::clone(&out_q);
            thread::spawn(move || q.write(&[b'o'; 40]))
        };
        let blocked_err = {
            let q = Arc::clone(&err_q);
            thread::spawn(move || q.write(&[b'e'; 40]))
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!blocked_out.is_finished());
        assert!(!blocked_err.is_finished());
        assert_eq!(core.used(), 80); // nothing further was buffered

        core.foreground();
        let (n, e) = blocked_out.join().unwrap();
        assert_eq!(n, 40);
        assert!(e.is_none());
        let (n, e) = blocked_err.join().unwrap();
        assert_eq!(n, 40);
        assert!(e.is_none());

        // Buffered bytes came out first, then the released writes went
        // straight downstream.
        assert!(out.contents().starts_with(&"x".repeat(80)));
        assert_eq!(out.len(), 120);
        assert_eq!(err.len(), 40);
    }

    #[test]
    fn test_oversized_first_write_blocks() {
        let (out, err) = collect_pair();
        let (out_q, _err_q, core) = queue_pair(false, 10, out.clone(), err);
        let out_q = Arc::new(out_q);

        let blocked = {
            let q = Arc::clone(&out_q);
            thread::spawn(move || q.write(b"more than ten bytes"))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());

        core.foreground();
        let (n, _) = blocked.join().unwrap();
        assert_eq!(n, 19);
        assert_eq!(out.contents(), "more than ten bytes");
    }

    #[test]
    fn test_close_flushes_buffer() {
        let (out, err) = collect_pair();
        let (out_q, err_q, _core) = queue_pair(false, 0, out.clone(), err.clone());

        out_q.write(b"queued out");
        err_q.write(b"queued err");
        out_q.close();
        err_q.close();

        assert_eq!(out.contents(), "queued out");
        assert_eq!(err.contents(), "queued err");
    }
}
