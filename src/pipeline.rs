//! Writer stages and the pipelines they form.
//!
//! Each worker writes into a pipeline: a short chain of stages ending at one
//! of the group's two sinks. A stage accepts bytes, optionally transforms or
//! buffers them, and hands them to its successor. Chains are assembled
//! bottom-up at `run` time and never restructured afterwards, so each stage
//! simply owns an [`Arc`] of the next one and no stage needs a successor
//! setter.
//!
//! Stages are shared between the worker's thread and the coordinator's drain
//! path, so all of them write through `&self` and any stage with state
//! carries its own lock.

use std::io;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunk::Destination;

/// The result of pushing bytes into a stage: how many input bytes were
/// accepted, and the first error raised anywhere downstream.
///
/// Unlike [`io::Write`], both halves are meaningful at once. A stage that
/// fans one input write out into several downstream writes (the tagger) can
/// accept most of the caller's bytes and still surface an error; later errors
/// in the same logical write are dropped because they usually just echo the
/// first failure.
pub(crate) type WriteOutcome = (usize, Option<io::Error>);

/// One stage in a pipeline.
///
/// `write` counts *input* bytes accepted from the caller, never bytes pushed
/// to the successor: a stage that emits framing of its own (tags) keeps that
/// amplification invisible. `close` flushes any local state and propagates
/// exactly once down the chain.
pub(crate) trait ChainWrite: Send + Sync {
    fn write(&self, p: &[u8]) -> WriteOutcome;
    fn close(&self);
}

/// The group's two output sinks, guarded together by one mutex.
///
/// A single lock covers both sinks because they may well be the same
/// underlying stream (stderr redirected onto stdout, or both a terminal), and
/// every byte that reaches either one must be serialised against every other.
pub(crate) struct GroupSinks {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl GroupSinks {
    fn get(&mut self, dest: Destination) -> &mut (dyn Write + Send) {
        match dest {
            Destination::Stdout => self.stdout.as_mut(),
            Destination::Stderr => self.stderr.as_mut(),
        }
    }

    /// Write the between-runner separators, stdout's first. Both go out under
    /// a single lock acquisition by the caller, so their relative order is
    /// stable even when the two sinks are one writer. Sink errors are
    /// swallowed for the same reason drain errors are: nobody is left to
    /// receive them.
    pub fn write_separators(&mut self, out_sep: &[u8], err_sep: &[u8]) {
        if !out_sep.is_empty() {
            let _ = self.stdout.write_all(out_sep);
        }
        if !err_sep.is_empty() {
            let _ = self.stderr.write_all(err_sep);
        }
    }
}

/// The first stage of every pipeline.
///
/// Exists so the worker holds one stable handle for its whole lifetime while
/// the shape of the chain below it varies with the group configuration.
/// Writes and close pass straight through.
pub(crate) struct Head {
    next: Arc<dyn ChainWrite>,
}

impl Head {
    pub fn new(next: Arc<dyn ChainWrite>) -> Self {
        Self { next }
    }
}

impl ChainWrite for Head {
    fn write(&self, p: &[u8]) -> WriteOutcome {
        self.next.write(p)
    }

    fn close(&self) {
        self.next.close();
    }
}

/// The terminal stage: one locked write straight into a group sink.
///
/// Close is a no-op because the sinks belong to the host, and the lock is
/// held only across the single sink write so a slow sink stalls exactly one
/// writer at a time.
pub(crate) struct Tail {
    dest: Destination,
    sinks: Arc<Mutex<GroupSinks>>,
}

impl Tail {
    pub fn new(dest: Destination, sinks: Arc<Mutex<GroupSinks>>) -> Self {
        Self { dest, sinks }
    }
}

impl ChainWrite for Tail {
    fn write(&self, p: &[u8]) -> WriteOutcome {
        let mut sinks = self.sinks.lock();
        match sinks.get(self.dest).write(p) {
            Ok(n) => (n, None),
            Err(e) => (0, Some(e)),
        }
    }

    fn close(&self) {}
}

/// The [`io::Write`] adapter handed to a worker, one per destination.
///
/// Maps a pipeline's dual return onto the `io::Write` contract: a failure
/// with nothing accepted becomes `Err`, while a partial acceptance is
/// reported as `Ok(n)` and the error resurfaces on the caller's next write
/// (which standard retry loops like `write_all` perform anyway).
pub(crate) struct WorkerSink {
    head: Arc<dyn ChainWrite>,
}

impl WorkerSink {
    pub fn new(head: Arc<dyn ChainWrite>) -> Self {
        Self { head }
    }
}

impl Write for WorkerSink {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        match self.head.write(p) {
            (0, Some(e)) => Err(e),
            (n, _) => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Stages push bytes onward as they accept them; there is nothing to
        // flush short of closing the pipeline.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{CollectingStage, ScriptedStage};

    fn sink_pair() -> (Arc<Mutex<GroupSinks>>, crate::testsupport::SharedVec) {
        let buf = crate::testsupport::SharedVec::new();
        let sinks = Arc::new(Mutex::new(GroupSinks {
            stdout: Box::new(buf.clone()),
            stderr: Box::new(crate::testsupport::SharedVec::new()),
        }));
        (sinks, buf)
    }

    #[test]
    fn test_head_forwards_unchanged() {
        let collect = Arc::new(CollectingStage::new());
        let head = Head::new(collect.clone());

        let (n, e) = head.write(b"hello");
        assert_eq!(n, 5);
        assert!(e.is_none());
        assert_eq!(collect.contents(), "hello");
    }

    #[test]
    fn test_tail_writes_to_configured_sink() {
        let (sinks, out) = sink_pair();
        let tail = Tail::new(Destination::Stdout, sinks);

        let (n, e) = tail.write(b"direct");
        assert_eq!(n, 6);
        assert!(e.is_none());
        assert_eq!(out.contents(), "direct");

        tail.close(); // no-op; the sink stays usable
        let (n, _) = tail.write(b"!");
        assert_eq!(n, 1);
        assert_eq!(out.contents(), "direct!");
    }

    #[test]
    fn test_worker_sink_error_mapping() {
        let scripted = Arc::new(ScriptedStage::new());
        scripted.push_response(Some(0), Some("sink closed"));
        scripted.push_response(Some(2), Some("partial"));

        let mut sink = WorkerSink::new(scripted);

        // Nothing accepted: the error surfaces directly.
        let e = std::io::Write::write(&mut sink, b"abc").unwrap_err();
        assert_eq!(e.to_string(), "sink closed");

        // Partial acceptance: count wins, error deferred to the next call.
        let n = std::io::Write::write(&mut sink, b"abc").unwrap();
        assert_eq!(n, 2);

        // Unscripted writes succeed in full.
        let n = std::io::Write::write(&mut sink, b"abc").unwrap();
        assert_eq!(n, 3);
    }
}
