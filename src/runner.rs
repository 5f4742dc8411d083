//! Per-worker record: the worker closure, its tags, and its pipeline.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunk::Destination;
use crate::config::Config;
use crate::pipeline::{ChainWrite, GroupSinks, Head, Tail, WorkerSink};
use crate::queue::{queue_pair, QueueCore};
use crate::tagger::Tagger;

/// The worker closure signature: two line-oriented sinks, no return value.
/// All of the worker's output must go through the sinks, and any helper
/// threads it spawns must finish writing before it returns.
pub(crate) type RunFn = Box<dyn FnOnce(&mut dyn Write, &mut dyn Write) + Send>;

/// Tracks one registered worker from `add` until its output is flushed.
pub(crate) struct Runner {
    /// Position in the insertion order; doubles as the completion-channel
    /// token identifying this runner.
    pub id: usize,
    out_tag: Vec<u8>,
    err_tag: Vec<u8>,
    /// Taken by the scheduler when the worker is dispatched.
    pub func: Option<RunFn>,
    stdout: Option<Arc<Head>>,
    stderr: Option<Arc<Head>>,
    /// Present on queued pipelines; used to promote the runner to foreground.
    core: Option<Arc<QueueCore>>,
    /// Set by the coordinator once the worker function has returned.
    pub can_close: bool,
}

impl Runner {
    pub fn new(id: usize, out_tag: &[u8], err_tag: &[u8], func: RunFn) -> Self {
        Self {
            id,
            out_tag: out_tag.to_vec(),
            err_tag: err_tag.to_vec(),
            func: Some(func),
            stdout: None,
            stderr: None,
            core: None,
            can_close: false,
        }
    }

    /// Assemble the full pipeline pair: tail, optional tagger, shared queue,
    /// head. Built bottom-up so each stage's successor exists before the
    /// stage itself.
    pub fn build_queued_pipeline(&mut self, config: &Config, sinks: &Arc<Mutex<GroupSinks>>) {
        let mut out: Arc<dyn ChainWrite> =
            Arc::new(Tail::new(Destination::Stdout, Arc::clone(sinks)));
        let mut err: Arc<dyn ChainWrite> =
            Arc::new(Tail::new(Destination::Stderr, Arc::clone(sinks)));

        // Tagging is optional per side; an empty tag means no tagger stage.
        if !self.out_tag.is_empty() {
            out = Arc::new(Tagger::new(out, &self.out_tag));
        }
        if !self.err_tag.is_empty() {
            err = Arc::new(Tagger::new(err, &self.err_tag));
        }

        let (queue_out, queue_err, core) =
            queue_pair(config.order_stderr, config.limit_memory, out, err);

        self.stdout = Some(Arc::new(Head::new(Arc::new(queue_out))));
        self.stderr = Some(Arc::new(Head::new(Arc::new(queue_err))));
        self.core = Some(core);
    }

    /// Head straight onto tail: no buffering, no tagging, but the sink lock
    /// still protects the group streams from interleaved writes.
    pub fn build_passthru_pipeline(&mut self, sinks: &Arc<Mutex<GroupSinks>>) {
        self.stdout =
            Some(Arc::new(Head::new(Arc::new(Tail::new(Destination::Stdout, Arc::clone(sinks))))));
        self.stderr =
            Some(Arc::new(Head::new(Arc::new(Tail::new(Destination::Stderr, Arc::clone(sinks))))));
    }

    /// Let this runner write directly to the group sinks, draining anything
    /// it buffered. Idempotent; no-op for passthru pipelines.
    pub fn switch_to_foreground(&self) {
        if let Some(core) = &self.core {
            core.foreground();
        }
    }

    /// The `io::Write` handles passed to the worker function.
    pub fn worker_sinks(&self) -> (WorkerSink, WorkerSink) {
        let stdout = self.stdout.as_ref().expect("pipeline built before dispatch");
        let stderr = self.stderr.as_ref().expect("pipeline built before dispatch");
        (
            WorkerSink::new(Arc::clone(stdout) as Arc<dyn ChainWrite>),
            WorkerSink::new(Arc::clone(stderr) as Arc<dyn ChainWrite>),
        )
    }

    /// Close both chains. Queue close semantics guarantee every buffered byte
    /// has reached the group sinks by the time this returns.
    pub fn close(&self) {
        if let Some(stdout) = &self.stdout {
            stdout.close();
        }
        if let Some(stderr) = &self.stderr {
            stderr.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::SharedVec;

    fn test_config(order_stderr: bool, limit_memory: u64) -> Config {
        Config {
            out_sep: Vec::new(),
            err_sep: Vec::new(),
            limit_memory,
            limit_runners: if limit_memory > 0 { 1 } else { 0 },
            order_runners: true,
            order_stderr,
            passthru: false,
        }
    }

    fn test_sinks() -> (Arc<Mutex<GroupSinks>>, SharedVec, SharedVec) {
        let out = SharedVec::new();
        let err = SharedVec::new();
        let sinks = Arc::new(Mutex::new(GroupSinks {
            stdout: Box::new(out.clone()),
            stderr: Box::new(err.clone()),
        }));
        (sinks, out, err)
    }

    #[test]
    fn test_queued_pipeline_buffers_until_close() {
        let (sinks, out, err) = test_sinks();
        let mut runner = Runner::new(0, b"", b"", Box::new(|_, _| {}));
        runner.build_queued_pipeline(&test_config(false, 0), &sinks);

        let (mut w_out, mut w_err) = runner.worker_sinks();
        w_out.write_all(b"to stdout\n").unwrap();
        w_err.write_all(b"to stderr\n").unwrap();

        // Still in background: nothing visible yet.
        assert_eq!(out.contents(), "");
        assert_eq!(err.contents(), "");

        runner.close();
        assert_eq!(out.contents(), "to stdout\n");
        assert_eq!(err.contents(), "to stderr\n");
    }

    #[test]
    fn test_queued_pipeline_tags_lines() {
        let (sinks, out, err) = test_sinks();
        let mut runner = Runner::new(0, b"o> ", b"e> ", Box::new(|_, _| {}));
        runner.build_queued_pipeline(&test_config(false, 0), &sinks);

        let (mut w_out, mut w_err) = runner.worker_sinks();
        w_out.write_all(b"line 1\nline 2\n").unwrap();
        w_err.write_all(b"oops\n").unwrap();
        runner.close();

        assert_eq!(out.contents(), "o> line 1\no> line 2\n");
        assert_eq!(err.contents(), "e> oops\n");
    }

    #[test]
    fn test_foreground_runner_writes_live() {
        let (sinks, out, _err) = test_sinks();
        let mut runner = Runner::new(0, b"", b"", Box::new(|_, _| {}));
        runner.build_queued_pipeline(&test_config(false, 0), &sinks);

        runner.switch_to_foreground();
        runner.switch_to_foreground(); // idempotent

        let (mut w_out, _) = runner.worker_sinks();
        w_out.write_all(b"immediate\n").unwrap();
        assert_eq!(out.contents(), "immediate\n");
    }

    #[test]
    fn test_passthru_pipeline_writes_live() {
        let (sinks, out, err) = test_sinks();
        let mut runner = Runner::new(0, b"ignored", b"ignored", Box::new(|_, _| {}));
        runner.build_passthru_pipeline(&sinks);

        let (mut w_out, mut w_err) = runner.worker_sinks();
        w_out.write_all(b"now\n").unwrap();
        w_err.write_all(b"also now\n").unwrap();
        assert_eq!(out.contents(), "now\n");
        assert_eq!(err.contents(), "also now\n");

        runner.switch_to_foreground(); // no queue: must be a quiet no-op
        runner.close();
    }
}
