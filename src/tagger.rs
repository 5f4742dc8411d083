//! Line tagging stage.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pipeline::{ChainWrite, WriteOutcome};

/// A stage that prepends a fixed tag to every line flowing through it.
///
/// Lines are delimited by `\n`. The tag is emitted as soon as a non-empty
/// line is known to have started, even if its trailing newline has not
/// arrived yet, so a line split across many writes is still tagged exactly
/// once. The only state is whether a tag is owed at the next data byte;
/// no payload is ever buffered here.
pub(crate) struct Tagger {
    next: Arc<dyn ChainWrite>,
    tag: Vec<u8>,
    /// True when the next data byte starts a fresh line. Guarded by its own
    /// lock because the worker thread and the drain path both write here.
    tag_pending: Mutex<bool>,
}

impl Tagger {
    pub fn new(next: Arc<dyn ChainWrite>, tag: &[u8]) -> Self {
        Self { next, tag: tag.to_vec(), tag_pending: Mutex::new(true) }
    }

    fn forward(&self, p: &[u8], n: &mut usize, first_err: &mut Option<io::Error>) {
        let (b, e) = self.next.write(p);
        *n += b;
        if first_err.is_none() {
            *first_err = e;
        }
    }

    /// Emit the tag, not counting its bytes toward the caller's total.
    fn forward_tag(&self, first_err: &mut Option<io::Error>) {
        let (_, e) = self.next.write(&self.tag);
        if first_err.is_none() {
            *first_err = e;
        }
    }
}

impl ChainWrite for Tagger {
    /// The returned count covers input bytes only; tag bytes are invisible to
    /// the caller. One input write fans out into several downstream writes,
    /// so downstream errors are coalesced to the first one seen. The count is
    /// valid even when an error is returned.
    fn write(&self, p: &[u8]) -> WriteOutcome {
        if p.is_empty() {
            return (0, None);
        }

        if self.tag.is_empty() {
            return self.next.write(p);
        }

        let mut pending = self.tag_pending.lock();
        let mut n = 0usize;
        let mut first_err: Option<io::Error> = None;

        // Splitting on '\n' leaves an empty final segment when the input ends
        // with a newline, so "last segment non-empty" is exactly "the input
        // ends mid-line".
        let segments: Vec<&[u8]> = p.split(|&b| b == b'\n').collect();

        for segment in &segments[..segments.len() - 1] {
            if *pending {
                self.forward_tag(&mut first_err);
            }
            *pending = true;

            self.forward(segment, &mut n, &mut first_err);
            self.forward(b"\n", &mut n, &mut first_err);
        }

        let last = segments[segments.len() - 1];
        if last.is_empty() {
            *pending = true;
        } else {
            if *pending {
                self.forward_tag(&mut first_err);
            }
            self.forward(last, &mut n, &mut first_err);
            *pending = false;
        }

        (n, first_err)
    }

    fn close(&self) {
        self.next.close();
    }
}
