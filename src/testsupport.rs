//! Shared test doubles for the pipeline stages.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pipeline::{ChainWrite, WriteOutcome};

/// A terminal stage that records everything written to it.
#[derive(Default)]
pub(crate) struct CollectingStage {
    buf: Mutex<Vec<u8>>,
}

impl CollectingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }
}

impl ChainWrite for CollectingStage {
    fn write(&self, p: &[u8]) -> WriteOutcome {
        self.buf.lock().extend_from_slice(p);
        (p.len(), None)
    }

    fn close(&self) {}
}

/// One scripted reply from a [`ScriptedStage`]: how many bytes to accept
/// (`None` = all of them) and an optional error to raise alongside.
struct Response {
    count: Option<usize>,
    error: Option<String>,
}

/// A terminal stage that answers writes from a script, recording whatever
/// prefix it "accepted". Once the script runs dry every write succeeds in
/// full, so tests only script the interesting calls.
#[derive(Default)]
pub(crate) struct ScriptedStage {
    script: Mutex<VecDeque<Response>>,
    buf: Mutex<Vec<u8>>,
}

impl ScriptedStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, count: Option<usize>, error: Option<&str>) {
        self.script
            .lock()
            .push_back(Response { count, error: error.map(str::to_owned) });
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

impl ChainWrite for ScriptedStage {
    fn write(&self, p: &[u8]) -> WriteOutcome {
        let response = self.script.lock().pop_front();
        let (n, error) = match response {
            Some(r) => (r.count.unwrap_or(p.len()).min(p.len()), r.error),
            None => (p.len(), None),
        };
        self.buf.lock().extend_from_slice(&p[..n]);
        (n, error.map(io::Error::other))
    }

    fn close(&self) {}
}

/// An [`io::Write`] over shared storage, used as a group sink in tests.
#[derive(Clone, Default)]
pub(crate) struct SharedVec {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

impl io::Write for SharedVec {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(p);
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
