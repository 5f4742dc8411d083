//! Arrival-order buffering of worker output.
//!
//! A background worker's writes are copied into a [`ChunkBuffer`] until the
//! worker is promoted to foreground, at which point the buffer is transferred
//! downstream in one go. The buffer records which destination each write was
//! aimed at so that stdout and stderr interleaving survives the round trip.

use std::io;

use crate::pipeline::ChainWrite;

/// Which group sink a chunk or pipeline stage is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Destination {
    Stdout,
    Stderr,
}

/// One buffered write: the destination plus an owned copy of the bytes.
///
/// The copy is required because the caller is free to reuse its buffer the
/// moment the write returns, long before the chunk is drained.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub dest: Destination,
    pub data: Vec<u8>,
}

/// All buffered writes of one worker, in strict arrival order across both
/// destinations.
///
/// The buffer has no locking of its own; the queue core owns it and provides
/// mutual exclusion.
#[derive(Debug, Default)]
pub(crate) struct ChunkBuffer {
    chunks: Vec<Chunk>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `p` into the buffer as a chunk tagged `dest`. Returns the number
    /// of bytes accepted, which is always all of them.
    pub fn push(&mut self, dest: Destination, p: &[u8]) -> usize {
        self.chunks.push(Chunk { dest, data: p.to_vec() });
        p.len()
    }

    /// Buffered byte totals as `(stdout_bytes, stderr_bytes)`.
    pub fn byte_counts(&self) -> (u64, u64) {
        let mut out = 0u64;
        let mut err = 0u64;
        for chunk in &self.chunks {
            match chunk.dest {
                Destination::Stdout => out += chunk.data.len() as u64,
                Destination::Stderr => err += chunk.data.len() as u64,
            }
        }
        (out, err)
    }

    /// Send every chunk whose destination has a writer present, in arrival
    /// order, stopping at the first downstream error. Chunks for an absent
    /// writer are skipped, not consumed; the caller clears the buffer.
    pub fn transfer(
        &self,
        out: Option<&dyn ChainWrite>,
        err: Option<&dyn ChainWrite>,
    ) -> io::Result<()> {
        for chunk in &self.chunks {
            let target = match chunk.dest {
                Destination::Stdout => out,
                Destination::Stderr => err,
            };
            if let Some(writer) = target {
                let (_, e) = writer.write(&chunk.data);
                if let Some(e) = e {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Empty the buffer downstream.
    ///
    /// With `order_stderr` set, all stdout chunks go first and all stderr
    /// chunks second, each side keeping its internal order. A sink error
    /// aborts the whole drain; whatever remains is discarded because the
    /// worker that wrote it has no way to receive the error by now.
    pub fn drain(&mut self, order_stderr: bool, out: &dyn ChainWrite, err: &dyn ChainWrite) {
        let result = if order_stderr {
            self.transfer(Some(out), None).and_then(|()| self.transfer(None, Some(err)))
        } else {
            self.transfer(Some(out), Some(err))
        };

        if let Err(e) = result {
            log::debug!("sink error during drain, discarding remaining buffered output: {e}");
        }
        self.chunks.clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
