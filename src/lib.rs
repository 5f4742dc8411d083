#![deny(unsafe_code)]
// Clippy lint configuration for CI
// These lints are allowed because:
// - missing_*_doc: Documentation improvements tracked separately
// - uninlined_format_args: Mixed-style format strings read better in log lines
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::uninlined_format_args
)]

//! # parout - parallel workers, serial output
//!
//! This library lets a command-line program run its independent units of work
//! in parallel while the combined stdout and stderr still read as if the
//! units had run one after another. It targets commands shaped like
//!
//! ```text
//! $ grep pattern file1 file2...
//! $ sha256 filea fileb filec...
//! $ gzip --verbose --best jan.tar feb.tar mar.tar...
//! ```
//!
//! where each argument could be processed concurrently if only the output did
//! not come out shuffled. `parout` removes that constraint: give every
//! argument a worker, and the group serialises what the workers write.
//!
//! ## Quick Start
//!
//! If the serial version of a program looks like
//!
//! ```no_run
//! # fn handle_arg(_: &str, _: &mut dyn std::io::Write, _: &mut dyn std::io::Write) {}
//! let mut stdout = std::io::stdout();
//! let mut stderr = std::io::stderr();
//! for arg in std::env::args().skip(1) {
//!     handle_arg(&arg, &mut stdout, &mut stderr);
//! }
//! ```
//!
//! the parallel version becomes
//!
//! ```no_run
//! # fn handle_arg(_: &str, _: &mut dyn std::io::Write, _: &mut dyn std::io::Write) {}
//! use parout::Group;
//!
//! let mut group = Group::builder().build().unwrap();
//! for arg in std::env::args().skip(1) {
//!     group.add("", "", move |stdout, stderr| {
//!         handle_arg(&arg, stdout, stderr);
//!     });
//! }
//! group.run();
//! group.wait();
//! ```
//!
//! The one rule a worker must follow: write *only* to the two sinks it is
//! given. Anything written directly to the process streams bypasses the
//! group and lands wherever the scheduler happens to put it.
//!
//! ## How output is coordinated
//!
//! Each worker writes into a private pipeline of composable stages:
//!
//! ```text
//!     worker
//! (stdout,  stderr)
//!    |         |
//!   head      head      stable handle given to the worker
//!    |_       _|
//!      |     |
//!      queue            buffers writes, preserving arrival order
//!    _|       |_
//!   |           |
//! tagger     tagger     optional per-line tag
//!   |           |
//!  tail       tail      one locked write into the group sink
//! ```
//!
//! At any moment at most one worker is in the *foreground*: its writes pass
//! straight through to the sinks, giving live output for the runner whose
//! turn it is. Everyone else runs in the *background*, buffering. As workers
//! finish, the coordinator flushes buffers in the configured order and
//! promotes the next runner in line.
//!
//! With [`passthru`](GroupBuilder::passthru) the pipeline reduces to the
//! locked tail alone. That mode exists for diagnosis, when you want the
//! rawest possible view of what the workers emit.
//!
//! ## Configuration
//!
//! [`GroupBuilder`] controls sinks, per-line tags, between-runner separators,
//! output ordering, and two resource ceilings
//! ([`limit_active_runners`](GroupBuilder::limit_active_runners),
//! [`limit_memory_per_runner`](GroupBuilder::limit_memory_per_runner)).
//! Combinations that could leave a worker blocked forever are rejected at
//! [`build`](GroupBuilder::build) time with a [`ConfigError`].
//!
//! ## Concurrency notes
//!
//! Programs adopting this library often come from a serial world. Workers run
//! on their own threads, so shared state the serial version mutated freely
//! (counters, progress meters, caches) now needs protection. The sinks given
//! to each worker are internally synchronised; everything else is the
//! application's business.
//!
//! There are no timeouts, retries or cancellation, and worker errors are not
//! propagated to the coordinator: a worker that wants to report failure
//! should write to its stderr sink, and a worker that never returns leaves
//! [`Group::wait`] blocked forever. Features like per-worker deadlines are
//! deliberately left to the application, where a closure can implement
//! exactly the policy it wants.

mod chunk;
mod config;
mod errors;
mod group;
mod pipeline;
mod queue;
mod runner;
mod tagger;

#[cfg(test)]
mod testsupport;

pub use config::GroupBuilder;
pub use errors::{ConfigError, Result};
pub use group::Group;
