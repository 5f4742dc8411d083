//! Group configuration and its validator.
//!
//! Options are collected on a [`GroupBuilder`] and checked as a whole when
//! the group is built. Validation is strict because several combinations are
//! not merely odd but can leave a worker blocked forever; see
//! [`ConfigError`](crate::ConfigError) for the reasoning behind each rule.

use std::io;
use std::io::Write;

use crate::errors::{ConfigError, Result};
use crate::group::Group;
use crate::pipeline::GroupSinks;

/// Validated option set held by a running group.
#[derive(Debug)]
pub(crate) struct Config {
    pub out_sep: Vec<u8>,
    pub err_sep: Vec<u8>,
    /// Background buffer budget per worker, in bytes. 0 = unlimited.
    pub limit_memory: u64,
    /// Concurrent worker ceiling. 0 = all workers at once.
    pub limit_runners: usize,
    /// Emit output in insertion order rather than completion order.
    pub order_runners: bool,
    /// Emit each worker's stderr after all of its stdout.
    pub order_stderr: bool,
    /// Diagnostic mode: skeletal pipelines, output as it happens.
    pub passthru: bool,
}

impl Config {
    /// A worker may only be promoted to foreground when output is in
    /// insertion order, stderr is not held back, and pipelines actually
    /// buffer. Everywhere else the buffer must be kept until flush time.
    pub fn foreground_allowed(&self) -> bool {
        self.order_runners && !self.order_stderr && !self.passthru
    }

    fn check_conflicts(&self) -> Result<()> {
        if self.limit_memory > 0 {
            if self.limit_runners == 0 {
                return Err(ConfigError::MemoryLimitWithoutRunnerLimit);
            }
            if !self.order_runners {
                return Err(ConfigError::MemoryLimitWithUnorderedRunners);
            }
            if self.order_stderr {
                return Err(ConfigError::MemoryLimitWithOrderedStderr);
            }
        }

        if self.passthru {
            if self.limit_memory > 0 {
                return Err(ConfigError::PassthruWithMemoryLimit);
            }
            if self.order_runners {
                return Err(ConfigError::PassthruWithOrderedRunners);
            }
            if self.order_stderr {
                return Err(ConfigError::PassthruWithOrderedStderr);
            }
        }

        Ok(())
    }
}

/// Builder for a [`Group`].
///
/// The defaults make parallel workers produce byte-identical output to a
/// serial run: process streams as sinks, no separators, no limits, insertion
/// order, stderr interleaved as written.
///
/// ```no_run
/// use parout::Group;
///
/// let group = Group::builder()
///     .stdout_separator(b"----\n")
///     .limit_active_runners(8)
///     .build()
///     .unwrap();
/// ```
pub struct GroupBuilder {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
    config: Config,
}

impl Default for GroupBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupBuilder {
    /// Start from the serial-appearance defaults. The process streams are
    /// captured here, once; redirecting them afterwards has no effect on the
    /// group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
            config: Config {
                out_sep: Vec::new(),
                err_sep: Vec::new(),
                limit_memory: 0,
                limit_runners: 0,
                order_runners: true,
                order_stderr: false,
                passthru: false,
            },
        }
    }

    /// Start from defaults that mimic `GNU parallel` with `--group`:
    /// completion order, each worker's stderr after its stdout.
    #[must_use]
    pub fn gnu_defaults() -> Self {
        Self::new().order_runners(false).order_stderr(true)
    }

    /// Replace the stdout sink.
    #[must_use]
    pub fn stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stdout = Box::new(sink);
        self
    }

    /// Replace the stderr sink.
    #[must_use]
    pub fn stderr(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stderr = Box::new(sink);
        self
    }

    /// Bytes written to stdout between the output blocks of consecutive
    /// runners, never before the first or after the last. Include a trailing
    /// newline if one is wanted. Default: nothing.
    #[must_use]
    pub fn stdout_separator(mut self, sep: impl AsRef<[u8]>) -> Self {
        self.config.out_sep = sep.as_ref().to_vec();
        self
    }

    /// Stderr counterpart of [`stdout_separator`](Self::stdout_separator).
    #[must_use]
    pub fn stderr_separator(mut self, sep: impl AsRef<[u8]>) -> Self {
        self.config.err_sep = sep.as_ref().to_vec();
        self
    }

    /// Cap the number of workers running at once; 0 (the default) runs every
    /// worker immediately. Worth setting when workers contend for CPU, file
    /// descriptors, sockets or bandwidth.
    #[must_use]
    pub fn limit_active_runners(mut self, max_active: usize) -> Self {
        self.config.limit_runners = max_active;
        self
    }

    /// Cap the bytes buffered for a background worker; a worker at its cap
    /// blocks in `write` until promoted to foreground. 0 (the default) means
    /// unlimited. Requires [`limit_active_runners`](Self::limit_active_runners),
    /// and the pair bounds the group's total buffer memory.
    #[must_use]
    pub fn limit_memory_per_runner(mut self, limit: u64) -> Self {
        self.config.limit_memory = limit;
        self
    }

    /// When true (the default) output appears in the order runners were
    /// added; when false, in the order they complete.
    #[must_use]
    pub fn order_runners(mut self, setting: bool) -> Self {
        self.config.order_runners = setting;
        self
    }

    /// When true, each worker's stderr is emitted after all of its stdout
    /// (the `GNU parallel --group` texture). Default false: stderr
    /// interleaves with stdout exactly as written.
    #[must_use]
    pub fn order_stderr(mut self, setting: bool) -> Self {
        self.config.order_stderr = setting;
        self
    }

    /// Diagnostic mode: pipelines reduce to a locked pass-through and output
    /// appears the moment it is written. Requires `order_runners(false)`.
    #[must_use]
    pub fn passthru(mut self, setting: bool) -> Self {
        self.config.passthru = setting;
        self
    }

    /// Validate the combination and produce a [`Group`] ready for
    /// [`add`](Group::add).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`](crate::ConfigError) naming the conflicting
    /// options if this combination could stall a worker forever.
    pub fn build(self) -> Result<Group> {
        self.config.check_conflicts()?;
        Ok(Group::from_parts(self.config, GroupSinks { stdout: self.stdout, stderr: self.stderr }))
    }
}
