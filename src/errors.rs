//! Configuration error types.

use thiserror::Error;

/// Result type alias for group construction.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Error returned when a [`crate::GroupBuilder`] holds a combination of
/// options that could stall a worker forever.
///
/// Each variant names the offending options. The restrictions exist because a
/// worker blocked on a full buffer can only ever be released by a foreground
/// promotion, and some option combinations guarantee that promotion never
/// arrives.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A per-worker memory limit without a concurrency limit leaves total
    /// buffer memory unbounded.
    #[error("limit_memory_per_runner requires limit_active_runners to be set")]
    MemoryLimitWithoutRunnerLimit,

    /// With completion-order output, a non-head worker that fills its buffer
    /// has no guaranteed promotion and would block forever.
    #[error("limit_memory_per_runner cannot be combined with order_runners(false)")]
    MemoryLimitWithUnorderedRunners,

    /// Deferring all stderr to drain time means a stderr-only worker can fill
    /// its buffer with no way to make progress.
    #[error("limit_memory_per_runner cannot be combined with order_stderr(true)")]
    MemoryLimitWithOrderedStderr,

    /// Passthru pipelines have no buffer, so a memory limit is meaningless.
    #[error("passthru(true) cannot be combined with limit_memory_per_runner")]
    PassthruWithMemoryLimit,

    /// Passthru pipelines write as soon as data arrives and cannot honour
    /// insertion order.
    #[error("passthru(true) cannot be combined with order_runners(true)")]
    PassthruWithOrderedRunners,

    /// Passthru pipelines never buffer, so stderr cannot be held back.
    #[error("passthru(true) cannot be combined with order_stderr(true)")]
    PassthruWithOrderedStderr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_offending_options() {
        let msg = format!("{}", ConfigError::MemoryLimitWithoutRunnerLimit);
        assert!(msg.contains("limit_memory_per_runner"));
        assert!(msg.contains("limit_active_runners"));

        let msg = format!("{}", ConfigError::MemoryLimitWithUnorderedRunners);
        assert!(msg.contains("order_runners(false)"));

        let msg = format!("{}", ConfigError::MemoryLimitWithOrderedStderr);
        assert!(msg.contains("order_stderr(true)"));

        let msg = format!("{}", ConfigError::PassthruWithMemoryLimit);
        assert!(msg.contains("passthru"));
    }
}
