//! Error types for the engine.
//!
//! All errors are represented by [`EngineError`] and propagated via
//! `Result<T, EngineError>`.
//!
//! # Error classification (spec §7)
//!
//! - **Input** — reading a batch's input rows failed. Contained per-batch;
//!   the batch is retried next run because transform meta is not advanced.
//! - **Transform** — user code returned an error. Persisted in transform
//!   meta (`is_success=false`); retried next run.
//! - **Output** — writing a batch's results (or their row-meta diff) failed.
//!   Same treatment as Transform.
//! - **Construction** — invalid schemas, mismatched PK types, unsupported
//!   partial-PK distribution. Raised eagerly at build/validate time; fatal.
//! - **Config** — unknown step/executor name, malformed label string.
//!   Fatal; no pipeline state touched.
//!
//! Only `Input`/`Transform`/`Output` are retryable; `Construction`/`Config`
//! are not (spec §7).

use std::fmt;

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Input errors — contained per-batch, retried next run ───────────
    #[error("failed to read input rows from '{table}': {source}")]
    InputFetchError { table: String, source: String },

    // ── Transform errors — contained per-batch, retried next run ───────
    #[error("transform '{step}' failed: {source}")]
    TransformError { step: String, source: String },

    // ── Output errors — contained per-batch, retried next run ──────────
    #[error("failed to write output to '{table}': {source}")]
    OutputWriteError { table: String, source: String },

    // ── Construction errors — fatal, raised at build time ───────────────
    #[error("no common transform keys between inputs and outputs of step '{step}'")]
    EmptyTransformKeys { step: String },

    #[error("primary key '{key}' has mismatched column types across tables in step '{step}'")]
    TypeMismatch { step: String, key: String },

    #[error(
        "transform key '{key}' appears in some but not all input tables of step '{step}' \
         (partial primary keys are only supported when a key appears in exactly one input \
         or in all inputs)"
    )]
    UnsupportedPartialKey { step: String, key: String },

    #[error("store '{table}' is read-only and does not accept writes")]
    ReadOnlyStore { table: String },

    #[error("construction error: {0}")]
    ConstructionError(String),

    // ── Config errors — fatal, no pipeline state touched ────────────────
    #[error("unknown step: {0}")]
    UnknownStep(String),

    #[error("unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("malformed label string: {0}")]
    MalformedLabel(String),

    #[error("config error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// Whether this error is retryable by simply running the pipeline again
    /// (spec §7: input/transform/output errors re-enter the candidate set;
    /// construction/config errors are fatal and never retried).
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Input | ErrorKind::Transform | ErrorKind::Output)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InputFetchError { .. } => ErrorKind::Input,
            EngineError::TransformError { .. } => ErrorKind::Transform,
            EngineError::OutputWriteError { .. } => ErrorKind::Output,
            EngineError::EmptyTransformKeys { .. }
            | EngineError::TypeMismatch { .. }
            | EngineError::UnsupportedPartialKey { .. }
            | EngineError::ReadOnlyStore { .. }
            | EngineError::ConstructionError(_) => ErrorKind::Construction,
            EngineError::UnknownStep(_)
            | EngineError::UnknownExecutor(_)
            | EngineError::MalformedLabel(_)
            | EngineError::ConfigError(_) => ErrorKind::Config,
        }
    }
}

/// Classification of error severity/kind, used for retry decisions and
/// reporting (mirrors §7's taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Transform,
    Output,
    Construction,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Input => "INPUT",
            ErrorKind::Transform => "TRANSFORM",
            ErrorKind::Output => "OUTPUT",
            ErrorKind::Construction => "CONSTRUCTION",
            ErrorKind::Config => "CONFIG",
        };
        write!(f, "{s}")
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Exponential backoff with jitter for callers that drive the pipeline on a
/// schedule and want to back off a step after repeated batch failures.
///
/// The engine itself does not retry within a run — a failed batch simply
/// re-enters the candidate set on the *next* call to `run_full`/
/// `run_changelist` (spec §7). `RetryPolicy` is a convenience for the
/// caller that decides when "next" should be.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay in milliseconds for the given 0-based attempt number.
    /// `base_delay * 2^attempt`, capped at `max_delay`, jittered ±25%.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = delay.min(self.max_delay_ms);

        if attempt.is_multiple_of(2) {
            capped.saturating_mul(3) / 4
        } else {
            capped.saturating_mul(5) / 4
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Per-step retry state, held by the caller (not persisted by the engine).
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub next_retry_at_ms: u64,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and compute the next retry time. Returns `true` if
    /// another retry is allowed.
    pub fn record_failure(&mut self, policy: &RetryPolicy, now_ms: u64) -> bool {
        self.attempts += 1;
        if policy.should_retry(self.attempts) {
            self.next_retry_at_ms = now_ms + policy.backoff_ms(self.attempts - 1);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_retry_at_ms = 0;
    }

    pub fn is_in_backoff(&self, now_ms: u64) -> bool {
        self.attempts > 0 && now_ms < self.next_retry_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            EngineError::ConstructionError("x".into()).kind(),
            ErrorKind::Construction
        );
        assert_eq!(EngineError::UnknownStep("x".into()).kind(), ErrorKind::Config);
        assert_eq!(
            EngineError::InputFetchError {
                table: "t".into(),
                source: "x".into()
            }
            .kind(),
            ErrorKind::Input
        );
    }

    #[test]
    fn only_data_level_errors_are_retryable() {
        assert!(EngineError::TransformError {
            step: "s".into(),
            source: "x".into()
        }
        .is_retryable());
        assert!(!EngineError::ConstructionError("x".into()).is_retryable());
        assert!(!EngineError::UnknownStep("x".into()).is_retryable());
    }

    #[test]
    fn retry_policy_backoff() {
        let policy = RetryPolicy {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        };
        assert_eq!(policy.backoff_ms(0), 750);
        assert_eq!(policy.backoff_ms(1), 2500);
        assert_eq!(policy.backoff_ms(3), 10_000);
    }

    #[test]
    fn retry_state_lifecycle() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();
        assert!(!state.is_in_backoff(1000));

        let now = 10_000;
        assert!(state.record_failure(&policy, now));
        assert!(state.is_in_backoff(now + 100));
        assert!(!state.is_in_backoff(now + 100_000));

        state.reset();
        assert_eq!(state.attempts, 0);
    }

    #[test]
    fn retry_state_exhausts_attempts() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_attempts: 2,
        };
        let mut state = RetryState::new();
        assert!(state.record_failure(&policy, 1000));
        assert!(!state.record_failure(&policy, 2000));
    }
}
