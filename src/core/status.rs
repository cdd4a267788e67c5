use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    Error,
    Timeout,
    PolicyViolation,
    MemoryExceeded,
}

impl ExecStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecStatus::Success)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecStatus::Success => "success",
            ExecStatus::Error => "error",
            ExecStatus::Timeout => "timeout",
            ExecStatus::PolicyViolation => "policy_violation",
            ExecStatus::MemoryExceeded => "memory_exceeded",
        };
        write!(f, "{}", s)
    }
}

/// Result of executing one submission.
///
/// Produced exactly once per run by the executor and never mutated afterwards,
/// so fields are only readable from outside the crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecResult {
    pub(crate) status: ExecStatus,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    /// `repr()` of the `result` variable, only on success
    pub(crate) return_value: Option<String>,
    /// Wall clock, measured by the parent
    pub(crate) elapsed_seconds: f64,
    /// Peak resident memory reported by the worker (0 if unmeasured)
    pub(crate) memory_peak_mb: f64,
    pub(crate) exit_code: i32,
}

impl ExecResult {
    /// A result with the given status and every other field defaulted
    pub(crate) fn with_status(status: ExecStatus) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            elapsed_seconds: 0.0,
            memory_peak_mb: 0.0,
            exit_code: 0,
        }
    }

    pub(crate) fn policy_violation(violations: &[String]) -> Self {
        Self {
            stderr: violations.join("\n"),
            ..Self::with_status(ExecStatus::PolicyViolation)
        }
    }

    pub(crate) fn timeout(timeout_seconds: f64) -> Self {
        Self {
            elapsed_seconds: timeout_seconds,
            ..Self::with_status(ExecStatus::Timeout)
        }
    }

    /// Orchestration failure on the parent side (spawn, payload, pipes)
    pub(crate) fn internal_error(message: impl fmt::Display, elapsed_seconds: f64) -> Self {
        Self {
            stderr: format!("execbox internal error: {}", message),
            elapsed_seconds,
            exit_code: -1,
            ..Self::with_status(ExecStatus::Error)
        }
    }

    pub fn status(&self) -> ExecStatus {
        self.status
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn return_value(&self) -> Option<&str> {
        self.return_value.as_deref()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn memory_peak_mb(&self) -> f64 {
        self.memory_peak_mb
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
