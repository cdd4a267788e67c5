//! Worker wire protocol
//!
//! The parent hands the worker a JSON [`WorkerPayload`] file. The worker
//! answers on its stdout: free-form user output, then the sentinel line, then
//! one JSON [`WorkerReport`] line.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::{Frame, LineFramer, OutputCapture};
use crate::checker::RestrictedBuiltins;
use crate::core::status::ExecStatus;
use crate::engine::limiter::NetworkGuard;

/// Variable whose value is reported back as `return_value`
pub const RESULT_VARIABLE: &str = "result";

/// Fixed prefix of the per-run sentinel line
pub const SENTINEL_PREFIX: &str = "---EXECBOX_RESULT";

/// Upper bound for the report line, on top of the output budget
const REPORT_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build a fresh sentinel; the nonce keeps submissions from forging one
pub fn new_sentinel() -> String {
    format!("{}:{}---", SENTINEL_PREFIX, Uuid::new_v4().simple())
}

/// Everything the worker needs, written to a temp file before spawn
#[derive(Debug, Serialize)]
pub struct WorkerPayload<'a> {
    pub sentinel: &'a str,
    pub result_variable: &'a str,
    pub code: &'a str,
    pub allowed_imports: &'a [String],
    pub denied_imports: &'a [String],
    pub builtins: &'a RestrictedBuiltins,
    /// Present when network access is disabled
    pub network: Option<NetworkGuard>,
}

/// Status line written by the worker after the sentinel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerReport {
    pub status: String,
    #[serde(default)]
    pub return_value: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub memory_peak_kb: Option<f64>,
}

impl WorkerReport {
    /// Report used when the sentinel or the JSON line is missing
    pub fn missing() -> Self {
        Self {
            status: "error".to_string(),
            return_value: None,
            error: None,
            memory_peak_kb: None,
        }
    }

    /// Map the worker status onto the public status; unknown means error
    pub fn exec_status(&self) -> ExecStatus {
        match self.status.as_str() {
            "success" => ExecStatus::Success,
            "error" => ExecStatus::Error,
            "memory_exceeded" => ExecStatus::MemoryExceeded,
            _ => ExecStatus::Error,
        }
    }

    pub fn memory_peak_mb(&self) -> f64 {
        match self.memory_peak_kb {
            Some(kb) if kb.is_finite() && kb > 0.0 => kb / 1024.0,
            _ => 0.0,
        }
    }
}

/// Splits the worker's stdout into user output and the report line
#[derive(Debug)]
pub struct StdoutSplitter {
    sentinel: String,
    framer: LineFramer,
    user: OutputCapture,
    report: OutputCapture,
    seen_sentinel: bool,
}

impl StdoutSplitter {
    pub fn new(sentinel: impl Into<String>, max_output_bytes: usize) -> Self {
        Self {
            sentinel: sentinel.into(),
            framer: LineFramer::default(),
            user: OutputCapture::new(max_output_bytes),
            report: OutputCapture::new(max_output_bytes.saturating_add(REPORT_OVERHEAD_BYTES)),
            seen_sentinel: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let Self {
            sentinel,
            framer,
            user,
            report,
            seen_sentinel,
        } = self;
        framer.push(chunk, |frame| {
            route(frame, sentinel.as_str(), user, report, seen_sentinel)
        });
    }

    /// Flush the last partial line and return (user stdout, report)
    pub fn finish(mut self) -> SplitOutput {
        let Self {
            sentinel,
            framer,
            user,
            report,
            seen_sentinel,
        } = &mut self;
        framer.finish(|frame| route(frame, sentinel.as_str(), user, report, seen_sentinel));

        let report = if self.seen_sentinel {
            parse_report(self.report.contents())
        } else {
            None
        };
        SplitOutput {
            stdout_truncated: self.user.truncated(),
            stdout: self.user.into_string(),
            report,
        }
    }
}

fn route(
    frame: Frame<'_>,
    sentinel: &str,
    user: &mut OutputCapture,
    report: &mut OutputCapture,
    seen_sentinel: &mut bool,
) {
    if *seen_sentinel {
        report.write_bytes(frame.bytes());
        return;
    }
    if let Frame::Line(line) = frame {
        if trim_newline(line) == sentinel.as_bytes() {
            *seen_sentinel = true;
            return;
        }
    }
    user.write_bytes(frame.bytes());
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// First non-empty line after the sentinel, parsed as a report
fn parse_report(text: &str) -> Option<WorkerReport> {
    let line = text.lines().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

/// Decoded worker stdout
#[derive(Debug)]
pub struct SplitOutput {
    pub stdout: String,
    pub stdout_truncated: bool,
    /// `None` when the sentinel was absent or the report malformed
    pub report: Option<WorkerReport>,
}
