//! Isolated execution of one submission
//!
//! `PENDING -> POLICY_CHECKED -> {REJECTED | SPAWNED} -> {COMPLETED | TIMED_OUT}`
//!
//! The policy check runs before anything is spawned. The worker is a Python
//! interpreter in isolated mode with an empty environment; resource limits
//! are applied in the forked child before `exec`, so they are in place before
//! the first line of user code. The payload lives in a per-run temp directory
//! that is removed on every exit path; the worker deletes the file itself
//! before user code starts, so the sentinel nonce cannot be read back.
//!
//! The configured interpreter is resolved once to the real binary by asking
//! it for `sys.executable` with the caller's environment. Launchers and shims
//! (pyenv, `/usr/bin/env` wrappers) need a `PATH`, which the worker lacks.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setpgid, Pid};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::capture::{LineFramer, OutputCapture};
use crate::checker::PolicyChecker;
use crate::core::limits::ResourceLimits;
use crate::core::policy::PolicyConfig;
use crate::core::status::{ExecResult, ExecStatus};
use crate::engine::limiter::ResourceLimiter;
use crate::engine::protocol::{
    new_sentinel, SplitOutput, StdoutSplitter, WorkerPayload, WorkerReport, RESULT_VARIABLE,
};
use crate::error::{ExecboxError, Result};

/// Script run by the worker interpreter
pub const WORKER_BOOTSTRAP: &str = include_str!("worker.py");

/// Interpreter used when none is configured
pub const DEFAULT_INTERPRETER: &str = "python3";

const PAYLOAD_FILE: &str = "payload.json";
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Asks a candidate interpreter for the binary it actually runs as
const EXECUTABLE_PROBE: &str = "import sys; print(sys.executable)";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute code in an isolated subprocess with policy and resource limits
#[derive(Debug, Clone)]
pub struct Executor {
    limits: ResourceLimits,
    checker: PolicyChecker,
    interpreter: PathBuf,
    /// Real interpreter binary, resolved on first use and shared by clones
    resolved: Arc<OnceCell<PathBuf>>,
    /// Parent directory for per-run workspaces; the system temp dir if unset
    temp_root: Option<PathBuf>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ResourceLimits::default(), PolicyConfig::default())
    }
}

impl Executor {
    pub fn new(limits: ResourceLimits, policy: PolicyConfig) -> Self {
        Self {
            limits,
            checker: PolicyChecker::new(policy),
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            resolved: Arc::new(OnceCell::new()),
            temp_root: None,
        }
    }

    /// Use a specific interpreter (absolute path, or a name looked up on PATH)
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self.resolved = Arc::new(OnceCell::new());
        self
    }

    /// Create per-run workspaces under `root` instead of the system temp dir
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Same interpreter and workspace root, different limits and policy
    pub fn with_profile(&self, limits: ResourceLimits, policy: PolicyConfig) -> Self {
        Self {
            limits,
            checker: PolicyChecker::new(policy),
            interpreter: self.interpreter.clone(),
            resolved: Arc::clone(&self.resolved),
            temp_root: self.temp_root.clone(),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn policy(&self) -> &PolicyConfig {
        self.checker.config()
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Whether the configured interpreter starts and reports its binary
    pub async fn interpreter_available(&self) -> bool {
        match self.resolved_interpreter().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Interpreter unavailable: {}", e);
                false
            }
        }
    }

    async fn resolved_interpreter(&self) -> Result<&Path> {
        let path = self
            .resolved
            .get_or_try_init(|| resolve_interpreter(&self.interpreter))
            .await?;
        Ok(path.as_path())
    }

    /// Execute a code string and return its result.
    ///
    /// Never fails: orchestration problems come back as an `Error` result.
    pub async fn run(&self, code: &str) -> ExecResult {
        let violations = self.checker.check(code);
        if !violations.is_empty() {
            info!(
                "Rejected submission: {} policy violation(s)",
                violations.len()
            );
            return ExecResult::policy_violation(&violations);
        }
        debug!("Policy check passed");

        let start = Instant::now();
        match self.execute(code, start).await {
            Ok(result) => {
                info!(
                    "Run finished: status={}, elapsed={:.3}s, exit_code={}",
                    result.status, result.elapsed_seconds, result.exit_code
                );
                result
            }
            Err(e) => {
                warn!("Run failed before producing a result: {}", e);
                ExecResult::internal_error(e, start.elapsed().as_secs_f64())
            }
        }
    }

    async fn execute(&self, code: &str, start: Instant) -> Result<ExecResult> {
        let interpreter = self.resolved_interpreter().await?;

        // Removed on drop, whichever way this function returns
        let mut builder = tempfile::Builder::new();
        builder.prefix("execbox-");
        let workspace = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let payload_path = workspace.path().join(PAYLOAD_FILE);
        let sentinel = new_sentinel();

        self.write_payload(&payload_path, code, &sentinel).await?;

        let mut child = self.spawn_worker(interpreter, workspace.path(), &payload_path)?;
        let pid = child.id();
        debug!("Spawned worker pid={:?} with {:?}", pid, interpreter);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecboxError::Payload("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecboxError::Payload("worker stderr not captured".to_string()))?;

        let max_output = self.limits.max_output_bytes();
        let mut stdout_task = tokio::spawn(drain_stdout(
            stdout,
            StdoutSplitter::new(sentinel, max_output),
        ));
        let mut stderr_task = tokio::spawn(drain_stderr(stderr, max_output));

        let timeout = wall_clock_budget(self.limits.timeout_seconds());
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            let out = (&mut stdout_task).await;
            let err = (&mut stderr_task).await;
            (status, out, err)
        })
        .await;

        let (status, split, stderr) = match finished {
            Ok((status, out, err)) => {
                let status = status?;
                let split = out.map_err(std::io::Error::other)?;
                let stderr = err.map_err(std::io::Error::other)?;
                (status, split, stderr)
            }
            Err(_) => {
                warn!(
                    "Worker pid={:?} exceeded {}s wall clock, killing",
                    pid,
                    self.limits.timeout_seconds()
                );
                terminate(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                return Ok(ExecResult::timeout(self.limits.timeout_seconds()));
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        Ok(build_result(status, split, stderr, elapsed))
    }

    async fn write_payload(&self, path: &Path, code: &str, sentinel: &str) -> Result<()> {
        let policy = self.checker.config();
        let builtins = self.checker.restricted_builtins();
        debug!(
            "Worker gets {} builtins from table {}",
            builtins.names.len(),
            builtins.table_version
        );
        let payload = WorkerPayload {
            sentinel,
            result_variable: RESULT_VARIABLE,
            code,
            allowed_imports: &policy.allowed_imports,
            denied_imports: &policy.denied_imports,
            builtins: &builtins,
            network: ResourceLimiter::block_network(&self.limits),
        };

        let bytes =
            serde_json::to_vec(&payload).map_err(|e| ExecboxError::Payload(e.to_string()))?;
        fs::write(path, bytes)
            .await
            .map_err(|e| ExecboxError::Payload(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    fn spawn_worker(&self, interpreter: &Path, work_dir: &Path, payload: &Path) -> Result<Child> {
        let mut cmd = Command::new(interpreter);
        cmd.args(["-I", "-S", "-B", "-c", WORKER_BOOTSTRAP])
            .arg(payload)
            .current_dir(work_dir)
            .env_clear()
            .env("PATH", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = self.limits.clone();
        // SAFETY: the hook runs between fork and exec and only makes
        // async-signal-safe calls (setpgid, setrlimit)
        unsafe {
            cmd.pre_exec(move || {
                // Own process group, so a timeout can kill everything it started
                setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
                ResourceLimiter::apply(&limits);
                Ok(())
            });
        }

        Ok(cmd.spawn()?)
    }
}

/// Wall clock budget as a `Duration`; values too large to represent wait forever
fn wall_clock_budget(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Locate the interpreter and resolve it to the binary that actually runs.
///
/// The worker gets no `PATH`, so wrapper scripts must be seen through here.
pub async fn resolve_interpreter(interpreter: &Path) -> Result<PathBuf> {
    let located = locate_interpreter(interpreter)?;

    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(&located)
            .args(["-I", "-c", EXECUTABLE_PROBE])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        ExecboxError::InterpreterNotFound(format!(
            "{}: no answer within {}s",
            located.display(),
            PROBE_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| ExecboxError::InterpreterNotFound(format!("{}: {}", located.display(), e)))?;

    if !output.status.success() {
        return Err(ExecboxError::InterpreterNotFound(format!(
            "{}: exited with {}: {}",
            located.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let reported = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let executable = PathBuf::from(&reported);
    if !executable.is_absolute() || !executable.is_file() {
        return Err(ExecboxError::InterpreterNotFound(format!(
            "{}: reported unusable executable {:?}",
            located.display(),
            reported
        )));
    }

    debug!(
        "Resolved interpreter {} to {}",
        interpreter.display(),
        executable.display()
    );
    Ok(executable)
}

fn locate_interpreter(interpreter: &Path) -> Result<PathBuf> {
    if interpreter.is_absolute() {
        if interpreter.is_file() {
            return Ok(interpreter.to_path_buf());
        }
        return Err(ExecboxError::InterpreterNotFound(
            interpreter.display().to_string(),
        ));
    }
    which::which(interpreter).map_err(|e| {
        ExecboxError::InterpreterNotFound(format!("{}: {}", interpreter.display(), e))
    })
}

/// Kill the worker's whole process group, then the worker itself
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Failed to kill worker: {}", e);
    }
}

async fn drain_stdout<R>(mut reader: R, mut splitter: StdoutSplitter) -> SplitOutput
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => splitter.push(&buf[..n]),
            Err(e) => {
                warn!("Error reading worker stdout: {}", e);
                break;
            }
        }
    }
    splitter.finish()
}

async fn drain_stderr<R>(mut reader: R, max_bytes: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::default();
    let mut capture = OutputCapture::new(max_bytes);
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => framer.push(&buf[..n], |frame| {
                capture.write_bytes(frame.bytes());
            }),
            Err(e) => {
                warn!("Error reading worker stderr: {}", e);
                break;
            }
        }
    }
    framer.finish(|frame| {
        capture.write_bytes(frame.bytes());
    });
    if capture.truncated() {
        debug!("Worker stderr truncated at {} bytes", max_bytes);
    }
    capture.into_string()
}

/// Exit code, or the negated signal number for a signal death
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

fn build_result(status: ExitStatus, split: SplitOutput, stderr: String, elapsed: f64) -> ExecResult {
    let exit_code = exit_code(status);
    if split.stdout_truncated {
        debug!("Worker stdout truncated");
    }

    let mut stderr = stderr.trim_end().to_string();
    let report = match split.report {
        Some(report) => report,
        None => {
            warn!("Worker exited without a result report (exit_code={})", exit_code);
            append_line(
                &mut stderr,
                &format!(
                    "execbox: worker exited without a result report (exit code {})",
                    exit_code
                ),
            );
            WorkerReport::missing()
        }
    };

    let status = report.exec_status();
    if let Some(error) = report.error.as_deref().filter(|e| !e.is_empty()) {
        append_line(&mut stderr, error);
    }

    ExecResult {
        status,
        stdout: split.stdout.trim_end().to_string(),
        stderr,
        return_value: if status == ExecStatus::Success {
            report.return_value.clone()
        } else {
            None
        },
        elapsed_seconds: elapsed,
        memory_peak_mb: report.memory_peak_mb(),
        exit_code,
    }
}

fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}
