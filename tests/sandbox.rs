//! End-to-end runs against a real Python interpreter.
//!
//! Every test skips itself when no interpreter is available. Set
//! `EXECBOX_PYTHON` to pick a specific one.

use execbox::{ExecStatus, PolicyConfig, ResourceLimits, Sandbox};

async fn sandbox_for(limits: ResourceLimits, policy: PolicyConfig) -> Option<Sandbox> {
    let mut sandbox = Sandbox::new(limits, policy);
    if let Ok(python) = std::env::var("EXECBOX_PYTHON") {
        sandbox = sandbox.with_interpreter(python);
    }
    if !sandbox.executor().interpreter_available().await {
        eprintln!("Skipping: Python not found");
        return None;
    }
    Some(sandbox)
}

async fn sandbox_with(limits: ResourceLimits) -> Option<Sandbox> {
    sandbox_for(limits, PolicyConfig::default()).await
}

async fn sandbox() -> Option<Sandbox> {
    sandbox_with(ResourceLimits::default()).await
}

fn entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_simple_execution() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("print(1 + 1)").await;

    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(result.stdout(), "2");
    assert_eq!(result.exit_code(), 0);
    assert!(result.elapsed_seconds() > 0.0);
    assert!(!result.stdout().contains("EXECBOX_RESULT"));
}

#[tokio::test]
async fn test_policy_violation_for_os() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("import os\nos.system('ls')").await;

    assert_eq!(result.status(), ExecStatus::PolicyViolation);
    assert!(result.stderr().contains("import not allowed: os"));
    assert!(result
        .stderr()
        .contains("module attribute access not allowed: os.system"));
    assert!(result.stdout().is_empty());
}

#[tokio::test]
async fn test_timeout() {
    let limits = ResourceLimits::builder()
        .timeout_seconds(2.0)
        .build()
        .unwrap();
    let Some(sandbox) = sandbox_with(limits).await else { return };

    let result = sandbox.run("while True: pass").await;

    assert_eq!(result.status(), ExecStatus::Timeout);
    assert_eq!(result.elapsed_seconds(), 2.0);
    assert!(result.stdout().is_empty());
}

#[tokio::test]
async fn test_math_allowed() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("import math\nprint(math.pi)").await;

    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert!(result.stdout().contains("3.14"));
}

#[tokio::test]
async fn test_return_value() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("result = 42").await;

    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(result.return_value(), Some("42"));

    let result = sandbox.run("result = {'a': [1, 2]}").await;
    assert_eq!(result.return_value(), Some("{'a': [1, 2]}"));

    let result = sandbox.run("x = 1").await;
    assert!(result.return_value().is_none());
}

#[tokio::test]
async fn test_exception_handling() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("raise ValueError('test error')").await;

    assert_eq!(result.status(), ExecStatus::Error);
    assert!(result.stderr().contains("ValueError"));
    assert!(result.stderr().contains("test error"));
}

#[tokio::test]
async fn test_multiline_output() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("for i in range(5):\n    print(i)").await;

    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(result.stdout().lines().count(), 5);
}

#[tokio::test]
async fn test_denied_eval() {
    let Some(sandbox) = sandbox().await else { return };
    let result = sandbox.run("x = eval('1+1')").await;

    assert_eq!(result.status(), ExecStatus::PolicyViolation);
    assert_eq!(result.stderr(), "builtin not allowed: eval");
}

#[tokio::test]
async fn test_denied_builtin_missing_at_run_time() {
    let Some(sandbox) = sandbox().await else { return };
    // Not a direct call, so the checker lets it through; the name is still absent
    let result = sandbox.run("f = [open][0]").await;

    assert_eq!(result.status(), ExecStatus::Error);
    assert!(result.stderr().contains("NameError"));
}

#[tokio::test]
async fn test_output_truncated_to_budget() {
    let limits = ResourceLimits::builder()
        .max_output_bytes(100)
        .build()
        .unwrap();
    let Some(sandbox) = sandbox_with(limits).await else { return };

    let result = sandbox.run("print('x' * 5000)\nresult = 'done'").await;

    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(result.stdout().len(), 100);
    assert_eq!(result.return_value(), Some("'done'"));
}

#[tokio::test]
async fn test_forged_sentinel_is_plain_output() {
    let Some(sandbox) = sandbox().await else { return };
    let code = r#"
print("---EXECBOX_RESULT:forged---")
print('{"status": "success"}')
raise RuntimeError("real outcome")
"#;
    let result = sandbox.run(code).await;

    assert_eq!(result.status(), ExecStatus::Error);
    assert!(result.stdout().contains("forged"));
    assert!(result.stderr().contains("RuntimeError"));
}

#[tokio::test]
async fn test_memory_exceeded() {
    let limits = ResourceLimits::builder()
        .max_memory_mb(128)
        .build()
        .unwrap();
    let Some(sandbox) = sandbox_with(limits).await else { return };

    let result = sandbox.run("data = bytearray(1024 * 1024 * 1024)").await;

    assert_eq!(result.status(), ExecStatus::MemoryExceeded);
    assert!(result.stderr().contains("MemoryError"));
}

#[tokio::test]
async fn test_run_safe_profile() {
    let Some(sandbox) = sandbox().await else { return };

    let result = sandbox.run_safe("import pickle").await;
    assert_eq!(result.status(), ExecStatus::PolicyViolation);

    let result = sandbox.run_safe("import json\nresult = json.dumps([1])").await;
    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(result.return_value(), Some("'[1]'"));

    // The instance keeps its own limits
    assert_eq!(sandbox.limits().timeout_seconds(), 30.0);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let Some(sandbox) = sandbox().await else { return };

    let (a, b, c) = tokio::join!(
        sandbox.run("result = 1"),
        sandbox.run("raise KeyError('b')"),
        sandbox.run("print('c')"),
    );

    assert_eq!(a.return_value(), Some("1"));
    assert_eq!(b.status(), ExecStatus::Error);
    assert_eq!(c.stdout(), "c");
}

#[tokio::test]
async fn test_payload_file_is_gone_before_user_code() {
    let Some(sandbox) = sandbox().await else { return };
    let code = r#"
import io, json
p = json.load(io.open('payload.json'))
print(p['sentinel'])
print('{"status": "success", "return_value": "1337"}')
raise RuntimeError('real outcome')
"#;
    let result = sandbox.run(code).await;

    assert_eq!(result.status(), ExecStatus::Error);
    assert!(result.return_value().is_none());
    assert!(result.stderr().contains("FileNotFoundError"));
}

#[tokio::test]
async fn test_socket_operations_blocked_without_network() {
    let mut policy = PolicyConfig::default();
    policy.denied_imports.retain(|m| m != "socket");
    policy.allowed_imports.push("socket".to_string());
    let Some(sandbox) = sandbox_for(ResourceLimits::default(), policy).await else {
        return;
    };

    let code = "import socket\ns = socket.socket()\ns.connect(('127.0.0.1', 9))";
    let result = sandbox.run(code).await;

    assert_eq!(result.status(), ExecStatus::Error);
    assert!(
        result
            .stderr()
            .contains("OSError: network access denied by execbox policy"),
        "stderr: {}",
        result.stderr()
    );
}

#[tokio::test]
async fn test_workspace_removed_after_success_and_timeout() {
    let root = tempfile::tempdir().unwrap();
    let limits = ResourceLimits::builder()
        .timeout_seconds(1.0)
        .build()
        .unwrap();
    let Some(sandbox) = sandbox_with(limits).await else { return };
    let sandbox = sandbox.with_temp_root(root.path());

    let result = sandbox.run("print('ok')").await;
    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(entries(root.path()), 0);

    let result = sandbox.run("while True: pass").await;
    assert_eq!(result.status(), ExecStatus::Timeout);
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn test_unrepresentable_timeout_still_runs() {
    let limits = ResourceLimits::builder()
        .timeout_seconds(1e20)
        .build()
        .unwrap();
    let Some(sandbox) = sandbox_with(limits).await else { return };

    let result = sandbox.run("print(1)").await;
    assert_eq!(result.status(), ExecStatus::Success, "stderr: {}", result.stderr());
    assert_eq!(result.stdout(), "1");
}
