//! OS-level resource limits for the worker process
//!
//! | Limit | Value |
//! |-------|-------|
//! | `RLIMIT_AS` | `max_memory_mb` MiB |
//! | `RLIMIT_CPU` | `max_cpu_seconds` soft, +1s hard |
//! | `RLIMIT_NPROC` | 0 (no forking) |
//!
//! Every control is best-effort: one that the platform refuses is skipped and
//! the others still apply. `RLIMIT_NPROC` is per-user and is not enforced for
//! privileged users.
//!
//! Network blocking is advisory. The worker swaps its socket class for one
//! whose connect/bind entry points always fail; native extensions or anything
//! holding a reference to the original class are unaffected. A real egress
//! boundary needs namespace or firewall controls, which this crate does not
//! provide.

use nix::sys::resource::{setrlimit, Resource};
use serde::Serialize;

use crate::core::limits::ResourceLimits;

/// Extra seconds between the soft and the hard CPU limit, so SIGXCPU arrives
/// before SIGKILL
pub const CPU_HARD_GRACE_SECONDS: u64 = 1;

/// Socket methods the worker replaces when network is disabled
pub const BLOCKED_SOCKET_METHODS: &[&str] = &[
    "connect",
    "connect_ex",
    "bind",
    "listen",
    "sendto",
    "sendmsg",
];

pub const NETWORK_DENIED_MESSAGE: &str = "network access denied by execbox policy";

/// Directive for the worker to disable its socket entry points
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkGuard {
    pub blocked_methods: Vec<String>,
    pub message: String,
}

/// Applies resource ceilings to the current process
pub struct ResourceLimiter;

impl ResourceLimiter {
    /// Apply memory, CPU and process ceilings to the calling process.
    ///
    /// Runs between fork and exec, so it must not allocate, lock or log.
    /// A control the platform refuses is skipped.
    pub fn apply(limits: &ResourceLimits) {
        let memory = limits.max_memory_bytes();
        let (cpu_soft, cpu_hard) = cpu_limits(limits);

        let _ = setrlimit(Resource::RLIMIT_AS, memory, memory);
        let _ = setrlimit(Resource::RLIMIT_CPU, cpu_soft, cpu_hard);
        limit_processes();
    }

    /// Network directive for the worker, `None` when network is allowed
    pub fn block_network(limits: &ResourceLimits) -> Option<NetworkGuard> {
        if limits.allow_network() {
            return None;
        }
        Some(NetworkGuard {
            blocked_methods: BLOCKED_SOCKET_METHODS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            message: NETWORK_DENIED_MESSAGE.to_string(),
        })
    }
}

/// Soft and hard `RLIMIT_CPU` values in whole seconds
pub fn cpu_limits(limits: &ResourceLimits) -> (u64, u64) {
    let soft = (limits.max_cpu_seconds().ceil() as u64).max(1);
    (soft, soft.saturating_add(CPU_HARD_GRACE_SECONDS))
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
))]
fn limit_processes() {
    let _ = setrlimit(Resource::RLIMIT_NPROC, 0, 0);
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
fn limit_processes() {}
