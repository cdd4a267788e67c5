//! Entry point for running untrusted code
//!
//! A [`Sandbox`] bundles a limits and policy pair. Each `run` call spawns its
//! own worker, so one instance can serve concurrent runs.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ExecboxConfig;
use crate::core::limits::ResourceLimits;
use crate::core::policy::{PolicyConfig, SAFE_PROFILE_EXTRA_DENIED};
use crate::core::status::ExecResult;
use crate::engine::Executor;

/// Wall clock budget of the safe profile
pub const SAFE_TIMEOUT_SECONDS: f64 = 10.0;

/// Memory budget of the safe profile
pub const SAFE_MAX_MEMORY_MB: u64 = 128;

/// Secure code execution sandbox
///
/// ```no_run
/// # async fn demo() {
/// let sandbox = execbox::Sandbox::default();
/// let result = sandbox.run("result = 6 * 7").await;
/// assert_eq!(result.return_value(), Some("42"));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Sandbox {
    executor: Executor,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(ResourceLimits::default(), PolicyConfig::default())
    }
}

impl Sandbox {
    pub fn new(limits: ResourceLimits, policy: PolicyConfig) -> Self {
        Self {
            executor: Executor::new(limits, policy),
        }
    }

    pub fn from_config(config: &ExecboxConfig) -> Self {
        let sandbox = Self::new(config.limits.clone(), config.policy.clone());
        match &config.interpreter {
            Some(interpreter) => sandbox.with_interpreter(interpreter.clone()),
            None => sandbox,
        }
    }

    /// Pin the interpreter used for workers
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.executor = self.executor.with_interpreter(interpreter);
        self
    }

    /// Create per-run workspaces under `root`
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.executor = self.executor.with_temp_root(root);
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        self.executor.limits()
    }

    pub fn policy(&self) -> &PolicyConfig {
        self.executor.policy()
    }

    /// Name or path of the worker interpreter
    pub fn interpreter(&self) -> &Path {
        self.executor.interpreter()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Execute code with this sandbox's limits and policy
    pub async fn run(&self, code: &str) -> ExecResult {
        self.executor.run(code).await
    }

    /// Execute code under the stricter safe profile.
    ///
    /// Uses a 10s timeout, 128 MiB of memory and no network, and also denies
    /// `pickle`, `shelve` and `marshal`. This sandbox is left unchanged.
    pub async fn run_safe(&self, code: &str) -> ExecResult {
        self.safe_executor().run(code).await
    }

    fn safe_executor(&self) -> Executor {
        let limits = safe_limits();
        let policy = self.policy().with_extra_denied(SAFE_PROFILE_EXTRA_DENIED.iter().copied());
        debug!(
            "Safe profile: timeout={}s, memory={}MB, denied={:?}",
            limits.timeout_seconds(),
            limits.max_memory_mb(),
            policy.denied_imports
        );
        self.executor.with_profile(limits, policy)
    }
}

fn safe_limits() -> ResourceLimits {
    // Constant, positive values; the builder cannot reject them
    ResourceLimits::builder()
        .timeout_seconds(SAFE_TIMEOUT_SECONDS)
        .max_memory_mb(SAFE_MAX_MEMORY_MB)
        .allow_network(false)
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::ExecStatus;

    #[test]
    fn test_safe_executor_is_request_scoped() {
        let sandbox = Sandbox::default();
        let safe = sandbox.safe_executor();

        assert_eq!(safe.limits().timeout_seconds(), 10.0);
        assert_eq!(safe.limits().max_memory_mb(), 128);
        assert!(!safe.limits().allow_network());
        assert_eq!(safe.limits().max_output_bytes(), 1_000_000);
        for module in ["pickle", "shelve", "marshal"] {
            assert!(safe.policy().is_denied_module(module));
        }

        // The instance itself is untouched
        assert_eq!(sandbox.limits(), &ResourceLimits::default());
        assert!(!sandbox.policy().is_denied_module("shelve"));
    }

    #[test]
    fn test_safe_executor_keeps_interpreter() {
        let sandbox = Sandbox::default().with_interpreter("/usr/bin/python3.12");
        assert_eq!(
            sandbox.safe_executor().interpreter(),
            Path::new("/usr/bin/python3.12")
        );
        assert_eq!(Sandbox::default().interpreter(), Path::new("python3"));
    }

    #[test]
    fn test_from_config() {
        let config = ExecboxConfig::from_toml_str(
            "interpreter = \"/opt/py/bin/python\"\n[limits]\ntimeout_seconds = 3.0\n",
        )
        .unwrap();
        let sandbox = Sandbox::from_config(&config);

        assert_eq!(sandbox.limits().timeout_seconds(), 3.0);
        assert_eq!(sandbox.interpreter(), Path::new("/opt/py/bin/python"));
    }

    #[test]
    fn test_run_safe_rejects_shelve_without_spawning() {
        let sandbox = Sandbox::default().with_interpreter("/nonexistent/python");
        let result = tokio_test::block_on(sandbox.run_safe("import shelve"));

        assert_eq!(result.status(), ExecStatus::PolicyViolation);
        assert_eq!(result.stderr(), "import not allowed: shelve");
    }
}
