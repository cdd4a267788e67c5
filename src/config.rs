//! Configuration loading
//!
//! Lookup order: an explicit file, then `EXECBOX_CONFIG`, then the default
//! embedded from `files/execbox.toml`. `EXECBOX_PYTHON` overrides the
//! interpreter from whichever file was used.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::core::limits::ResourceLimits;
use crate::core::policy::PolicyConfig;
use crate::error::{ExecboxError, Result};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "EXECBOX_CONFIG";

/// Environment variable overriding the worker interpreter
pub const PYTHON_ENV: &str = "EXECBOX_PYTHON";

const EMBEDDED_CONFIG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/execbox.toml"));

/// Validated sandbox configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecboxConfig {
    pub limits: ResourceLimits,
    pub policy: PolicyConfig,
    /// `None` means the default interpreter name
    pub interpreter: Option<PathBuf>,
}

/// Raw TOML configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    interpreter: Option<String>,
    #[serde(default)]
    limits: RawLimits,
    #[serde(default)]
    policy: PolicyConfig,
}

/// Raw `[limits]` table; absent keys keep their defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLimits {
    timeout_seconds: Option<f64>,
    max_memory_mb: Option<u64>,
    max_output_bytes: Option<usize>,
    allow_network: Option<bool>,
    max_cpu_seconds: Option<f64>,
}

impl RawLimits {
    fn into_limits(self) -> Result<ResourceLimits> {
        let mut builder = ResourceLimits::builder();
        if let Some(v) = self.timeout_seconds {
            builder = builder.timeout_seconds(v);
        }
        if let Some(v) = self.max_memory_mb {
            builder = builder.max_memory_mb(v);
        }
        if let Some(v) = self.max_output_bytes {
            builder = builder.max_output_bytes(v);
        }
        if let Some(v) = self.allow_network {
            builder = builder.allow_network(v);
        }
        if let Some(v) = self.max_cpu_seconds {
            builder = builder.max_cpu_seconds(v);
        }
        builder.build()
    }
}

impl ExecboxConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ExecboxError::Config(e.to_string()))?;

        let interpreter = match raw.interpreter {
            Some(name) if name.trim().is_empty() => {
                return Err(ExecboxError::Config(
                    "interpreter must not be empty".to_string(),
                ))
            }
            Some(name) => Some(PathBuf::from(name)),
            None => None,
        };

        Ok(Self {
            limits: raw.limits.into_limits()?,
            policy: raw.policy,
            interpreter,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ExecboxError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// The configuration shipped with the crate
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_CONFIG)
    }

    /// Load using the explicit path, then the environment, then the embedded default
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let python = std::env::var(PYTHON_ENV).ok();
        Self::resolve(explicit, from_env.as_deref(), python)
    }

    fn resolve(
        explicit: Option<&Path>,
        from_env: Option<&Path>,
        python: Option<String>,
    ) -> Result<Self> {
        let mut config = match explicit.or(from_env) {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => {
                debug!("Using embedded configuration");
                Self::embedded()?
            }
        };

        if let Some(python) = python.filter(|p| !p.trim().is_empty()) {
            debug!("Interpreter overridden by {}: {}", PYTHON_ENV, python);
            config.interpreter = Some(PathBuf::from(python));
        }
        Ok(config)
    }
}
