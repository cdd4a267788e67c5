//! Resource limits for one run

use serde::Serialize;

use crate::error::{ExecboxError, Result};

pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;
pub const DEFAULT_MAX_MEMORY_MB: u64 = 256;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1_000_000;
pub const DEFAULT_MAX_CPU_SECONDS: f64 = 30.0;

/// Resource limits for sandbox execution.
///
/// Every numeric field is strictly positive; the only way to build one is
/// through [`ResourceLimitsBuilder::build`] (or `Default`), which checks it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceLimits {
    /// Wall clock budget enforced by the parent
    timeout_seconds: f64,
    /// Address-space ceiling for the worker
    max_memory_mb: u64,
    /// Per-stream capture budget in UTF-8 bytes
    max_output_bytes: usize,
    allow_network: bool,
    max_cpu_seconds: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            allow_network: false,
            max_cpu_seconds: DEFAULT_MAX_CPU_SECONDS,
        }
    }
}

impl ResourceLimits {
    pub fn builder() -> ResourceLimitsBuilder {
        ResourceLimitsBuilder::default()
    }

    /// Start a builder from these limits, for overriding a few fields
    pub fn to_builder(&self) -> ResourceLimitsBuilder {
        ResourceLimitsBuilder {
            limits: self.clone(),
        }
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds
    }

    pub fn max_memory_mb(&self) -> u64 {
        self.max_memory_mb
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    pub fn allow_network(&self) -> bool {
        self.allow_network
    }

    pub fn max_cpu_seconds(&self) -> f64 {
        self.max_cpu_seconds
    }

    fn validate(&self) -> Result<()> {
        check_seconds("timeout_seconds", self.timeout_seconds)?;
        check_seconds("max_cpu_seconds", self.max_cpu_seconds)?;
        if self.max_memory_mb == 0 {
            return Err(ExecboxError::InvalidLimits {
                field: "max_memory_mb",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_output_bytes == 0 {
            return Err(ExecboxError::InvalidLimits {
                field: "max_output_bytes",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

fn check_seconds(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ExecboxError::InvalidLimits {
            field,
            reason: format!("must be a finite number greater than 0, got {}", value),
        });
    }
    Ok(())
}

/// Builder for [`ResourceLimits`]
#[derive(Debug, Clone, Default)]
pub struct ResourceLimitsBuilder {
    limits: ResourceLimits,
}

impl ResourceLimitsBuilder {
    pub fn timeout_seconds(mut self, seconds: f64) -> Self {
        self.limits.timeout_seconds = seconds;
        self
    }

    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.limits.max_memory_mb = mb;
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.limits.max_output_bytes = bytes;
        self
    }

    pub fn allow_network(mut self, allow: bool) -> Self {
        self.limits.allow_network = allow;
        self
    }

    pub fn max_cpu_seconds(mut self, seconds: f64) -> Self {
        self.limits.max_cpu_seconds = seconds;
        self
    }

    pub fn build(self) -> Result<ResourceLimits> {
        self.limits.validate()?;
        Ok(self.limits)
    }
}
