//! execbox: best-effort sandbox for running untrusted Python snippets
//!
//! Code is checked against an import and builtin policy before it runs, then
//! executed in a separate interpreter process with memory, CPU and wall clock
//! limits. Every run produces an [`ExecResult`].
//!
//! This is not a security boundary against a determined attacker: the policy
//! check is syntactic and network blocking is advisory.

pub mod capture;
pub mod checker;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod sandbox;

pub use crate::checker::PolicyChecker;
pub use crate::config::ExecboxConfig;
pub use crate::core::limits::ResourceLimits;
pub use crate::core::policy::PolicyConfig;
pub use crate::core::status::{ExecResult, ExecStatus};
pub use crate::engine::Executor;
pub use crate::error::{ExecboxError, Result};
pub use crate::sandbox::Sandbox;
