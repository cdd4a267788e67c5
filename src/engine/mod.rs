//! Worker process management: limits, wire protocol and execution

pub mod executor;
pub mod limiter;
pub mod protocol;

pub use executor::Executor;
pub use limiter::ResourceLimiter;
