//! Run Controller: decides whether a workflow run may start, runs it, and
//! keeps the test-run / simulation lifecycle of drafts.

pub mod config;
pub mod rate_limit;
pub mod circuit;
pub mod scheduler;
pub mod controller;

pub use circuit::CircuitBreaker;
pub use config::RunControlConfig;
pub use controller::{RunController, RunReport, TestRunToggle};
pub use rate_limit::RateLimiter;
pub use scheduler::{RunRequest, RunScheduler};
