//! Execution layer: process spawning, tracking and output streaming
//!
//! # Features
//!
//! - **Capture**: size-capped stdout capture that never blocks the child
//! - **Rate limiting**: at most one spawn per configured interval
//! - **Registry**: live processes keyed by start time, bulk termination
//! - **Streaming**: partial output returned under idle and absolute timers
//!
//! # Examples
//!
//! ```ignore
//! use httprunner::execution::{CommandSpec, ProcessRegistry, SpawnOptions, spawn};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ProcessRegistry::new());
//! let spec = CommandSpec::parse("echo hello")?;
//! let running = spawn(&spec, &SpawnOptions::default(), &registry)?;
//! ```

pub mod capture;
pub mod limiter;
pub mod process;
pub mod registry;
pub mod stream;

pub use capture::{CaptureBuffer, DEFAULT_CAPTURE_LIMIT, Drain};
pub use limiter::SpawnRateLimiter;
pub use process::{CommandSpec, RunningCommand, SpawnOptions, spawn};
pub use registry::{ManagedProcess, ProcessEntry, ProcessKey, ProcessRegistry, RegistrationGuard};
pub use stream::{NO_OUTPUT_MESSAGE, OutputStream, StopReason, StreamSettings, respond};
