//! httprunner: run one preconfigured command over HTTP(S)
//!
//! Each `/run` request starts a fresh instance of the configured command and
//! streams back whatever it prints during a short window. Instances keep
//! running after the response ends and can be listed or killed later.
//!
//! # Modules
//!
//! - **execution**: Spawning, output capture, rate limiting and the process registry
//! - **runner**: The command runner shared by all handlers
//! - **server**: Routes, handlers and the listener
//! - **auth**: Optional HTTP Basic protection
//! - **tls**: Certificate and key loading
//! - **config**: Command-line configuration
//!
//! # Example
//!
//! ```ignore
//! use httprunner::{CommandSpec, RunnerConfig};
//!
//! let config = RunnerConfig::new(CommandSpec::parse("make deploy")?);
//! httprunner::server::serve(config).await?;
//! ```

// Core modules
pub mod errors;
pub mod logging;

// Layered modules
pub mod auth;
pub mod config;
pub mod execution;
pub mod tls;

// Service
pub mod runner;
pub mod server;

// Public API
pub use auth::Credentials;
pub use config::{Cli, RunnerConfig};
pub use errors::{Result, RunnerError};
pub use execution::{CaptureBuffer, CommandSpec, ProcessEntry, ProcessRegistry, StreamSettings};
pub use runner::Runner;
pub use server::AppState;
