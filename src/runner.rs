//! The command runner service: one configured command, its rate limiter and
//! its process registry, shared by all request handlers.

use crate::config::RunnerConfig;
use crate::errors::{Result, RunnerError};
use crate::execution::{
    CommandSpec, ProcessEntry, ProcessRegistry, RunningCommand, SpawnOptions, SpawnRateLimiter,
    StreamSettings, spawn,
};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct Runner {
    command: CommandSpec,
    spawn_options: SpawnOptions,
    stream_settings: StreamSettings,
    limiter: SpawnRateLimiter,
    registry: Arc<ProcessRegistry>,
}

impl Runner {
    pub fn new(
        command: CommandSpec,
        rate: Duration,
        spawn_options: SpawnOptions,
        stream_settings: StreamSettings,
    ) -> Self {
        Self {
            command,
            spawn_options,
            stream_settings,
            limiter: SpawnRateLimiter::new(rate),
            registry: Arc::new(ProcessRegistry::new()),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.rate,
            config.spawn.clone(),
            config.stream,
        )
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn stream_settings(&self) -> &StreamSettings {
        &self.stream_settings
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &SpawnRateLimiter {
        &self.limiter
    }

    /// Start the command if the rate limiter allows it.
    ///
    /// The limiter is only advanced once the process is actually running.
    pub fn start(&self) -> Result<RunningCommand> {
        if !self.limiter.try_acquire() {
            debug!("rejecting run of {}: rate limited", self.command);
            return Err(RunnerError::RateLimited);
        }

        let running = spawn(&self.command, &self.spawn_options, &self.registry)?;
        self.limiter.record_start();
        Ok(running)
    }

    pub fn list(&self) -> Vec<ProcessEntry> {
        self.registry.list_ordered()
    }

    /// Kill and forget every running instance. Returns how many signals
    /// could not be delivered.
    pub fn kill_all(&self) -> usize {
        let tracked = self.registry.len();
        let failures = self.registry.terminate_all().len();
        info!(
            "killed {} of {} tracked processes",
            tracked.saturating_sub(failures),
            tracked
        );
        failures
    }
}
