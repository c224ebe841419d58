//! Tracking of live command processes
//!
//! Every started process is registered under a [`ProcessKey`] made of its
//! wall-clock start time and a per-registry sequence number, so two starts
//! within the same clock tick never collide. The registry is the only owner
//! of the termination handle; readers get snapshots.

use crate::errors::{Result, RunnerError};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Unique registry key. Orders by start time, then by sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessKey {
    started_at: DateTime<Utc>,
    seq: u64,
}

impl ProcessKey {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// A spawned process the registry can signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedProcess {
    pid: u32,
}

impl ManagedProcess {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send SIGKILL
    pub fn kill(&self) -> Result<()> {
        let raw = i32::try_from(self.pid)
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| RunnerError::Signal {
                pid: self.pid,
                reason: "not a valid process id".to_string(),
            })?;

        kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|e| RunnerError::Signal {
            pid: self.pid,
            reason: e.to_string(),
        })
    }
}

/// One line of a registry listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub started_at: DateTime<Utc>,
    pub pid: u32,
}

impl fmt::Display for ProcessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {}",
            self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.pid
        )
    }
}

/// Concurrency-safe map of live processes
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: RwLock<BTreeMap<ProcessKey, ManagedProcess>>,
    next_seq: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ProcessKey, ManagedProcess>> {
        self.processes
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ProcessKey, ManagedProcess>> {
        self.processes
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Stamp a fresh key for a process starting now
    pub fn next_key(&self) -> ProcessKey {
        ProcessKey {
            started_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn register(&self, key: ProcessKey, process: ManagedProcess) {
        debug!("Tracking pid {} (seq {})", process.pid(), key.seq());
        self.write().insert(key, process);
    }

    /// Forget a process. Returns false if it was already gone.
    pub fn unregister(&self, key: &ProcessKey) -> bool {
        self.write().remove(key).is_some()
    }

    /// Unregisters `key` when the returned guard is dropped
    pub fn guard(self: &Arc<Self>, key: ProcessKey) -> RegistrationGuard {
        RegistrationGuard {
            registry: Arc::clone(self),
            key,
        }
    }

    /// Kill every tracked process and stop tracking all of them.
    ///
    /// Signal failures are logged and returned; they never stop the sweep
    /// and the registry ends up empty either way.
    pub fn terminate_all(&self) -> Vec<RunnerError> {
        let mut processes = self.write();
        let mut errors = Vec::new();
        for process in processes.values() {
            if let Err(e) = process.kill() {
                warn!("couldn't kill child: {}", e);
                errors.push(e);
            }
        }
        processes.clear();
        errors
    }

    /// Snapshot of live processes, oldest first
    pub fn list_ordered(&self) -> Vec<ProcessEntry> {
        self.read()
            .iter()
            .map(|(key, process)| ProcessEntry {
                started_at: key.started_at,
                pid: process.pid,
            })
            .collect()
    }

    pub fn contains(&self, key: &ProcessKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Scoped registration: removes its key from the registry on drop
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ProcessRegistry>,
    key: ProcessKey,
}

impl RegistrationGuard {
    pub fn key(&self) -> ProcessKey {
        self.key
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if !self.registry.unregister(&self.key) {
            debug!("seq {} already untracked", self.key.seq());
        }
    }
}
