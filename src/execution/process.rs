//! Spawning the configured command and watching it until it exits

use crate::errors::{Result, RunnerError};
use crate::execution::capture::{CaptureBuffer, DEFAULT_CAPTURE_LIMIT, Drain};
use crate::execution::registry::{ManagedProcess, ProcessKey, ProcessRegistry, RegistrationGuard};
use log::{debug, error, info, warn};
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Ceiling on stderr kept around for log messages
pub const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

const PIPE_CHUNK_SIZE: usize = 8192;

/// Program and arguments, split on whitespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| RunnerError::InvalidConfig("no command to run".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Per-spawn output handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Ceiling on captured stdout
    pub capture_limit: usize,
    /// Mirror child stdout onto our own stdout
    pub echo_stdout: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            echo_stdout: true,
        }
    }
}

/// A started, registered process as seen by the request that started it
#[derive(Debug)]
pub struct RunningCommand {
    key: ProcessKey,
    pid: u32,
    output: Arc<CaptureBuffer>,
}

impl RunningCommand {
    pub fn key(&self) -> ProcessKey {
        self.key
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Captured stdout
    pub fn output(&self) -> Arc<CaptureBuffer> {
        Arc::clone(&self.output)
    }
}

/// Start `spec`, register it, and hand ownership of the child to a
/// completion watcher.
///
/// Nothing is registered when the spawn itself fails.
pub fn spawn(
    spec: &CommandSpec,
    options: &SpawnOptions,
    registry: &Arc<ProcessRegistry>,
) -> Result<RunningCommand> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| {
            let err = RunnerError::Spawn {
                program: spec.program.clone(),
                source,
            };
            error!("{}", err);
            err
        })?;

    let pid = child.id();
    info!("Started {} with pid {}", spec.program, pid);

    let output = Arc::new(CaptureBuffer::new(options.capture_limit));
    let stderr = Arc::new(CaptureBuffer::new(STDERR_CAPTURE_LIMIT));

    match child.stdout.take() {
        Some(pipe) => {
            spawn_pipe_reader(pipe, Arc::clone(&output), options.echo_stdout);
        }
        None => output.close(),
    }
    let stderr_reader = child
        .stderr
        .take()
        .map(|pipe| spawn_pipe_reader(pipe, Arc::clone(&stderr), false));

    let key = registry.next_key();
    registry.register(key, ManagedProcess::new(pid));
    let guard = registry.guard(key);

    let watched = WatchedChild {
        child,
        guard,
        program: spec.program.clone(),
        stderr,
        stderr_reader,
    };
    thread::spawn(move || watched.wait());

    Ok(RunningCommand { key, pid, output })
}

/// Copy a pipe into a capture buffer until EOF, then close the buffer.
///
/// Keeps reading after the buffer starts discarding so the child never
/// blocks on a full pipe.
fn spawn_pipe_reader<R>(mut pipe: R, sink: Arc<CaptureBuffer>, echo: bool) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; PIPE_CHUNK_SIZE];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if echo {
                        let mut stdout = io::stdout().lock();
                        if let Err(e) = stdout.write_all(&chunk[..n]).and_then(|_| stdout.flush())
                        {
                            debug!("cannot mirror child output: {}", e);
                        }
                    }
                    sink.write(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("output copy error: {}", e);
                    break;
                }
            }
        }
        sink.close();
    })
}

/// Everything the completion watcher owns for one spawn
struct WatchedChild {
    child: Child,
    guard: RegistrationGuard,
    program: String,
    stderr: Arc<CaptureBuffer>,
    stderr_reader: Option<JoinHandle<()>>,
}

impl WatchedChild {
    fn wait(self) {
        let WatchedChild {
            mut child,
            guard,
            program,
            stderr,
            stderr_reader,
        } = self;
        let pid = child.id();
        let status = child.wait();

        // Stop tracking as soon as the exit is observed; the stderr pipe
        // may stay open longer if the child left descendants behind.
        drop(guard);

        match status {
            Ok(status) if status.success() => debug!("{} (pid {}) exited", program, pid),
            Ok(status) => {
                if let Some(reader) = stderr_reader {
                    let _ = reader.join();
                }
                warn!("{} failed: {}, {}", program, status, drain_lossy(&stderr));
            }
            Err(e) => warn!("{} (pid {}) wait failed: {}", program, pid, e),
        }
    }
}

fn drain_lossy(buffer: &CaptureBuffer) -> String {
    let mut collected = Vec::new();
    while let Drain::Data(bytes) = buffer.drain() {
        collected.extend_from_slice(&bytes);
    }
    String::from_utf8_lossy(&collected).trim_end().to_string()
}
