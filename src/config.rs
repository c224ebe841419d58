//! Command-line configuration

use crate::auth::Credentials;
use crate::errors::{Result, RunnerError};
use crate::execution::{CommandSpec, DEFAULT_CAPTURE_LIMIT, SpawnOptions, StreamSettings};
use crate::tls::TlsPaths;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Grace delay between answering `/die` and exiting
pub const DIE_GRACE: Duration = Duration::from_secs(1);

/// Longest accepted rate interval, deadline or idle timeout
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Parser, Debug, Clone)]
#[command(name = "httprunner")]
#[command(version, about = "Run a preconfigured command over HTTP(S)", long_about = None)]
#[command(after_help = "ENDPOINTS:
    /run    start the command and stream its early output
    /ls     list running instances
    /kill   kill all running instances
    /die    kill all running instances and stop the server

EXAMPLES:
    httprunner --command 'make deploy'
    httprunner --command './build.sh' --userpass ci:secret --rate 10s
    httprunner --command 'tail -f /var/log/syslog' --tls-cert cert.pem --tls-key key.pem
")]
pub struct Cli {
    /// Listening address and port
    #[arg(
        long,
        env = "HTTPRUNNER_HOST",
        value_name = "ADDR",
        default_value = "0.0.0.0:8080"
    )]
    pub host: String,

    /// The command to run, split on whitespace
    #[arg(long, env = "HTTPRUNNER_COMMAND", value_name = "COMMAND")]
    pub command: String,

    /// Optional user:password protection
    #[arg(long, env = "HTTPRUNNER_USERPASS", value_name = "USER:PASS")]
    pub userpass: Option<String>,

    /// Start at most one process per duration (0s disables the limit)
    #[arg(
        long,
        env = "HTTPRUNNER_RATE",
        value_name = "DURATION",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub rate: Duration,

    /// Longest a /run request streams output
    #[arg(
        long,
        env = "HTTPRUNNER_DEADLINE",
        value_name = "DURATION",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub deadline: Duration,

    /// Stop streaming after this long without new output
    #[arg(
        long,
        env = "HTTPRUNNER_IDLE_TIMEOUT",
        value_name = "DURATION",
        default_value = "200ms",
        value_parser = humantime::parse_duration
    )]
    pub idle_timeout: Duration,

    /// Maximum bytes of output captured per run
    #[arg(
        long,
        env = "HTTPRUNNER_CAPTURE_LIMIT",
        value_name = "BYTES",
        default_value_t = DEFAULT_CAPTURE_LIMIT
    )]
    pub capture_limit: usize,

    /// TLS certificate chain (PEM)
    #[arg(
        long,
        env = "HTTPRUNNER_TLS_CERT",
        value_name = "PATH",
        requires = "tls_key"
    )]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(
        long,
        env = "HTTPRUNNER_TLS_KEY",
        value_name = "PATH",
        requires = "tls_cert"
    )]
    pub tls_key: Option<PathBuf>,

    /// Do not mirror command output on the server's stdout
    #[arg(long)]
    pub no_echo: bool,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated, immutable server configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub host: String,
    pub command: CommandSpec,
    pub credentials: Option<Credentials>,
    pub rate: Duration,
    pub stream: StreamSettings,
    pub spawn: SpawnOptions,
    pub tls: Option<TlsPaths>,
    pub die_grace: Duration,
}

impl RunnerConfig {
    /// Defaults for everything but the command
    pub fn new(command: CommandSpec) -> Self {
        Self {
            host: "0.0.0.0:8080".to_string(),
            command,
            credentials: None,
            rate: Duration::from_secs(1),
            stream: StreamSettings::default(),
            spawn: SpawnOptions::default(),
            tls: None,
            die_grace: DIE_GRACE,
        }
    }
}

impl Cli {
    pub fn into_config(self) -> Result<RunnerConfig> {
        let command = CommandSpec::parse(&self.command)?;
        let credentials = self
            .userpass
            .as_deref()
            .filter(|userpass| !userpass.is_empty())
            .map(Credentials::parse)
            .transpose()?;

        if self.deadline.is_zero() {
            return Err(RunnerError::InvalidConfig(
                "deadline must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(RunnerError::InvalidConfig(
                "idle timeout must be greater than zero".to_string(),
            ));
        }
        check_upper_bound("rate", self.rate)?;
        check_upper_bound("deadline", self.deadline)?;
        check_upper_bound("idle timeout", self.idle_timeout)?;
        if self.capture_limit == 0 {
            return Err(RunnerError::InvalidConfig(
                "capture limit must be greater than zero".to_string(),
            ));
        }

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            (None, None) => None,
            _ => {
                return Err(RunnerError::InvalidConfig(
                    "--tls-cert and --tls-key must be given together".to_string(),
                ));
            }
        };

        Ok(RunnerConfig {
            host: self.host,
            command,
            credentials,
            rate: self.rate,
            stream: StreamSettings {
                deadline: self.deadline,
                idle_timeout: self.idle_timeout,
            },
            spawn: SpawnOptions {
                capture_limit: self.capture_limit,
                echo_stdout: !self.no_echo,
            },
            tls,
            die_grace: DIE_GRACE,
        })
    }
}

fn check_upper_bound(name: &str, value: Duration) -> Result<()> {
    if value > MAX_DURATION {
        return Err(RunnerError::InvalidConfig(format!(
            "{} must be at most {}",
            name,
            humantime::format_duration(MAX_DURATION)
        )));
    }
    Ok(())
}
