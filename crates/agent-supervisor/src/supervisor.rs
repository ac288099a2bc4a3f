//! Two-process supervision
//!
//! Starts the tool backend, gives it a grace period, then starts the agent.
//! Both children are awaited directly. Whatever ends the run (a signal or a
//! child exiting on its own), the survivors are stopped in reverse start
//! order: SIGTERM first, a kill once the stop timeout runs out.

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start {name}: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub tool_backend: Vec<String>,
    pub agent: Vec<String>,
    /// Wait between starting the backend and starting the agent
    pub grace: Duration,
    /// Wait after SIGTERM before killing
    pub stop_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            tool_backend: command(&lookup, "SUPERVISOR_TOOL_BACKEND_CMD")?,
            agent: command(&lookup, "SUPERVISOR_AGENT_CMD")?,
            grace: seconds(&lookup, "SUPERVISOR_GRACE_SECS", 3)?,
            stop_timeout: seconds(&lookup, "SUPERVISOR_STOP_TIMEOUT_SECS", 5)?,
        })
    }
}

fn command(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Vec<String>> {
    let raw = lookup(key).ok_or_else(|| SupervisorError::Config(format!("{key} is not set")))?;
    let argv = shell_words::split(&raw).map_err(|e| SupervisorError::Config(format!("{key}: {e}")))?;
    if argv.is_empty() {
        return Err(SupervisorError::Config(format!("{key} is empty")));
    }
    Ok(argv)
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| SupervisorError::Config(format!("{key}: cannot parse '{v}'"))),
        None => Ok(Duration::from_secs(default)),
    }
}

/// How a supervised run ended
#[derive(Debug)]
pub enum Outcome {
    /// Shutdown was requested and both children were stopped
    Signalled,
    /// A child exited without being asked to; no status if it could not be reaped
    ChildExited {
        name: &'static str,
        status: Option<ExitStatus>,
    },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Signalled => 0,
            Self::ChildExited { .. } => 1,
        }
    }
}

struct Managed {
    name: &'static str,
    child: Child,
}

impl Managed {
    fn spawn(name: &'static str, argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SupervisorError::Config(format!("no command for {name}")))?;
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn { name, source })?;
        info!(name, pid = child.id(), command = %argv.join(" "), "Started");
        Ok(Self { name, child })
    }

    /// SIGTERM, then kill after `timeout`
    async fn stop(mut self, timeout: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            info!(name = self.name, %status, "Already exited");
            return;
        }

        if let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(name = self.name, error = %e, "SIGTERM failed");
            }
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => info!(name = self.name, %status, "Stopped"),
            Ok(Err(e)) => warn!(name = self.name, error = %e, "Wait failed"),
            Err(_) => {
                warn!(name = self.name, timeout_secs = timeout.as_secs_f32(), "Did not stop in time; killing");
                if let Err(e) = self.child.kill().await {
                    warn!(name = self.name, error = %e, "Kill failed");
                }
            }
        }
    }
}

fn exited(name: &'static str, status: io::Result<ExitStatus>) -> Outcome {
    match status {
        Ok(status) => {
            warn!(name, %status, "Exited unexpectedly");
            Outcome::ChildExited {
                name,
                status: Some(status),
            }
        }
        Err(e) => {
            warn!(name, error = %e, "Lost track of child");
            Outcome::ChildExited { name, status: None }
        }
    }
}

/// Run both children until `shutdown` resolves or one of them exits
pub async fn run(config: &SupervisorConfig, shutdown: impl Future<Output = ()>) -> Result<Outcome> {
    tokio::pin!(shutdown);

    let mut backend = Managed::spawn("tool-backend", &config.tool_backend)?;

    info!(grace_secs = config.grace.as_secs_f32(), "Waiting for tool backend");
    let early = tokio::select! {
        () = tokio::time::sleep(config.grace) => None,
        status = backend.child.wait() => Some(exited(backend.name, status)),
        () = &mut shutdown => Some(Outcome::Signalled),
    };
    if let Some(outcome) = early {
        backend.stop(config.stop_timeout).await;
        return Ok(outcome);
    }

    let mut agent = match Managed::spawn("agent", &config.agent) {
        Ok(agent) => agent,
        Err(e) => {
            backend.stop(config.stop_timeout).await;
            return Err(e);
        }
    };

    let outcome = tokio::select! {
        status = backend.child.wait() => exited(backend.name, status),
        status = agent.child.wait() => exited(agent.name, status),
        () = &mut shutdown => {
            info!("Shutdown requested");
            Outcome::Signalled
        }
    };

    agent.stop(config.stop_timeout).await;
    backend.stop(config.stop_timeout).await;
    Ok(outcome)
}
