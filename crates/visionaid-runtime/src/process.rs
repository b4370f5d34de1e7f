//! Agents backed by an external program.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, BlockingAgent, DetachableAgent};

/// How often a blocking run checks whether the child has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs a perceptual agent as a child process.
///
/// The same type serves both modes. As a [`BlockingAgent`], `run` spawns
/// the program and returns when it exits. As a [`DetachableAgent`],
/// `run_detached` spawns it and returns immediately. In both modes
/// `terminate` kills the child if it is still alive, and is a no-op
/// otherwise.
pub struct ProcessAgent {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    description: String,
    child: Mutex<Option<Child>>,
}

impl ProcessAgent {
    /// Creates an agent that runs `program` with `args`.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let program = program.into();
        Self {
            description: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            child: Mutex::new(None),
        }
    }

    /// Sets an environment variable for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets the description shown in listings.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether a child is alive.
    pub async fn is_running(&self) -> bool {
        let mut slot = self.child.lock().await;
        match slot.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn spawn(&self) -> Result<(), AgentError> {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return Err(AgentError::Start(format!("{} is already running", self.program)));
            }
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Start(format!("{}: {}", self.program, e)))?;

        info!(program = %self.program, pid = ?child.id(), "agent process started");
        *slot = Some(child);
        Ok(())
    }

    async fn wait(&self) -> Result<(), AgentError> {
        loop {
            {
                let mut slot = self.child.lock().await;
                let Some(child) = slot.as_mut() else {
                    // Taken by terminate.
                    return Ok(());
                };
                if let Some(status) = child.try_wait()? {
                    slot.take();
                    debug!(program = %self.program, status = %status, "agent process exited");
                    if status.success() {
                        return Ok(());
                    }
                    return Err(AgentError::Run(format!("{} exited with {}", self.program, status)));
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Kills the child if it is alive. Idempotent.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return Ok(());
        };

        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }

        match child.kill().await {
            Ok(()) => {
                info!(program = %self.program, "agent process killed");
                Ok(())
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "failed to kill agent process");
                Err(AgentError::Terminate(format!("{}: {}", self.program, e)))
            }
        }
    }
}

#[async_trait]
impl BlockingAgent for ProcessAgent {
    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self) -> Result<(), AgentError> {
        self.spawn().await?;
        self.wait().await
    }

    async fn terminate(&self) -> Result<(), AgentError> {
        self.stop().await
    }
}

#[async_trait]
impl DetachableAgent for ProcessAgent {
    fn description(&self) -> &str {
        &self.description
    }

    async fn run_detached(&self) -> Result<(), AgentError> {
        self.spawn().await
    }

    async fn terminate(&self) -> Result<(), AgentError> {
        self.stop().await
    }
}
