//! External command execution
//!
//! Every call to `nft`, `ip` or `sysctl` goes through a [`CommandRunner`].
//! The production runner spawns the tool with `tokio::process`, feeds optional
//! stdin, and kills the child when the configured timeout expires.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

/// Default upper bound for a single external command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output (lossy UTF-8)
    pub stdout: String,
    /// Standard error (lossy UTF-8)
    pub stderr: String,
}

/// Runs external tools.
///
/// Implementations return `Ok` only for a zero exit status; anything else is
/// a [`CommandError`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, writing `stdin` to the child if given
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs commands on the host with a per-call timeout
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    /// Create a runner with the given timeout
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Configured timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        debug!("exec: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let input = stdin.map(str::to_owned);
        let pipe = child.stdin.take();
        let work = async move {
            if let (Some(mut pipe), Some(input)) = (pipe, input) {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        // Dropping `work` on timeout drops the child, and kill_on_drop reaps it.
        let output = match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandError::Spawn {
                    program: program.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stdout,
                stderr,
            })
        }
    }
}

/// Command runner that records invocations and replays queued results
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    calls: parking_lot::Mutex<Vec<(String, Vec<String>, Option<String>)>>,
    results: parking_lot::Mutex<std::collections::VecDeque<Result<CommandOutput, CommandError>>>,
}

#[cfg(test)]
impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next call; calls beyond the queue succeed
    pub(crate) fn push_result(&self, result: Result<CommandOutput, CommandError>) {
        self.results.lock().push_back(result);
    }

    /// Queue a non-zero exit with the given stderr
    pub(crate) fn push_failure(&self, program: &str, stderr: &str) {
        self.push_result(Err(CommandError::Failed {
            program: program.to_string(),
            status: "exit status: 2".to_string(),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }));
    }

    /// Recorded calls as `program arg arg ...` lines
    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(program, args, _)| {
                let mut line = program.clone();
                for arg in args {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            })
            .collect()
    }

    /// Stdin passed to the `index`-th call
    pub(crate) fn stdin_of(&self, index: usize) -> Option<String> {
        self.calls.lock().get(index).and_then(|(_, _, stdin)| stdin.clone())
    }
}

#[cfg(test)]
#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push((
            program.to_string(),
            args.iter().map(|a| (*a).to_string()).collect(),
            stdin.map(str::to_owned),
        ));
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }
}
