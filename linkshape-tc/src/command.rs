//! Execution of external commands.
//!
//! Commands are always argument vectors handed straight to the OS; nothing is ever passed
//! through a shell, so no value can escape its argument position. Running a command never
//! fails: spawn errors, non-zero exits and timeouts are all reported in the returned
//! [`CommandResult`].

use std::{fmt, process::Stdio, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    audit::{AuditRecord, AuditSink},
    options::EngineOptions,
};

/// A command to run, as an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<String>,
    privileged: bool,
}

impl Command {
    /// A command running `program`, unprivileged.
    pub fn new(program: impl Into<String>) -> Self {
        Self { argv: vec![program.into()], privileged: false }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Appends every argument of `args`.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Marks the command as mutating kernel state, so it runs behind the privilege prefix.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Whether the command runs behind the privilege prefix.
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// The argument vector, without any privilege prefix.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The process exited with the given code.
    Exited { code: i32 },
    /// The process was killed by a signal.
    Signaled,
    /// The process did not finish in time and was killed.
    TimedOut { after_ms: u64 },
    /// The process could not be started at all.
    SpawnFailed,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exit code {code}"),
            Self::Signaled => f.write_str("killed by signal"),
            Self::TimedOut { after_ms } => write!(f, "timed out after {after_ms}ms"),
            Self::SpawnFailed => f.write_str("failed to spawn"),
        }
    }
}

/// The outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// The exact argument vector executed, privilege prefix included.
    pub argv: Vec<String>,
    /// Everything the command printed to stdout.
    pub stdout: String,
    /// Everything the command printed to stderr.
    pub stderr: String,
    /// How the command ended.
    pub termination: Termination,
}

impl CommandResult {
    /// Convenience constructor for a command that exited normally.
    pub fn exited(
        argv: Vec<String>,
        code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            argv,
            stdout: stdout.into(),
            stderr: stderr.into(),
            termination: Termination::Exited { code },
        }
    }

    /// True if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited { code: 0 }
    }

    /// The exit code, if the command exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited { code } => Some(code),
            _ => None,
        }
    }
}

impl From<(Vec<String>, std::process::Output)> for CommandResult {
    fn from((argv, output): (Vec<String>, std::process::Output)) -> Self {
        let termination = match output.status.code() {
            Some(code) => Termination::Exited { code },
            None => Termination::Signaled,
        };

        Self {
            argv,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            termination,
        }
    }
}

/// Spawns a fully-built argument vector and waits for it.
///
/// Implementations must not fail: every problem is folded into the [`CommandResult`]. Dropping
/// the returned future must stop the command, as that is how timeouts are enforced.
#[async_trait::async_trait]
pub trait Runner: Send + Sync + 'static {
    async fn run(&self, argv: Vec<String>) -> CommandResult;
}

/// Runs commands as child processes of the current one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, argv: Vec<String>) -> CommandResult {
        let Some((program, args)) = argv.split_first() else {
            return CommandResult {
                argv,
                stdout: String::new(),
                stderr: "empty command provided".to_string(),
                termination: Termination::SpawnFailed,
            };
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandResult {
                    argv,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    termination: Termination::SpawnFailed,
                }
            }
        };

        match child.wait_with_output().await {
            Ok(output) => (argv, output).into(),
            Err(e) => CommandResult {
                argv,
                stdout: String::new(),
                stderr: e.to_string(),
                termination: Termination::SpawnFailed,
            },
        }
    }
}

/// Runs [`Command`]s through a [`Runner`], enforcing the timeout and privilege prefix, and
/// records every invocation to an [`AuditSink`].
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn Runner>,
    audit: Arc<dyn AuditSink>,
    privilege_prefix: Vec<String>,
    timeout: Duration,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("privilege_prefix", &self.privilege_prefix)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    /// Creates an executor running commands through `runner` with the prefix and timeout
    /// from `options`.
    pub fn new(runner: Arc<dyn Runner>, audit: Arc<dyn AuditSink>, options: &EngineOptions) -> Self {
        Self {
            runner,
            audit,
            privilege_prefix: options.privilege_prefix.clone(),
            timeout: options.command_timeout,
        }
    }

    /// Runs `cmd` to completion or until the timeout elapses. Never fails.
    pub async fn run(&self, cmd: Command) -> CommandResult {
        let argv: Vec<String> = if cmd.privileged {
            self.privilege_prefix.iter().cloned().chain(cmd.argv).collect()
        } else {
            cmd.argv
        };

        tracing::debug!(?argv, "running command");

        let result = match tokio::time::timeout(self.timeout, self.runner.run(argv.clone())).await
        {
            Ok(result) => result,
            Err(_) => CommandResult {
                argv,
                stdout: String::new(),
                stderr: format!("command did not finish within {:?}", self.timeout),
                termination: Termination::TimedOut { after_ms: self.timeout.as_millis() as u64 },
            },
        };

        if !result.success() {
            tracing::debug!(
                argv = ?result.argv,
                stderr = ?result.stderr.trim(),
                termination = %result.termination,
                "command returned non-zero status"
            );
        }

        self.audit.record(&AuditRecord::from(&result));

        result
    }
}
