//! Driving an interface's queueing hierarchy to a target profile.
//!
//! Both operations are expressed in terms of the target state: the root discipline is always
//! deleted first and the hierarchy rebuilt from scratch, so repeating an operation converges to
//! the same state instead of stacking rules.
//!
//! The delete-then-recreate sequence is not atomic. If the delete succeeds and a later step
//! fails, the interface is left without that part of the impairment (possibly clean), not in
//! its previous state.

use std::{fmt, sync::Arc};

use crate::{
    command::{Command, CommandExecutor, CommandResult, Termination},
    impairment::ImpairmentProfile,
    options::EngineOptions,
    tc::{is_missing_qdisc, Commands},
};

/// A step of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    DeleteRoot,
    AddNetem,
    AddRate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DeleteRoot => "delete-root",
            Self::AddNetem => "add-netem",
            Self::AddRate => "add-rate",
        })
    }
}

/// Why a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Missing privileges, e.g. not root and no working `sudo`.
    PermissionDenied,
    /// The kernel refused because the device or discipline is busy.
    DeviceBusy,
    NonZeroExit(i32),
    Signaled,
    TimedOut,
    /// The program could not be started.
    Spawn,
}

impl FailureReason {
    fn classify(result: &CommandResult) -> Self {
        match result.termination {
            Termination::TimedOut { .. } => Self::TimedOut,
            Termination::SpawnFailed => Self::Spawn,
            Termination::Signaled => Self::Signaled,
            Termination::Exited { code } => {
                let stderr = result.stderr.as_str();
                if stderr.contains("Operation not permitted")
                    || stderr.contains("Permission denied")
                    || stderr.contains("a password is required")
                {
                    Self::PermissionDenied
                } else if stderr.contains("Device or resource busy") {
                    Self::DeviceBusy
                } else {
                    Self::NonZeroExit(code)
                }
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::DeviceBusy => f.write_str("device busy"),
            Self::NonZeroExit(code) => write!(f, "exit code {code}"),
            Self::Signaled => f.write_str("killed by signal"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Spawn => f.write_str("could not start command"),
        }
    }
}

/// One failed step, with the command that failed and what it printed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{step} failed ({reason}): {}", str::trim(.stderr))]
pub struct StepFailure {
    /// The step that failed.
    pub step: Step,
    /// Why it failed.
    pub reason: FailureReason,
    /// The command that was run.
    pub argv: Vec<String>,
    /// What it printed to stderr.
    pub stderr: String,
}

impl StepFailure {
    fn new(step: Step, result: CommandResult) -> Self {
        Self {
            step,
            reason: FailureReason::classify(&result),
            argv: result.argv,
            stderr: result.stderr,
        }
    }
}

fn join_failures(failures: &[StepFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Every step that failed during one apply or remove. All steps are attempted regardless.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reconciling {interface} failed: {}", join_failures(.failures))]
pub struct ApplyError {
    /// The interface being reconciled.
    pub interface: String,
    /// Every failed step, in execution order.
    pub failures: Vec<StepFailure>,
}

impl ApplyError {
    /// True if the failure of `step` is among the reported ones.
    pub fn failed(&self, step: Step) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }

    /// True if any step timed out.
    pub fn timed_out(&self) -> bool {
        self.failures.iter().any(|f| f.reason == FailureReason::TimedOut)
    }
}

/// Issues the commands that move an interface to a target profile.
///
/// Callers must serialize calls per interface; see [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    executor: CommandExecutor,
    options: Arc<EngineOptions>,
}

impl Reconciler {
    /// Creates a reconciler issuing commands through `executor`.
    pub fn new(executor: CommandExecutor, options: Arc<EngineOptions>) -> Self {
        Self { executor, options }
    }

    /// Rebuilds the hierarchy of `dev` to enforce `profile`. A clean profile leaves `dev`
    /// without any root discipline, exactly like [`Self::remove`].
    pub async fn apply(&self, dev: &str, profile: &ImpairmentProfile) -> Result<(), ApplyError> {
        let commands = Commands::new(&self.options);
        let mut failures = Vec::new();

        self.delete_root(dev, &mut failures).await;

        if profile.needs_netem() {
            self.step(Step::AddNetem, commands.add_netem(dev, profile), &mut failures).await;
        }

        if let Some(rate) = profile.rate() {
            self.step(Step::AddRate, commands.add_rate(dev, rate), &mut failures).await;
        }

        Self::finish(dev, failures)
    }

    /// Deletes the root discipline of `dev`. Succeeds if there was none.
    pub async fn remove(&self, dev: &str) -> Result<(), ApplyError> {
        let mut failures = Vec::new();
        self.delete_root(dev, &mut failures).await;

        Self::finish(dev, failures)
    }

    async fn delete_root(&self, dev: &str, failures: &mut Vec<StepFailure>) {
        let result = self.executor.run(Commands::new(&self.options).delete_root(dev)).await;

        let nothing_to_delete = matches!(result.termination, Termination::Exited { .. })
            && is_missing_qdisc(&result.stderr);

        if nothing_to_delete {
            tracing::debug!(dev, "no root qdisc to delete");
        } else if !result.success() {
            failures.push(StepFailure::new(Step::DeleteRoot, result));
        }
    }

    async fn step(&self, step: Step, cmd: Command, failures: &mut Vec<StepFailure>) {
        let result = self.executor.run(cmd).await;
        if !result.success() {
            failures.push(StepFailure::new(step, result));
        }
    }

    fn finish(dev: &str, failures: Vec<StepFailure>) -> Result<(), ApplyError> {
        if failures.is_empty() {
            return Ok(());
        }

        for failure in &failures {
            tracing::warn!(dev, %failure, "reconciliation step failed");
        }

        Err(ApplyError { interface: dev.to_string(), failures })
    }
}
