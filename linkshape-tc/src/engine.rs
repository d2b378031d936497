//! The [`Engine`]: the public entry point tying discovery, inspection, planning and
//! reconciliation together.

use std::sync::Arc;

use linkshape_common::KeyedMutex;
use tracing::Instrument as _;

use crate::{
    audit::{AuditSink, TracingAudit},
    command::{CommandExecutor, ProcessRunner, Runner},
    discovery::{DiscoveryError, InterfaceDiscovery},
    impairment::{ImpairmentProfile, ImpairmentRequest, ImpairmentSnapshot, InterfaceState},
    inspect::{QueryError, StateInspector},
    options::EngineOptions,
    planner::{validate_interface_name, ValidationError},
    reconcile::{ApplyError, Reconciler},
};

/// Errors returned by [`Engine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Interfaces could not be listed.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    /// The interface name or a request field is invalid. No command was issued.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// The current state could not be queried. Nothing was changed.
    #[error("inspection error: {0}")]
    Inspect(#[from] QueryError),
    /// One or more reconciliation steps failed.
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),
}

/// Result type of [`Engine`] operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Entry point for listing, applying and removing impairment.
///
/// Operations on different interfaces run concurrently. Mutations of the same interface are
/// serialized: the lock is taken before reading the state a request is merged into, and held
/// until the last command has run, whatever the outcome. Reads take no lock.
#[derive(Debug)]
pub struct Engine {
    options: Arc<EngineOptions>,
    inspector: StateInspector,
    discovery: InterfaceDiscovery,
    reconciler: Reconciler,
    locks: KeyedMutex<String>,
}

impl Engine {
    /// Creates an engine that spawns real processes and audits to `tracing`.
    pub fn new(options: EngineOptions) -> Self {
        Self::with_runner(options, Arc::new(ProcessRunner), Arc::new(TracingAudit))
    }

    /// Creates an engine running commands through `runner` and auditing to `audit`.
    pub fn with_runner(
        options: EngineOptions,
        runner: Arc<dyn Runner>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let options = Arc::new(options);
        let executor = CommandExecutor::new(runner, audit, &options);

        let inspector = StateInspector::new(executor.clone(), Arc::clone(&options));
        let discovery =
            InterfaceDiscovery::new(executor.clone(), inspector.clone(), Arc::clone(&options));
        let reconciler = Reconciler::new(executor, Arc::clone(&options));

        Self { options, inspector, discovery, reconciler, locks: KeyedMutex::new() }
    }

    /// The options this engine was built with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Lists candidate interfaces with their live impairment state.
    pub async fn list_interfaces(&self) -> Result<Vec<InterfaceState>> {
        Ok(self.discovery.discover().instrument(tracing::debug_span!("list_interfaces")).await?)
    }

    /// Returns what the kernel currently enforces on `dev`.
    pub async fn inspect(&self, dev: &str) -> Result<ImpairmentSnapshot> {
        validate_interface_name(dev)?;
        Ok(self.inspector.inspect(dev).await)
    }

    /// Merges `request` into the current state of `dev` and applies the result.
    ///
    /// An invalid request is rejected before any command runs. If the current state of `dev`
    /// cannot be queried, nothing is changed and [`Error::Inspect`] is returned. On success
    /// returns the profile that was applied.
    pub async fn apply_impairment(
        &self,
        dev: &str,
        request: &ImpairmentRequest,
    ) -> Result<ImpairmentProfile> {
        validate_interface_name(dev)?;
        let request = request.validate()?;

        async {
            let _guard = self.locks.lock(dev.to_string()).await;

            // Unknown state must not be merged into: fail before anything is deleted.
            let current = self.inspector.query(dev).await?;
            let profile = request.merge(&current);
            tracing::debug!(%current, planned = %profile, "planned impairment");

            self.reconciler.apply(dev, &profile).await?;

            match self.inspector.query(dev).await {
                Ok(applied) if applied != profile => tracing::warn!(
                    %applied,
                    expected = %profile,
                    "kernel state differs from applied profile"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(%e, "could not verify applied profile"),
            }

            tracing::info!(%profile, "applied impairment");
            Ok::<_, Error>(profile)
        }
        .instrument(tracing::info_span!("apply_impairment", dev))
        .await
    }

    /// Removes all impairment from `dev`. Removing from a clean interface is a no-op.
    pub async fn remove_impairment(&self, dev: &str) -> Result<()> {
        validate_interface_name(dev)?;

        async {
            let _guard = self.locks.lock(dev.to_string()).await;

            self.reconciler.remove(dev).await?;

            tracing::info!("removed impairment");
            Ok::<_, Error>(())
        }
        .instrument(tracing::info_span!("remove_impairment", dev))
        .await
    }

    /// Returns `true` while an apply or remove on `dev` is in progress.
    pub fn is_busy(&self, dev: &str) -> bool {
        self.locks.is_locked(&dev.to_string())
    }
}
