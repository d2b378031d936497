#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Synthetic network impairment for Linux interfaces.
//!
//! Adds latency, packet loss and a bandwidth cap to an interface by driving `tc`, and takes
//! them away again. The kernel is the only place state is kept: every read parses live `tc`
//! output, and every write rebuilds the interface's queueing hierarchy from scratch.
//!
//! ## Flow
//!
//! ```text
//! InterfaceDiscovery ──► StateInspector ──► planner::plan ──► Reconciler ──► CommandExecutor
//! ```
//!
//! [`Engine`] ties these together and serializes mutations per interface.

pub mod audit;
pub mod command;
pub mod discovery;
mod engine;
pub mod impairment;
pub mod inspect;
pub mod options;
pub mod planner;
pub mod reconcile;
pub mod tc;

pub use audit::{AuditRecord, AuditSink, FileAudit, MemoryAudit, TracingAudit};
pub use command::{Command, CommandExecutor, CommandResult, ProcessRunner, Runner, Termination};
pub use discovery::DiscoveryError;
pub use engine::{Engine, Error, Result};
pub use impairment::{
    Delay, ImpairmentProfile, ImpairmentRequest, ImpairmentSnapshot, InterfaceState, LinkSpeed,
    LossPercent, Rate, RateUnit,
};
pub use inspect::QueryError;
pub use options::EngineOptions;
pub use planner::{plan, ValidationError};
pub use reconcile::{ApplyError, FailureReason, Step, StepFailure};
