//! Append-only record of every command the engine runs.
//!
//! The engine only ever writes to an [`AuditSink`]; it never reads records back.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use linkshape_common::unix_micros;
use parking_lot::Mutex;
use serde::Serialize;

use crate::command::{CommandResult, Termination};

/// One executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    /// UNIX timestamp in microseconds, taken when the command finished.
    pub timestamp: u64,
    /// The executed argument vector, privilege prefix included.
    pub argv: Vec<String>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// How the command ended.
    pub termination: Termination,
}

impl From<&CommandResult> for AuditRecord {
    fn from(result: &CommandResult) -> Self {
        Self {
            timestamp: unix_micros(),
            argv: result.argv.clone(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            termination: result.termination,
        }
    }
}

/// Destination for [`AuditRecord`]s. Recording must not fail the command it describes.
///
/// `record` is called synchronously from the executing task, once per command and in
/// execution order.
pub trait AuditSink: Send + Sync + 'static {
    /// Records one executed command.
    fn record(&self, record: &AuditRecord);
}

/// Emits every record as a `tracing` event on the `linkshape::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            target: "linkshape::audit",
            timestamp = record.timestamp,
            argv = ?record.argv,
            termination = %record.termination,
            stdout = %record.stdout.trim(),
            stderr = %record.stderr.trim(),
            "command executed"
        );
    }
}

/// Appends records to a file, one JSON object per line.
///
/// Each record is written and flushed with blocking I/O on the calling task, so a line is on
/// disk before the next command starts. A record is one short line and commands are spawned
/// processes, so this is small next to the command itself.
#[derive(Debug)]
pub struct FileAudit {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAudit {
    /// Opens (or creates) `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self { path, file: Mutex::new(file) })
    }

    /// The file records are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, record: &AuditRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()
    }
}

impl AuditSink for FileAudit {
    fn record(&self, record: &AuditRecord) {
        if let Err(e) = self.write(record) {
            tracing::warn!(?e, path = %self.path.display(), "failed to write audit record");
        }
    }
}

/// Keeps records in memory, in execution order.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    /// A copy of everything recorded so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Number of records kept.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Forgets every record.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}
