//! Batch journal sinks: where finished instance summaries go.
//!
//! The controller hands every [`InstanceSummary`] to a [`BatchJournalSink`].
//! Sinks are `Send + Sync` so several batches running on different threads
//! can share one. Shipped sinks:
//! - [`JsonlSink`]: one summary per line, append-only
//! - [`CsvJournalSink`]: one journal CSV per instance
//! - [`MemorySink`]: keeps summaries in memory (tests, embedding)
//! - [`FanoutSink`]: forwards to several sinks in order

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use botlab_core::domain::Precision;
use botlab_core::journal::JournalEntry;

use crate::summary::InstanceSummary;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write journal CSV: {0}")]
    Csv(#[from] csv::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub trait BatchJournalSink<P>: Send + Sync {
    fn write_summary(&self, summary: &InstanceSummary<P>) -> Result<(), SinkError>;
}

// ─── JSONL ───────────────────────────────────────────────────────────

/// Appends one JSON object per summary. Writes are serialized by a mutex so
/// concurrent batches never interleave lines.
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every summary back. Malformed lines are skipped.
    pub fn read_all<P: Precision>(&self) -> Result<Vec<InstanceSummary<P>>, SinkError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(io_err(&self.path))?;
        let mut out = Vec::new();
        for (i, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(&self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InstanceSummary<P>>(&line) {
                Ok(summary) => out.push(summary),
                Err(e) => warn!(path = %self.path.display(), line = i + 1, error = %e, "skipping malformed summary"),
            }
        }
        Ok(out)
    }
}

impl<P: Precision> BatchJournalSink<P> for JsonlSink {
    fn write_summary(&self, summary: &InstanceSummary<P>) -> Result<(), SinkError> {
        let json = serde_json::to_string(summary)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        writeln!(file, "{json}").map_err(io_err(&self.path))?;
        file.flush().map_err(io_err(&self.path))?;
        Ok(())
    }
}

// ─── CSV journals ────────────────────────────────────────────────────

/// Render journal entries as CSV.
///
/// Columns: transaction_id, time, entry_type, flags, flag_names, symbol,
/// position_id, quantity_change, price, realized_profit
pub fn export_journal_csv<P: Precision>(entries: &[JournalEntry<P>]) -> Result<String, SinkError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "transaction_id",
        "time",
        "entry_type",
        "flags",
        "flag_names",
        "symbol",
        "position_id",
        "quantity_change",
        "price",
        "realized_profit",
    ])?;

    let opt = |v: Option<P>| v.map(|v| v.to_string()).unwrap_or_default();
    for e in entries {
        wtr.write_record([
            &e.transaction_id.to_string(),
            &e.time.to_rfc3339(),
            &format!("{:?}", e.entry_type),
            &e.flags.bits().to_string(),
            &e.flags.to_string(),
            &e.symbol,
            &e.position_id.map(|id| id.to_string()).unwrap_or_default(),
            &e.quantity_change.to_string(),
            &opt(e.price),
            &opt(e.realized_profit),
        ])?;
    }

    let data = wtr.into_inner().map_err(|e| SinkError::Io {
        path: PathBuf::from("<memory>"),
        source: e.into_error(),
    })?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// Writes `{dir}/{instance}-{hash}.journal.csv` for every summary. Characters
/// that are unsafe in file names are replaced with `_`; the hash is the first
/// 8 hex digits of the blake3 of the raw name, so names that sanitize alike
/// still get distinct files.
pub struct CsvJournalSink {
    dir: PathBuf,
}

impl CsvJournalSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, instance: &str) -> PathBuf {
        let safe: String = instance
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect();
        let hash = blake3::hash(instance.as_bytes()).to_hex();
        self.dir.join(format!("{safe}-{}.journal.csv", &hash[..8]))
    }
}

impl<P: Precision> BatchJournalSink<P> for CsvJournalSink {
    fn write_summary(&self, summary: &InstanceSummary<P>) -> Result<(), SinkError> {
        let csv = export_journal_csv(&summary.journal)?;
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.path_for(&summary.instance);
        fs::write(&path, csv).map_err(io_err(&path))?;
        debug!(instance = %summary.instance, path = %path.display(), entries = summary.journal.len(), "journal exported");
        Ok(())
    }
}

// ─── In-memory and fan-out ───────────────────────────────────────────

pub struct MemorySink<P> {
    summaries: Mutex<Vec<InstanceSummary<P>>>,
}

impl<P: Precision> MemorySink<P> {
    pub fn new() -> Self {
        Self {
            summaries: Mutex::new(Vec::new()),
        }
    }

    pub fn summaries(&self) -> Vec<InstanceSummary<P>> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<P: Precision> Default for MemorySink<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Precision> BatchJournalSink<P> for MemorySink<P> {
    fn write_summary(&self, summary: &InstanceSummary<P>) -> Result<(), SinkError> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(summary.clone());
        Ok(())
    }
}

/// Forwards each summary to every inner sink; stops at the first error.
pub struct FanoutSink<P> {
    sinks: Vec<Box<dyn BatchJournalSink<P>>>,
}

impl<P: Precision> FanoutSink<P> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl BatchJournalSink<P> + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl<P: Precision> Default for FanoutSink<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Precision> BatchJournalSink<P> for FanoutSink<P> {
    fn write_summary(&self, summary: &InstanceSummary<P>) -> Result<(), SinkError> {
        self.sinks.iter().try_for_each(|s| s.write_summary(summary))
    }
}
