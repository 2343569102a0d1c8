//! The submission ledger: a durable, human-readable table of every job
//! this installation has submitted.
//!
//! The file form is tab separated with a header row:
//!
//! ```text
//! DATE    SERVER    RUN_ID    WORKFLOW_NAME    STATUS
//! ```
//!
//! Writers serialise on an advisory lock next to the ledger and replace
//! the file through a rename, so a reader sees either the old or the new
//! table and never a half-written one. Readers take no lock.

use crate::error::LedgerError;
use crate::job::{JobId, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use nix::fcntl::{flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const HEADER: [&str; 5] = ["DATE", "SERVER", "RUN_ID", "WORKFLOW_NAME", "STATUS"];

pub trait LedgerStore: Send + Sync {
    fn append(&self, record: JobRecord) -> Result<(), LedgerError>;

    /// Overwrites the status of every row for `job_id`.
    ///
    /// Unknown ids are ignored and terminal statuses are never replaced.
    /// Returns whether any row changed.
    fn update_status(&self, job_id: &JobId, status: JobStatus) -> Result<bool, LedgerError>;

    /// All records in submission order.
    fn list(&self) -> Result<Vec<JobRecord>, LedgerError>;

    /// The `n`-th record from the end, `n = 1` being the latest submission.
    fn most_recent(&self, n: usize) -> Result<JobRecord, LedgerError> {
        let records = self.list()?;
        nth_from_end(&records, n).cloned().ok_or(LedgerError::NoSuchRecord)
    }

    fn find_by_prefix_or_exact(&self, id: &str) -> Result<JobRecord, LedgerError> {
        let records = self.list()?;
        find_record(&records, id).cloned()
    }

    fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.list()?.len())
    }
}

fn nth_from_end(records: &[JobRecord], n: usize) -> Option<&JobRecord> {
    if n == 0 || n > records.len() {
        return None;
    }
    records.get(records.len() - n)
}

/// Exact matches win, the latest one being authoritative. Otherwise a
/// prefix is accepted only when it names a single job id.
fn find_record<'a>(records: &'a [JobRecord], id: &str) -> Result<&'a JobRecord, LedgerError> {
    if id.is_empty() {
        return Err(LedgerError::NoSuchRecord);
    }
    if let Some(rec) = records.iter().rev().find(|r| r.job_id.0 == id) {
        return Ok(rec);
    }

    let mut matched: Option<&JobRecord> = None;
    for rec in records.iter().rev().filter(|r| r.job_id.0.starts_with(id)) {
        match matched {
            None => matched = Some(rec),
            Some(m) if m.job_id == rec.job_id => {}
            Some(_) => return Err(LedgerError::AmbiguousPrefix(id.to_string())),
        }
    }
    matched.ok_or(LedgerError::NoSuchRecord)
}

fn apply_status(records: &mut [JobRecord], job_id: &JobId, status: JobStatus) -> bool {
    let mut changed = false;
    for rec in records.iter_mut().filter(|r| &r.job_id == job_id) {
        if rec.last_status.is_terminal() || rec.last_status == status {
            continue;
        }
        rec.last_status = status;
        changed = true;
    }
    changed
}

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    #[serde(rename = "DATE")]
    date: String,
    #[serde(rename = "SERVER")]
    server: String,
    #[serde(rename = "RUN_ID")]
    run_id: String,
    #[serde(rename = "WORKFLOW_NAME")]
    workflow_name: String,
    #[serde(rename = "STATUS")]
    status: String,
}

impl From<&JobRecord> for Row {
    fn from(rec: &JobRecord) -> Self {
        Row {
            date: rec.submitted_at.to_rfc3339(),
            server: rec.server_url.clone(),
            run_id: rec.job_id.0.clone(),
            workflow_name: rec.workflow_name.clone(),
            status: rec.last_status.to_string(),
        }
    }
}

/// Ledger kept in a tab-separated file.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistence(&self, source: io::Error) -> LedgerError {
        LedgerError::Persistence {
            path: self.path.clone(),
            source,
        }
    }

    fn format(&self, reason: impl ToString) -> LedgerError {
        LedgerError::Format {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn read_records(&self) -> Result<Vec<JobRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&self.path)
            .map_err(|e| self.format(e))?;

        let mut records = Vec::new();
        for row in reader.deserialize::<Row>() {
            let row = row.map_err(|e| self.format(e))?;
            let submitted_at = DateTime::parse_from_rfc3339(&row.date)
                .map_err(|e| self.format(format!("bad date {:?}: {}", row.date, e)))?
                .with_timezone(&Utc);
            records.push(JobRecord {
                submitted_at,
                server_url: row.server,
                job_id: JobId(row.run_id),
                workflow_name: row.workflow_name,
                last_status: JobStatus::from_server(&row.status),
            });
        }
        Ok(records)
    }

    fn write_records(&self, records: &[JobRecord]) -> Result<(), LedgerError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .has_headers(false)
                .from_path(&tmp)
                .map_err(|e| self.persistence(e.into()))?;
            writer
                .write_record(HEADER)
                .map_err(|e| self.persistence(e.into()))?;
            for rec in records {
                writer
                    .serialize(Row::from(rec))
                    .map_err(|e| self.persistence(e.into()))?;
            }
            let file = writer
                .into_inner()
                .map_err(|e| self.persistence(e.into_error()))?;
            file.sync_all().map_err(|e| self.persistence(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.persistence(e))
    }

    /// Runs a read-modify-write cycle under the ledger's exclusive lock.
    fn modify<T>(&self, f: impl FnOnce(&mut Vec<JobRecord>) -> (T, bool)) -> Result<T, LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.persistence(e))?;
        }
        let lock_path = self.path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| self.persistence(e))?;
        flock(lock.as_raw_fd(), FlockArg::LockExclusive).map_err(|e| self.persistence(e.into()))?;

        let mut records = self.read_records()?;
        let (out, dirty) = f(&mut records);
        if dirty {
            self.write_records(&records)?;
        }
        // Dropping the handle releases the lock.
        drop(lock);
        Ok(out)
    }
}

impl LedgerStore for FileLedger {
    fn append(&self, record: JobRecord) -> Result<(), LedgerError> {
        log::debug!("Recording job {} in {}", record.job_id, self.path.display());
        self.modify(|records| {
            records.push(record);
            ((), true)
        })
    }

    fn update_status(&self, job_id: &JobId, status: JobStatus) -> Result<bool, LedgerError> {
        self.modify(|records| {
            let changed = apply_status(records, job_id, status);
            (changed, changed)
        })
    }

    fn list(&self) -> Result<Vec<JobRecord>, LedgerError> {
        self.read_records()
    }
}

/// Ledger held in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<JobRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<JobRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JobRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&self, record: JobRecord) -> Result<(), LedgerError> {
        self.lock().push(record);
        Ok(())
    }

    fn update_status(&self, job_id: &JobId, status: JobStatus) -> Result<bool, LedgerError> {
        Ok(apply_status(&mut self.lock(), job_id, status))
    }

    fn list(&self) -> Result<Vec<JobRecord>, LedgerError> {
        Ok(self.lock().clone())
    }
}
