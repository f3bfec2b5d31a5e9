//! Persistent record of every submitted job's lifecycle.
//!
//! A monitor is opened from a URI (`file://`, `sqlite://`, `http://`) and
//! holds an exclusive directory lock on its store until it is closed, so that
//! job-wrapper processes calling back from many hosts never write concurrently.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parsing of monitor URIs
mod uri;
pub use uri::MonitorUri;

/// Cross-process mutex built on `mkdir`
mod lock;
pub use lock::{DirLock, DEFAULT_LOCK_TIMEOUT};

/// Transitive traversal of job dependents
mod cascade;
pub use cascade::descendants;

mod sqlite;
pub use sqlite::SqliteMonitor;

mod text;
pub use text::TextMonitor;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unable to acquire lock on {0} after {1:?}")]
    LockAcquire(PathBuf, Duration),
    #[error("Unknown monitor URI scheme: \"{0}\"")]
    UnknownScheme(String),
    #[error("Unsupported monitor: {0}")]
    Unsupported(String),
    #[error("Monitor has already been closed")]
    Closed,
    #[error("Malformed monitor record: {0}")]
    Malformed(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a job was aborted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AbortCode {
    #[default]
    None = 0,
    /// Some job this one depends on failed or was aborted.
    Ancestor = 1,
    /// The job itself was signalled or cancelled.
    Signalled = 2,
}

impl AbortCode {
    pub fn from_i64(code: i64) -> Self {
        match code {
            1 => AbortCode::Ancestor,
            2 => AbortCode::Signalled,
            _ => AbortCode::None,
        }
    }
}

/// One row of the `runs` table.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub run_code: String,
    pub project: String,
    pub sample: String,
    pub cluster: String,
}

/// Everything recorded about a job at submission time.
#[derive(Debug, Clone, Default)]
pub struct JobSubmission {
    pub job_id: String,
    pub run_code: String,
    pub name: String,
    pub command: String,
    /// Job ids of the job's parents.
    pub deps: Vec<String>,
    /// Resource options the job was actually submitted with.
    pub resources: Vec<(String, String)>,
    /// The rendered submission script.
    pub script: String,
}

/// A job as read back from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: String,
    pub run_code: String,
    pub name: String,
    pub command: String,
    pub exec_host: Option<String>,
    pub return_code: Option<i64>,
    pub submit_time: Option<i64>,
    pub start_time: Option<i64>,
    pub stop_time: Option<i64>,
    pub abort_time: Option<i64>,
    pub abort_code: AbortCode,
    pub aborted_by: Option<String>,
    pub deps: Vec<String>,
    pub resources: Vec<(String, String)>,
    pub script: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Jobs newly marked as aborted by a cascade, in visit order.
/// Jobs that were already aborted keep their original mark and are not listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub aborted: Vec<String>,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.aborted.is_empty()
    }
}

pub trait Monitor {
    fn start_run(&mut self, run: &RunInfo) -> Result<(), Error>;

    /// Record a submitted job along with its dependency and resource rows.
    fn submit_job(&mut self, job: &JobSubmission) -> Result<(), Error>;

    fn start(&mut self, job_id: &str, host: Option<&str>) -> Result<(), Error>;

    /// Record the end of a job. A non-zero `return_code` cascades like [`Monitor::failed`].
    /// Unreadable capture files are logged and otherwise ignored.
    fn stop(
        &mut self,
        job_id: &str,
        return_code: i64,
        stdout: Option<&Path>,
        stderr: Option<&Path>,
    ) -> Result<CascadeReport, Error>;

    /// Mark `job_id` aborted by `reason` with `code`, and every job downstream
    /// of it as aborted by its ancestor.
    fn abort(&mut self, job_id: &str, reason: &str, code: AbortCode)
        -> Result<CascadeReport, Error>;

    /// Mark every job downstream of `job_id` as aborted by its ancestor.
    fn failed(&mut self, job_id: &str) -> Result<CascadeReport, Error>;

    fn job(&mut self, job_id: &str) -> Result<Option<JobRecord>, Error>;

    /// Direct dependents of `job_id`.
    fn children(&mut self, job_id: &str) -> Result<Vec<String>, Error>;

    /// Flush and release the store lock. Further calls are errors.
    fn close(&mut self) -> Result<(), Error>;
}

/// Open the monitor named by `uri`, waiting up to [`DEFAULT_LOCK_TIMEOUT`] for its lock.
pub fn open(uri: &str) -> Result<Box<dyn Monitor>, Error> {
    open_with_timeout(uri, DEFAULT_LOCK_TIMEOUT)
}

pub fn open_with_timeout(uri: &str, timeout: Duration) -> Result<Box<dyn Monitor>, Error> {
    match MonitorUri::parse(uri)? {
        MonitorUri::File(path) => Ok(Box::new(TextMonitor::open(path, timeout)?)),
        MonitorUri::Sqlite(path) => Ok(Box::new(SqliteMonitor::open(path, timeout)?)),
        MonitorUri::Http(url) => Err(Error::Unsupported(format!("http monitor at {url}"))),
    }
}

/// Collapse carriage-return progress output so each line keeps only its final state.
pub fn collapse_progress(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let last = line.rsplit('\r').find(|seg| !seg.is_empty()).unwrap_or("");
        out.push_str(last);
    }
    out
}

/// Read a capture file for storage, logging rather than failing if it's unreadable.
pub(crate) fn read_capture(path: Option<&Path>, collapse: bool) -> Option<String> {
    let path = path?;
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            Some(if collapse {
                collapse_progress(&text)
            } else {
                text.into_owned()
            })
        }
        Err(e) => {
            log::warn!("unable to read job output {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_progress() {
        let text = "start\n10%\r50%\r100%\r\ndone";
        assert_eq!(collapse_progress(text), "start\n100%\ndone");
        assert_eq!(collapse_progress("plain\nlines\n"), "plain\nlines\n");
    }

    #[test]
    fn test_open_unknown_and_unsupported() {
        assert!(matches!(open("ftp://x"), Err(Error::UnknownScheme(_))));
        assert!(matches!(open("http://localhost:8080"), Err(Error::Unsupported(_))));
    }
}
