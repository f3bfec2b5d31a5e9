use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use util::now_ts;

use crate::{
    descendants, read_capture, AbortCode, CascadeReport, DirLock, Error, JobRecord, JobSubmission,
    Monitor, RunInfo,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    runcode TEXT PRIMARY KEY,
    project TEXT,
    sample TEXT,
    cluster TEXT
);
CREATE TABLE IF NOT EXISTS jobs (
    jobid TEXT PRIMARY KEY,
    runcode TEXT,
    name TEXT,
    cmd TEXT,
    exechost TEXT,
    retcode INTEGER,
    submit_time INTEGER,
    start_time INTEGER,
    stop_time INTEGER,
    abort_time INTEGER,
    abort_code INTEGER NOT NULL DEFAULT 0,
    aborted_by TEXT
);
CREATE TABLE IF NOT EXISTS job_deps (
    jobid TEXT,
    parentid TEXT
);
CREATE INDEX IF NOT EXISTS job_deps_parent ON job_deps (parentid);
CREATE TABLE IF NOT EXISTS job_resources (
    jobid TEXT,
    key TEXT,
    value TEXT
);
CREATE TABLE IF NOT EXISTS job_output (
    jobid TEXT PRIMARY KEY,
    script TEXT,
    stdout TEXT,
    stderr TEXT
);
";

/// Monitor backed by a SQLite database file.
pub struct SqliteMonitor {
    path: PathBuf,
    conn: Option<Connection>,
    lock: DirLock,
}

impl std::fmt::Debug for SqliteMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMonitor")
            .field("path", &self.path)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl SqliteMonitor {
    /// Lock the database at `path` and open it, creating tables as needed.
    pub fn open(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, Error> {
        let path = path.into();
        let lock = DirLock::acquire(&path, timeout)?;
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        log::debug!("opened sqlite monitor at {}", path.display());
        Ok(Self {
            path,
            conn: Some(conn),
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, Error> {
        self.conn.as_ref().ok_or(Error::Closed)
    }

    fn child_ids(conn: &Connection, job_id: &str) -> Result<Vec<String>, Error> {
        let mut stmt = conn.prepare_cached("SELECT jobid FROM job_deps WHERE parentid = ?1")?;
        let rows = stmt.query_map([job_id], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    /// Set an abort mark on a job that doesn't have one yet.
    fn mark(conn: &Connection, job_id: &str, code: AbortCode, by: &str) -> Result<bool, Error> {
        let changed = conn.execute(
            "UPDATE jobs SET abort_code = ?1, aborted_by = ?2, abort_time = ?3 \
             WHERE jobid = ?4 AND abort_code = 0",
            params![code as i64, by, now_ts(), job_id],
        )?;
        Ok(changed > 0)
    }

    fn kill_descendants(&self, job_id: &str, report: &mut CascadeReport) -> Result<(), Error> {
        let conn = self.conn()?;
        for child in descendants(job_id, |j| Self::child_ids(conn, j))? {
            if Self::mark(conn, &child, AbortCode::Ancestor, job_id)? {
                report.aborted.push(child);
            }
        }
        Ok(())
    }
}

impl Monitor for SqliteMonitor {
    fn start_run(&mut self, run: &RunInfo) -> Result<(), Error> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO runs (runcode, project, sample, cluster) VALUES (?1, ?2, ?3, ?4)",
            params![run.run_code, run.project, run.sample, run.cluster],
        )?;
        Ok(())
    }

    fn submit_job(&mut self, job: &JobSubmission) -> Result<(), Error> {
        let conn = self.conn.as_mut().ok_or(Error::Closed)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (jobid, runcode, name, cmd, submit_time, abort_code) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![job.job_id, job.run_code, job.name, job.command, now_ts()],
        )?;
        for parent in &job.deps {
            tx.execute(
                "INSERT INTO job_deps (jobid, parentid) VALUES (?1, ?2)",
                params![job.job_id, parent],
            )?;
        }
        for (k, v) in &job.resources {
            tx.execute(
                "INSERT INTO job_resources (jobid, key, value) VALUES (?1, ?2, ?3)",
                params![job.job_id, k, v],
            )?;
        }
        tx.execute(
            "INSERT INTO job_output (jobid, script) VALUES (?1, ?2)",
            params![job.job_id, job.script],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn start(&mut self, job_id: &str, host: Option<&str>) -> Result<(), Error> {
        self.conn()?.execute(
            "UPDATE jobs SET exechost = ?1, start_time = ?2 WHERE jobid = ?3",
            params![host, now_ts(), job_id],
        )?;
        Ok(())
    }

    fn stop(
        &mut self,
        job_id: &str,
        return_code: i64,
        stdout: Option<&Path>,
        stderr: Option<&Path>,
    ) -> Result<CascadeReport, Error> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET retcode = ?1, stop_time = ?2 WHERE jobid = ?3",
            params![return_code, now_ts(), job_id],
        )?;

        if let Some(text) = read_capture(stdout, false) {
            conn.execute(
                "UPDATE job_output SET stdout = ?1 WHERE jobid = ?2",
                params![text, job_id],
            )?;
        }
        if let Some(text) = read_capture(stderr, true) {
            conn.execute(
                "UPDATE job_output SET stderr = ?1 WHERE jobid = ?2",
                params![text, job_id],
            )?;
        }

        let mut report = CascadeReport::default();
        if return_code != 0 {
            self.kill_descendants(job_id, &mut report)?;
        }
        Ok(report)
    }

    fn abort(
        &mut self,
        job_id: &str,
        reason: &str,
        code: AbortCode,
    ) -> Result<CascadeReport, Error> {
        let mut report = CascadeReport::default();
        if Self::mark(self.conn()?, job_id, code, reason)? {
            report.aborted.push(job_id.to_owned());
        }
        self.kill_descendants(job_id, &mut report)?;
        Ok(report)
    }

    fn failed(&mut self, job_id: &str) -> Result<CascadeReport, Error> {
        let mut report = CascadeReport::default();
        self.kill_descendants(job_id, &mut report)?;
        Ok(report)
    }

    fn job(&mut self, job_id: &str) -> Result<Option<JobRecord>, Error> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT jobid, runcode, name, cmd, exechost, retcode, submit_time, start_time, \
                 stop_time, abort_time, abort_code, aborted_by FROM jobs WHERE jobid = ?1",
                [job_id],
                |row| {
                    Ok(JobRecord {
                        job_id: row.get(0)?,
                        run_code: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        command: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        exec_host: row.get(4)?,
                        return_code: row.get(5)?,
                        submit_time: row.get(6)?,
                        start_time: row.get(7)?,
                        stop_time: row.get(8)?,
                        abort_time: row.get(9)?,
                        abort_code: AbortCode::from_i64(row.get(10)?),
                        aborted_by: row.get(11)?,
                        ..Default::default()
                    })
                },
            )
            .optional()?;

        let mut record = match record {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut stmt = conn.prepare_cached("SELECT parentid FROM job_deps WHERE jobid = ?1")?;
        for parent in stmt.query_map([job_id], |row| row.get::<_, String>(0))? {
            record.deps.push(parent?);
        }

        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM job_resources WHERE jobid = ?1")?;
        for kv in stmt.query_map([job_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })? {
            record.resources.push(kv?);
        }

        if let Some((script, stdout, stderr)) = conn
            .query_row(
                "SELECT script, stdout, stderr FROM job_output WHERE jobid = ?1",
                [job_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?
        {
            record.script = script;
            record.stdout = stdout;
            record.stderr = stderr;
        }

        Ok(Some(record))
    }

    fn children(&mut self, job_id: &str) -> Result<Vec<String>, Error> {
        Self::child_ids(self.conn()?, job_id)
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
            self.lock.release()?;
            log::debug!("closed sqlite monitor at {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn submission(id: &str, deps: &[&str]) -> JobSubmission {
        JobSubmission {
            job_id: id.to_owned(),
            run_code: "run1".to_owned(),
            name: format!("P.{id}"),
            command: format!("echo {id}"),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            resources: vec![("mem".to_owned(), "2G".to_owned())],
            script: format!("#!/bin/bash\necho {id}\n"),
        }
    }

    fn diamond(mon: &mut SqliteMonitor) -> Result<()> {
        mon.start_run(&RunInfo {
            run_code: "run1".into(),
            project: "P".into(),
            ..Default::default()
        })?;
        mon.submit_job(&submission("A", &[]))?;
        mon.submit_job(&submission("B", &["A"]))?;
        mon.submit_job(&submission("C", &["A"]))?;
        mon.submit_job(&submission("D", &["B", "C"]))?;
        Ok(())
    }

    #[test]
    fn test_submit_and_read_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mon = SqliteMonitor::open(dir.path().join("jobs.db"), Duration::from_secs(1))?;
        diamond(&mut mon)?;

        mon.start("D", Some("node7"))?;
        let rec = mon.job("D")?.expect("job D");
        assert_eq!(rec.deps, vec!["B", "C"]);
        assert_eq!(rec.resources, vec![("mem".to_owned(), "2G".to_owned())]);
        assert_eq!(rec.exec_host.as_deref(), Some("node7"));
        assert_eq!(rec.script.as_deref(), Some("#!/bin/bash\necho D\n"));
        assert!(rec.submit_time.is_some());
        assert_eq!(rec.abort_code, AbortCode::None);

        assert_eq!(mon.children("A")?, vec!["B", "C"]);
        assert!(mon.job("nope")?.is_none());
        mon.close()?;
        Ok(())
    }

    #[test]
    fn test_abort_diamond() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mon = SqliteMonitor::open(dir.path().join("jobs.db"), Duration::from_secs(1))?;
        diamond(&mut mon)?;

        let report = mon.abort("A", "user", AbortCode::Signalled)?;
        let mut aborted = report.aborted.clone();
        aborted.sort();
        assert_eq!(aborted, vec!["A", "B", "C", "D"]);

        let a = mon.job("A")?.unwrap();
        assert_eq!(a.abort_code, AbortCode::Signalled);
        assert_eq!(a.aborted_by.as_deref(), Some("user"));
        let d = mon.job("D")?.unwrap();
        assert_eq!(d.abort_code, AbortCode::Ancestor);
        assert_eq!(d.aborted_by.as_deref(), Some("A"));

        // first abort wins:
        let again = mon.abort("B", "later", AbortCode::Signalled)?;
        assert!(again.is_empty());
        assert_eq!(mon.job("B")?.unwrap().aborted_by.as_deref(), Some("A"));
        mon.close()?;
        Ok(())
    }

    #[test]
    fn test_failed_stop_cascades_and_captures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("B.out");
        let err = dir.path().join("B.err");
        std::fs::write(&out, "hello\n")?;
        std::fs::write(&err, "1%\r99%\r\nboom\n")?;

        let mut mon = SqliteMonitor::open(dir.path().join("jobs.db"), Duration::from_secs(1))?;
        diamond(&mut mon)?;

        let report = mon.stop("A", 0, None, None)?;
        assert!(report.is_empty());

        let missing = dir.path().join("nothing.txt");
        let report = mon.stop("B", 1, Some(&out), Some(&err))?;
        assert_eq!(report.aborted, vec!["D"]);

        let b = mon.job("B")?.unwrap();
        assert_eq!(b.return_code, Some(1));
        assert_eq!(b.abort_code, AbortCode::None);
        assert_eq!(b.stdout.as_deref(), Some("hello\n"));
        assert_eq!(b.stderr.as_deref(), Some("99%\nboom\n"));

        // unreadable captures don't fail the stop:
        mon.stop("C", 0, Some(&missing), None)?;
        assert!(mon.job("C")?.unwrap().stdout.is_none());
        mon.close()?;
        Ok(())
    }

    #[test]
    fn test_second_open_waits_for_close() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("jobs.db");
        let mut first = SqliteMonitor::open(&path, Duration::from_secs(1))?;

        let res = SqliteMonitor::open(&path, Duration::from_millis(200));
        assert!(matches!(res, Err(Error::LockAcquire(..))));

        first.close()?;
        let mut second = SqliteMonitor::open(&path, Duration::from_millis(200))?;
        second.close()?;
        assert!(matches!(second.children("A"), Err(Error::Closed)));
        Ok(())
    }
}
