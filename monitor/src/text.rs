use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use util::{now_ts, HashMap};

use crate::{
    descendants, read_capture, AbortCode, CascadeReport, DirLock, Error, JobRecord, JobSubmission,
    Monitor, RunInfo,
};

// event names, first field after the timestamp:
const RUN: &str = "run";
const SUBMIT: &str = "submit";
const DEP: &str = "dep";
const RESOURCE: &str = "resource";
const SCRIPT: &str = "script";
const START: &str = "start";
const STOP: &str = "stop";
const STDOUT: &str = "stdout";
const STDERR: &str = "stderr";
const ABORT: &str = "abort";

/// Monitor backed by an append-only, tab-separated event log.
///
/// Each line is `<timestamp>\t<event>\t<job or run>\t<fields...>`, with tabs,
/// newlines and backslashes escaped. Queries replay the whole log.
#[derive(Debug)]
pub struct TextMonitor {
    path: PathBuf,
    file: Option<File>,
    lock: DirLock,
}

/// State rebuilt from the log.
#[derive(Default)]
struct Replay {
    jobs: HashMap<String, JobRecord>,
    children: HashMap<String, Vec<String>>,
}

impl TextMonitor {
    pub fn open(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, Error> {
        let path = path.into();
        let lock = DirLock::acquire(&path, timeout)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        log::debug!("opened text monitor at {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, fields: &[&str]) -> Result<(), Error> {
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let mut line = now_ts().to_string();
        for f in fields {
            line.push('\t');
            line.push_str(&escape(f));
        }
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn replay(&self) -> Result<Replay, Error> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }
        let mut state = Replay::default();
        let reader = BufReader::new(File::open(&self.path)?);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<String> = line.split('\t').map(unescape).collect();
            if fields.len() < 3 {
                return Err(Error::Malformed(format!("line {}: {line}", lineno + 1)));
            }
            state.apply(&fields).map_err(|msg| {
                Error::Malformed(format!("line {}: {msg}", lineno + 1))
            })?;
        }
        Ok(state)
    }

    fn kill_descendants(
        &mut self,
        state: &Replay,
        job_id: &str,
        report: &mut CascadeReport,
    ) -> Result<(), Error> {
        let found = descendants(job_id, |j| {
            Ok::<_, Error>(state.children.get(j).cloned().unwrap_or_default())
        })?;
        for child in found {
            if state.is_live(&child) {
                self.append(&[ABORT, &child, "1", job_id])?;
                report.aborted.push(child);
            }
        }
        Ok(())
    }
}

impl Replay {
    fn apply(&mut self, fields: &[String]) -> Result<(), String> {
        let ts: i64 = fields[0].parse().map_err(|_| format!("bad timestamp {}", fields[0]))?;
        let event = fields[1].as_str();
        let id = fields[2].clone();
        let arg = |i: usize| fields.get(i).cloned().unwrap_or_default();

        if event == RUN {
            return Ok(());
        }
        if event == SUBMIT {
            let rec = JobRecord {
                job_id: id.clone(),
                run_code: arg(3),
                name: arg(4),
                command: arg(5),
                submit_time: Some(ts),
                ..Default::default()
            };
            self.jobs.insert(id, rec);
            return Ok(());
        }

        if event == DEP {
            let parent = arg(3);
            self.children.entry(parent.clone()).or_default().push(id.clone());
            if let Some(rec) = self.jobs.get_mut(&id) {
                rec.deps.push(parent);
            }
            return Ok(());
        }

        let Some(rec) = self.jobs.get_mut(&id) else {
            // events for jobs submitted elsewhere are ignored
            return Ok(());
        };
        match event {
            RESOURCE => rec.resources.push((arg(3), arg(4))),
            SCRIPT => rec.script = Some(arg(3)),
            START => {
                rec.start_time = Some(ts);
                rec.exec_host = fields.get(3).cloned().filter(|h| !h.is_empty());
            }
            STOP => {
                rec.stop_time = Some(ts);
                rec.return_code = Some(arg(3).parse().map_err(|_| "bad return code")?);
            }
            STDOUT => rec.stdout = Some(arg(3)),
            STDERR => rec.stderr = Some(arg(3)),
            ABORT => {
                if rec.abort_code == AbortCode::None {
                    let code: i64 = arg(3).parse().map_err(|_| "bad abort code")?;
                    rec.abort_code = AbortCode::from_i64(code);
                    rec.aborted_by = Some(arg(4));
                    rec.abort_time = Some(ts);
                }
            }
            other => return Err(format!("unknown event \"{other}\"")),
        }
        Ok(())
    }

    /// True if `job_id` is known and not yet aborted.
    fn is_live(&self, job_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .is_some_and(|r| r.abort_code == AbortCode::None)
    }
}

impl Monitor for TextMonitor {
    fn start_run(&mut self, run: &RunInfo) -> Result<(), Error> {
        self.append(&[RUN, &run.run_code, &run.project, &run.sample, &run.cluster])
    }

    fn submit_job(&mut self, job: &JobSubmission) -> Result<(), Error> {
        self.append(&[SUBMIT, &job.job_id, &job.run_code, &job.name, &job.command])?;
        for parent in &job.deps {
            self.append(&[DEP, &job.job_id, parent])?;
        }
        for (k, v) in &job.resources {
            self.append(&[RESOURCE, &job.job_id, k, v])?;
        }
        self.append(&[SCRIPT, &job.job_id, &job.script])
    }

    fn start(&mut self, job_id: &str, host: Option<&str>) -> Result<(), Error> {
        self.append(&[START, job_id, host.unwrap_or("")])
    }

    fn stop(
        &mut self,
        job_id: &str,
        return_code: i64,
        stdout: Option<&Path>,
        stderr: Option<&Path>,
    ) -> Result<CascadeReport, Error> {
        self.append(&[STOP, job_id, &return_code.to_string()])?;
        if let Some(text) = read_capture(stdout, false) {
            self.append(&[STDOUT, job_id, &text])?;
        }
        if let Some(text) = read_capture(stderr, true) {
            self.append(&[STDERR, job_id, &text])?;
        }

        let mut report = CascadeReport::default();
        if return_code != 0 {
            let state = self.replay()?;
            self.kill_descendants(&state, job_id, &mut report)?;
        }
        Ok(report)
    }

    fn abort(
        &mut self,
        job_id: &str,
        reason: &str,
        code: AbortCode,
    ) -> Result<CascadeReport, Error> {
        let state = self.replay()?;
        let mut report = CascadeReport::default();
        if state.is_live(job_id) {
            self.append(&[ABORT, job_id, &(code as i64).to_string(), reason])?;
            report.aborted.push(job_id.to_owned());
        }
        self.kill_descendants(&state, job_id, &mut report)?;
        Ok(report)
    }

    fn failed(&mut self, job_id: &str) -> Result<CascadeReport, Error> {
        let state = self.replay()?;
        let mut report = CascadeReport::default();
        self.kill_descendants(&state, job_id, &mut report)?;
        Ok(report)
    }

    fn job(&mut self, job_id: &str) -> Result<Option<JobRecord>, Error> {
        Ok(self.replay()?.jobs.remove(job_id))
    }

    fn children(&mut self, job_id: &str) -> Result<Vec<String>, Error> {
        Ok(self.replay()?.children.remove(job_id).unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            self.lock.release()?;
            log::debug!("closed text monitor at {}", self.path.display());
        }
        Ok(())
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn submit(mon: &mut TextMonitor, id: &str, deps: &[&str]) -> Result<()> {
        mon.submit_job(&JobSubmission {
            job_id: id.to_owned(),
            run_code: "r".to_owned(),
            name: id.to_owned(),
            command: format!("printf '%s\\t%s\\n' {id} done"),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            resources: vec![],
            script: "#!/bin/sh\n".to_owned(),
        })?;
        Ok(())
    }

    #[test]
    fn test_escape_survives_replay() {
        let s = "a\tb\nc\\d";
        assert_eq!(unescape(&escape(s)), s);
    }

    #[test]
    fn test_lifecycle_and_cascade() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("jobs.log");
        let mut mon = TextMonitor::open(&path, Duration::from_secs(1))?;
        mon.start_run(&RunInfo::default())?;
        submit(&mut mon, "1", &[])?;
        submit(&mut mon, "2", &["1"])?;
        submit(&mut mon, "3", &["1"])?;
        submit(&mut mon, "4", &["2", "3"])?;

        mon.start("1", Some("node1"))?;
        let report = mon.stop("1", 137, None, None)?;
        let mut aborted = report.aborted;
        aborted.sort();
        assert_eq!(aborted, vec!["2", "3", "4"]);

        let rec = mon.job("4")?.unwrap();
        assert_eq!(rec.abort_code, AbortCode::Ancestor);
        assert_eq!(rec.aborted_by.as_deref(), Some("1"));
        assert_eq!(rec.deps, vec!["2", "3"]);
        assert_eq!(rec.command, "printf '%s\\t%s\\n' 4 done");

        let rec = mon.job("1")?.unwrap();
        assert_eq!(rec.return_code, Some(137));
        assert_eq!(rec.exec_host.as_deref(), Some("node1"));
        assert_eq!(rec.abort_code, AbortCode::None);

        assert!(mon.abort("3", "user", AbortCode::Signalled)?.is_empty());
        assert_eq!(mon.children("1")?, vec!["2", "3"]);
        mon.close()?;

        // reopening sees the same history:
        let mut mon = TextMonitor::open(&path, Duration::from_secs(1))?;
        assert_eq!(mon.job("2")?.unwrap().abort_code, AbortCode::Ancestor);
        mon.close()?;
        Ok(())
    }
}
