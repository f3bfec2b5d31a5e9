use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;

use monitor::{AbortCode, CascadeReport, JobRecord, Monitor};

use crate::args::{Args, Cmd};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No job {0} in monitor")]
    UnknownJob(String),
}

/// This struct actually runs the `qtask-mon` command-line app.
pub struct App {
    args: Args,
}

impl App {
    /// Create a new `App`.
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    /// Open the monitor, apply the requested command and close it again.
    pub fn run(self) -> Result<()> {
        let timeout = Duration::from_secs(self.args.timeout);
        let mut mon = monitor::open_with_timeout(&self.args.uri, timeout)
            .with_context(|| format!("while opening monitor \"{}\"", self.args.uri))?;

        let result = apply(mon.as_mut(), &self.args.cmd);
        mon.close().context("while closing monitor")?;

        if let Some(text) = result? {
            print!("{text}");
        }
        Ok(())
    }
}

/// Apply `cmd` to `mon`, returning any text to print.
fn apply(mon: &mut dyn Monitor, cmd: &Cmd) -> Result<Option<String>> {
    match cmd {
        Cmd::Start { job, host } => {
            mon.start(job, host.as_deref())?;
        }
        Cmd::Stop {
            job,
            return_code,
            stdout,
            stderr,
        } => {
            let report = mon.stop(job, *return_code, stdout.as_deref(), stderr.as_deref())?;
            log_cascade(job, &report);
        }
        Cmd::Abort { job, by } => {
            let reason = by.as_deref().unwrap_or(job);
            let report = mon.abort(job, reason, AbortCode::Signalled)?;
            log_cascade(job, &report);
        }
        Cmd::Signal { job, signal } => {
            let report = mon.abort(job, signal, AbortCode::Signalled)?;
            log_cascade(job, &report);
        }
        Cmd::Killdeps { job } => {
            let report = mon.failed(job)?;
            log_cascade(job, &report);
        }
        Cmd::View { job } => {
            let record = mon.job(job)?.ok_or_else(|| Error::UnknownJob(job.clone()))?;
            return Ok(Some(render(&record)));
        }
    }
    Ok(None)
}

fn log_cascade(job: &str, report: &CascadeReport) {
    if !report.is_empty() {
        log::info!(
            "job {job}: marked {} job(s) aborted: {}",
            report.aborted.len(),
            report.aborted.join(",")
        );
    }
}

/// Human-readable dump of a job record.
fn render(job: &JobRecord) -> String {
    fn field(out: &mut String, key: &str, val: impl std::fmt::Display) {
        let _ = writeln!(out, "{:<12} {val}", format!("{key}:").bold());
    }
    fn opt<T: ToString>(val: &Option<T>) -> String {
        val.as_ref().map(T::to_string).unwrap_or_default()
    }

    let mut out = String::with_capacity(1024);
    field(&mut out, "job", &job.job_id);
    field(&mut out, "run", &job.run_code);
    field(&mut out, "name", &job.name);
    field(&mut out, "host", opt(&job.exec_host));
    field(&mut out, "deps", job.deps.join(","));
    for (k, v) in &job.resources {
        field(&mut out, k, v);
    }
    field(&mut out, "submitted", opt(&job.submit_time));
    field(&mut out, "started", opt(&job.start_time));
    field(&mut out, "stopped", opt(&job.stop_time));
    field(&mut out, "return code", opt(&job.return_code));
    if job.abort_code != AbortCode::None {
        let code = format!("{:?}", job.abort_code).red();
        field(&mut out, "aborted", format!("{code} by {}", opt(&job.aborted_by)));
    }
    field(&mut out, "command", job.command.trim_end());

    for (label, text) in [
        ("script", &job.script),
        ("stdout", &job.stdout),
        ("stderr", &job.stderr),
    ] {
        if let Some(text) = text {
            let _ = writeln!(out, "{}", format!("-[{label}]---------------").magenta());
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}
