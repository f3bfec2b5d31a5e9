use anyhow::{Context, Result};

use graph::TaskOptions;

use crate::config::{self, Config};

/// Running external scheduler commands
mod exec;
/// Building job scripts
mod script;
/// Walltime parsing and scaling
mod walltime;
pub use walltime::scale_walltime;

mod bash;
mod pbs;
mod sge;
pub use bash::BashRunner;
pub use pbs::Pbs;
pub use sge::Sge;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error submitting job {0}: {1}")]
    Submission(String, String),
    #[error("Unable to run \"{0}\": {1}")]
    Spawn(String, std::io::Error),
    #[error("\"{0}\" failed: {1}")]
    Command(String, String),
    #[error("Invalid walltime: \"{0}\"")]
    InvalidWalltime(String),
}

/// What a runner needs to know about a task to submit it.
#[derive(Debug, Clone, Copy)]
pub struct JobView<'a> {
    /// Namespaced task name.
    pub name: &'a str,
    pub command: &'a str,
    pub options: &'a TaskOptions,
    /// Scheduler job ids this job must wait for.
    pub deps: &'a [String],
}

/// A submitted job: its scheduler id, and the script that was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub job_id: String,
    pub script: String,
}

/// A cluster scheduler backend.
pub trait Runner {
    /// Name recorded as the run's cluster.
    fn cluster(&self) -> &str;

    /// Submit a job. With `dryrun`, no external command is run and
    /// the returned id is a placeholder (`dryrun.N`).
    fn qsub(
        &mut self,
        job: &JobView<'_>,
        monitor: Option<&str>,
        dryrun: bool,
    ) -> Result<Submitted, Error>;

    /// Cancel jobs.
    fn qdel(&mut self, job_ids: &[String]) -> Result<(), Error>;

    /// Release held jobs.
    fn qrls(&mut self, job_ids: &[String]) -> Result<(), Error>;

    /// Called once all jobs of a run have been submitted.
    fn done(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Backend settings shared by all runners, read from `runner.*` config keys.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Walltime multiplier.
    pub multiplier: f64,
    /// Default billing account.
    pub account: Option<String>,
    /// Parallel environment for multi-processor jobs (grid engine only).
    pub parallelenv: String,
    /// Where job output is captured before it is handed to the monitor.
    pub tmpdir: Option<String>,
    /// Program that generated scripts call back to when a monitor is set.
    pub monitor_bin: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            account: None,
            parallelenv: "shm".to_owned(),
            tmpdir: None,
            monitor_bin: "qtask-mon".to_owned(),
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Result<Self, config::Error> {
        let mut settings = Self::default();
        let runner = config.with_prefix("runner.");
        if let Some(m) = runner.get_f64("multiplier")? {
            settings.multiplier = m;
        }
        settings.account = runner.get_str("account");
        if let Some(pe) = runner.get_str("parallelenv") {
            settings.parallelenv = pe;
        }
        settings.tmpdir = runner.get_str("tmpdir");
        if let Some(bin) = config.get_str("monitor.bin") {
            settings.monitor_bin = bin;
        }
        Ok(settings)
    }
}

/// Create the runner named by the `runner` config key.
pub fn from_config(config: &Config) -> Result<Box<dyn Runner>> {
    let settings = RunnerSettings::from_config(config).context("while reading runner settings")?;
    let name = config.get_str("runner").unwrap_or_default().to_lowercase();
    log::debug!("using runner {name}: {settings:?}");
    match name.as_str() {
        "sge" => Ok(Box::new(Sge::new(settings))),
        "pbs" => Ok(Box::new(Pbs::new(settings))),
        "bash" => Ok(Box::new(BashRunner::new(settings))),
        _ => Err(config::Error::UnknownRunner(name).into()),
    }
}

/// Hands out placeholder job ids for dry runs.
#[derive(Debug, Default)]
struct DryrunIds {
    last: u64,
}

impl DryrunIds {
    fn next(&mut self) -> String {
        self.last += 1;
        format!("dryrun.{}", self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        assert_eq!(from_config(&config).unwrap().cluster(), "sge");

        config.set("runner", "PBS");
        assert_eq!(from_config(&config).unwrap().cluster(), "pbs");

        config.set("runner", "slurm");
        let err = from_config(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<config::Error>(),
            Some(config::Error::UnknownRunner(r)) if r == "slurm"
        ));
    }

    #[test]
    fn test_settings() {
        let mut config = Config::default();
        config.set("runner.multiplier", "1.5");
        config.set("runner.parallelenv", "smp");
        config.set("monitor.bin", "/opt/bin/qtask-mon");
        let s = RunnerSettings::from_config(&config).unwrap();
        assert_eq!(s.multiplier, 1.5);
        assert_eq!(s.parallelenv, "smp");
        assert_eq!(s.monitor_bin, "/opt/bin/qtask-mon");
        assert!(s.account.is_none());
    }

    #[test]
    fn test_dryrun_ids_increase() {
        let mut ids = DryrunIds::default();
        assert_eq!(ids.next(), "dryrun.1");
        assert_eq!(ids.next(), "dryrun.2");
    }
}
