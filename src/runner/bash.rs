use chrono::Utc;

use super::script::{Callback, ScriptBuilder};
use super::{DryrunIds, Error, JobView, Runner, RunnerSettings, Submitted};

/// Local fallback: jobs are appended, in submission order, to one shell
/// script that is printed to stdout once the run is done.
///
/// Submission order already respects dependencies, so running the script
/// top to bottom runs every job after the jobs it depends on.
#[derive(Debug)]
pub struct BashRunner {
    settings: RunnerSettings,
    tmpdir: String,
    script: String,
    next_id: u64,
    uniq: String,
    dryrun_ids: DryrunIds,
}

impl BashRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        let tmpdir = settings
            .tmpdir
            .clone()
            .or_else(|| std::env::var("TMPDIR").ok())
            .unwrap_or_else(|| "/tmp".to_owned());
        let uniq = format!(
            "{}_{}",
            Utc::now().format("%Y%m%d%H%M%S%6f"),
            std::process::id()
        );
        Self {
            settings,
            tmpdir,
            script: String::from("#!/bin/bash\n"),
            next_id: 1,
            uniq,
            dryrun_ids: DryrunIds::default(),
        }
    }

    /// The script so far.
    pub fn script(&self) -> &str {
        &self.script
    }

    fn fragment(&self, job_id: &str, job: &JobView<'_>, monitor: Option<&str>) -> String {
        let mut src = String::with_capacity(512);
        let mut b = ScriptBuilder::new(&mut src);
        b.write_line("", &format!("# {}", job.name));

        let cb = match monitor {
            Some(uri) => Callback {
                bin: &self.settings.monitor_bin,
                uri,
            },
            None => {
                b.write_line("", job.command.trim_end());
                return src;
            }
        };

        let func = format!("func_{job_id}");
        let tmpdir = self.tmpdir.as_str();
        b.write_func(&func, job.command);
        b.write_callback("", &cb, &["start", job_id, "$HOSTNAME"]);
        b.write_captured_run(&func, job_id, tmpdir);
        b.write_stop("", &cb, job_id, tmpdir);
        b.write_keep_output(
            "",
            job_id,
            tmpdir,
            job.options.stdout.as_deref(),
            job.options.stderr.as_deref(),
        );
        b.write_line("", "if [ \"$RETVAL\" -ne 0 ]; then");
        b.write_line("  ", &format!("echo \"Error processing job: {job_id}\""));
        b.write_line("  ", "exit $RETVAL");
        b.write_line("", "fi");
        src
    }
}

impl Runner for BashRunner {
    fn cluster(&self) -> &str {
        "bash"
    }

    fn qsub(
        &mut self,
        job: &JobView<'_>,
        monitor: Option<&str>,
        dryrun: bool,
    ) -> Result<Submitted, Error> {
        let job_id = if dryrun {
            self.dryrun_ids.next()
        } else {
            let id = format!("job_{}_{}", self.next_id, self.uniq);
            self.next_id += 1;
            id
        };
        let fragment = self.fragment(&job_id, job, monitor);
        self.script.push_str(&fragment);
        Ok(Submitted {
            job_id,
            script: fragment,
        })
    }

    fn qdel(&mut self, _job_ids: &[String]) -> Result<(), Error> {
        Ok(())
    }

    fn qrls(&mut self, _job_ids: &[String]) -> Result<(), Error> {
        Ok(())
    }

    fn done(&mut self) -> Result<(), Error> {
        print!("{}", self.script);
        self.script.truncate("#!/bin/bash\n".len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::TaskOptions;

    #[test]
    fn test_jobs_appended_in_order() {
        let mut runner = BashRunner::new(RunnerSettings {
            tmpdir: Some("/scratch".into()),
            ..Default::default()
        });
        let options = TaskOptions::default();
        let a = JobView {
            name: "a",
            command: "echo a",
            options: &options,
            deps: &[],
        };
        let b = JobView {
            name: "b",
            command: "echo b",
            options: &options,
            deps: &[],
        };

        let first = runner.qsub(&a, None, false).unwrap();
        let second = runner.qsub(&b, Some("sqlite://q.db"), false).unwrap();
        assert!(first.job_id.starts_with("job_1_"));
        assert!(second.job_id.starts_with("job_2_"));
        assert_ne!(first.job_id, second.job_id);

        let script = runner.script();
        let pos_a = script.find("echo a").unwrap();
        let pos_b = script.find("echo b").unwrap();
        assert!(pos_a < pos_b);
        assert!(script.contains(&format!(
            "\"qtask-mon\" \"sqlite://q.db\" start {} $HOSTNAME",
            second.job_id
        )));
        assert!(script.contains(&format!("rm \"/scratch/{}.qtask.stdout\"", second.job_id)));
    }

    #[test]
    fn test_dryrun_ids() {
        let mut runner = BashRunner::new(RunnerSettings::default());
        let options = TaskOptions::default();
        let job = JobView {
            name: "a",
            command: "true",
            options: &options,
            deps: &[],
        };
        assert_eq!(runner.qsub(&job, None, true).unwrap().job_id, "dryrun.1");
        assert_eq!(runner.qsub(&job, None, true).unwrap().job_id, "dryrun.2");
    }
}
