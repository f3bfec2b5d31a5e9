use super::exec;
use super::script::{Callback, ScriptBuilder};
use super::{scale_walltime, DryrunIds, Error, JobView, Runner, RunnerSettings, Submitted};

const DIRECTIVE: &str = "#PBS";
const JOB_ID: &str = "$PBS_JOBID";
const FUNC: &str = "func";

/// PBS/Torque backend.
#[derive(Debug)]
pub struct Pbs {
    settings: RunnerSettings,
    dryrun_ids: DryrunIds,
}

impl Pbs {
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            settings,
            dryrun_ids: DryrunIds::default(),
        }
    }

    /// Render the submission script for `job`.
    pub fn script(&self, job: &JobView<'_>, monitor: Option<&str>) -> Result<String, Error> {
        let opts = job.options;
        let mut src = String::with_capacity(1024);
        let mut b = ScriptBuilder::new(&mut src);
        b.write_prefix();
        directive(&mut b, "-N", job.name);

        if opts.is_hold() {
            directive(&mut b, "-h", "");
        }
        if opts.is_env() {
            directive(&mut b, "-V", "");
        }
        if let Some(walltime) = &opts.walltime {
            let walltime = scale_walltime(walltime, self.settings.multiplier)?;
            directive(&mut b, "-l", &format!("walltime={walltime}"));
        }
        if let Some(mem) = opts.memory() {
            directive(&mut b, "-l", &format!("mem={mem}"));
        }
        if let Some(procs) = opts.procs() {
            directive(&mut b, "-l", &format!("nodes=1:ppn={procs}"));
        }
        if !job.deps.is_empty() {
            directive(&mut b, "-W", &format!("depend=afterok:{}", job.deps.join(":")));
        }
        if let Some(queue) = &opts.queue {
            directive(&mut b, "-q", queue);
        }
        if let Some(mail) = &opts.mail {
            directive(&mut b, "-m", mail);
        }
        if let Some(account) = opts.account.as_ref().or(self.settings.account.as_ref()) {
            directive(&mut b, "-A", account);
        }
        if let Some(wd) = &opts.wd {
            directive(&mut b, "-d", wd);
        }

        let cb = monitor.map(|uri| Callback {
            bin: &self.settings.monitor_bin,
            uri,
        });
        if cb.is_some() {
            directive(&mut b, "-o", "/dev/null");
            directive(&mut b, "-e", "/dev/null");
        } else {
            if let Some(stdout) = &opts.stdout {
                directive(&mut b, "-o", stdout);
            }
            if let Some(stderr) = &opts.stderr {
                directive(&mut b, "-e", stderr);
            }
        }

        b.write_line("", "set -o pipefail");
        b.write_func(FUNC, job.command);

        let tmpdir = self.settings.tmpdir.as_deref().unwrap_or("$TMPDIR");
        match &cb {
            Some(cb) => {
                b.write_callback("", cb, &["start", JOB_ID, "$HOSTNAME"]);
                b.write_captured_run(FUNC, JOB_ID, tmpdir);
                b.write_stop("", cb, JOB_ID, tmpdir);
                b.write_keep_output("", JOB_ID, tmpdir, opts.stdout.as_deref(), opts.stderr.as_deref());
                b.write_line("", "if [ $RETVAL -ne 0 ]; then");
                b.write_callback("  ", cb, &["killdeps", JOB_ID]);
                b.write_line("", "fi");
            }
            None => {
                b.write_line("", FUNC);
                b.write_line("", "RETVAL=$?");
            }
        }
        b.write_line("", "exit $RETVAL");

        Ok(src)
    }
}

impl Runner for Pbs {
    fn cluster(&self) -> &str {
        "pbs"
    }

    fn qsub(
        &mut self,
        job: &JobView<'_>,
        monitor: Option<&str>,
        dryrun: bool,
    ) -> Result<Submitted, Error> {
        let script = self.script(job, monitor)?;
        if dryrun {
            return Ok(Submitted {
                job_id: self.dryrun_ids.next(),
                script,
            });
        }

        let (ok, output) = exec::run_with_input("qsub", &[], &script)?;
        if !ok {
            return Err(Error::Submission(job.name.to_owned(), output.trim().to_owned()));
        }
        Ok(Submitted {
            job_id: output.trim().to_owned(),
            script,
        })
    }

    fn qdel(&mut self, job_ids: &[String]) -> Result<(), Error> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = job_ids.iter().map(String::as_str).collect();
        exec::run("qdel", &ids)
    }

    fn qrls(&mut self, job_ids: &[String]) -> Result<(), Error> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = job_ids.iter().map(String::as_str).collect();
        exec::run("qrls", &ids)
    }
}

fn directive(b: &mut ScriptBuilder<'_>, flag: &str, val: &str) {
    b.write_directive(DIRECTIVE, flag, val);
}
