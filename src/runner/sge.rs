use super::exec;
use super::script::{Callback, ScriptBuilder};
use super::{scale_walltime, DryrunIds, Error, JobView, Runner, RunnerSettings, Submitted};

const DIRECTIVE: &str = "#$";
const JOB_ID: &str = "$JOB_ID";
const FUNC: &str = "func";

/// Grid engine backend: scripts are piped into `qsub`.
#[derive(Debug)]
pub struct Sge {
    settings: RunnerSettings,
    dryrun_ids: DryrunIds,
}

impl Sge {
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            settings,
            dryrun_ids: DryrunIds::default(),
        }
    }

    /// Render the submission script for `job`.
    pub fn script(&self, job: &JobView<'_>, monitor: Option<&str>) -> Result<String, Error> {
        let opts = job.options;
        let mut src = String::with_capacity(2048);
        let mut b = ScriptBuilder::new(&mut src);
        b.write_prefix();
        directive(&mut b, "-w", "e");
        directive(&mut b, "-terse", "");
        directive(&mut b, "-N", &job_name(job.name));

        if opts.is_hold() {
            directive(&mut b, "-h", "");
        }
        if opts.is_env() {
            directive(&mut b, "-V", "");
        }
        if let Some(walltime) = &opts.walltime {
            let walltime = scale_walltime(walltime, self.settings.multiplier)?;
            directive(&mut b, "-l", &format!("h_rt={walltime}"));
        }
        if let Some(procs) = opts.procs() {
            directive(&mut b, "-pe", &format!("{} {procs}", self.settings.parallelenv));
        }
        if let Some(mem) = opts.memory() {
            let mem = match opts.procs() {
                Some(procs) if procs > 1 => per_processor(mem, procs),
                _ => mem.to_owned(),
            };
            directive(&mut b, "-l", &format!("h_vmem={mem}"));
        }

        let mut deps: Vec<String> = job.deps.to_vec();
        if let Some(extra) = opts.extra.get("depends") {
            let extra = extra.to_string();
            deps.extend(
                extra
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            );
        }
        if !deps.is_empty() {
            directive(&mut b, "-hold_jid", &deps.join(","));
        }

        if let Some(qos) = &opts.qos {
            directive(&mut b, "-P", qos);
        }
        if let Some(queue) = &opts.queue {
            directive(&mut b, "-q", queue);
        }
        if let Some(mail) = &opts.mail {
            directive(&mut b, "-m", mail);
        }
        if let Some(wd) = &opts.wd {
            directive(&mut b, "-wd", wd);
        }
        if let Some(account) = opts.account.as_ref().or(self.settings.account.as_ref()) {
            directive(&mut b, "-A", account);
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

        // SIGUSR1/2 arrive ahead of a suspend or kill, thanks to -notify:
        directive(&mut b, "-notify", "");
        b.write_line("", "FAILED=\"\"");
        b.write_line("", "notify_stop() {\n  kill_deps_signal \"SIGSTOP\"\n}");
        b.write_line("", "notify_kill() {\n  kill_deps_signal \"SIGKILL\"\n}");
        b.write_line("", "kill_deps_signal() {\n  FAILED=\"1\"\n  kill_deps");
        if let Some(cb) = &cb {
            b.write_callback("  ", cb, &["signal", JOB_ID, "\"$1\""]);
        }
        b.write_line("", "}");
        b.write_line("", "kill_deps() {");
        b.write_line(
            "  ",
            "qdel $(qstat -f -j $JOB_ID | grep jid_successor_list | awk '{print $2}' | sed -e 's/,/ /g')",
        );
        b.write_line("", "}");
        b.write_line("", "trap notify_stop SIGUSR1");
        b.write_line("", "trap notify_kill SIGUSR2");
        b.write_line("", "set -o pipefail");
        b.write_func(FUNC, job.command);

        let tmpdir = self.settings.tmpdir.as_deref().unwrap_or("$TMPDIR");
        match &cb {
            Some(cb) => {
                b.write_callback("", cb, &["start", JOB_ID, "$HOSTNAME"]);
                b.write_captured_run(FUNC, JOB_ID, tmpdir);
                b.write_line("", "if [ \"$FAILED\" == \"\" ]; then");
                b.write_stop("  ", cb, JOB_ID, tmpdir);
                b.write_keep_output(
                    "  ",
                    JOB_ID,
                    tmpdir,
                    opts.stdout.as_deref(),
                    opts.stderr.as_deref(),
                );
            }
            None => {
                b.write_line("", FUNC);
                b.write_line("", "RETVAL=$?");
                b.write_line("", "if [ \"$FAILED\" == \"\" ]; then");
            }
        }
        b.write_line("  ", "if [ $RETVAL -ne 0 ]; then");
        b.write_line("    ", "kill_deps");
        if let Some(cb) = &cb {
            b.write_callback("    ", cb, &["killdeps", JOB_ID]);
        }
        b.write_line("  ", "fi");
        b.write_line("  ", "exit $RETVAL");
        b.write_line("", "else");
        b.write_line("  ", "# wait for the scheduler to kill the job, for accounting (max 120 sec)");
        b.write_line("  ", "I=0");
        b.write_line("  ", "while [ $I -lt 120 ]; do");
        b.write_line("    ", "sleep 1");
        b.write_line("    ", "let \"I=$I+1\"");
        b.write_line("  ", "done");
        b.write_line("", "fi");

        Ok(src)
    }
}

impl Runner for Sge {
    fn cluster(&self) -> &str {
        "sge"
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
        let ids = job_ids.join(",");
        exec::run("qdel", &[ids.as_str()])
    }

    fn qrls(&mut self, job_ids: &[String]) -> Result<(), Error> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let ids = job_ids.join(",");
        exec::run("qrls", &[ids.as_str()])
    }
}

fn directive(b: &mut ScriptBuilder<'_>, flag: &str, val: &str) {
    b.write_directive(DIRECTIVE, flag, val);
}

/// Grid engine job names must start with a letter.
fn job_name(name: &str) -> String {
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => name.to_owned(),
        _ => format!("sgejob_{name}"),
    }
}

/// `h_vmem` is per slot, so split the task's total memory across its processors.
fn per_processor(mem: &str, procs: u32) -> String {
    let split = mem
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(mem.len());
    let (num, unit) = mem.split_at(split);
    match num.parse::<f64>() {
        Ok(n) => {
            let per = n / procs as f64;
            // two decimals at most, without trailing zeros:
            let per = (per * 100.0).round() / 100.0;
            format!("{per}{unit}")
        }
        Err(_) => mem.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::TaskOptions;

    fn opts(pairs: &[(&str, &str)]) -> TaskOptions {
        let mut opts = TaskOptions::default();
        for (k, v) in pairs {
            opts.set(k, (*v).into()).unwrap();
        }
        opts
    }

    #[test]
    fn test_directives() {
        let sge = Sge::new(RunnerSettings {
            multiplier: 2.0,
            account: Some("lab".into()),
            ..Default::default()
        });
        let options = opts(&[
            ("walltime", "1:00:00"),
            ("procs", "4"),
            ("mem", "8G"),
            ("hold", "t"),
            ("queue", "long"),
            ("depends", "77"),
        ]);
        let deps = vec!["11".to_owned(), "12".to_owned()];
        let job = JobView {
            name: "1st.align",
            command: "bwa mem ref.fa r1.fq",
            options: &options,
            deps: &deps,
        };
        let src = sge.script(&job, None).unwrap();

        assert!(src.starts_with("#!/bin/bash\n#$ -w e\n#$ -terse\n"));
        assert!(src.contains("#$ -N sgejob_1st.align\n"));
        assert!(src.contains("#$ -h\n"));
        assert!(src.contains("#$ -l h_rt=2:00:00\n"));
        assert!(src.contains("#$ -pe shm 4\n"));
        assert!(src.contains("#$ -l h_vmem=2G\n"));
        assert!(src.contains("#$ -hold_jid 11,12,77\n"));
        assert!(src.contains("#$ -q long\n"));
        assert!(src.contains("#$ -A lab\n"));
        assert!(src.contains("  bwa mem ref.fa r1.fq\n"));
        assert!(!src.contains("qtask-mon"));
    }

    #[test]
    fn test_monitor_callbacks() {
        let sge = Sge::new(RunnerSettings::default());
        let options = opts(&[("stdout", "log.txt"), ("account", "mine")]);
        let job = JobView {
            name: "P.s1.sort",
            command: "sort x",
            options: &options,
            deps: &[],
        };
        let src = sge.script(&job, Some("sqlite:///tmp/q.db")).unwrap();
        assert!(src.contains("#$ -o /dev/null\n#$ -e /dev/null\n"));
        assert!(src.contains("#$ -A mine\n"));
        assert!(src.contains("\"qtask-mon\" \"sqlite:///tmp/q.db\" start $JOB_ID $HOSTNAME\n"));
        assert!(src.contains("\"qtask-mon\" \"sqlite:///tmp/q.db\" killdeps $JOB_ID\n"));
        assert!(src.contains("\"qtask-mon\" \"sqlite:///tmp/q.db\" signal $JOB_ID \"$1\"\n"));
        assert!(src.contains("mv \"$TMPDIR/$JOB_ID.qtask.stdout\" \"log.txt\"\n"));
        assert!(!src.contains("hold_jid"));
    }

    #[test]
    fn test_dryrun_is_deterministic() {
        let mut sge = Sge::new(RunnerSettings::default());
        let options = TaskOptions::default();
        let job = JobView {
            name: "a",
            command: "true",
            options: &options,
            deps: &[],
        };
        let a = sge.qsub(&job, None, true).unwrap();
        let b = sge.qsub(&job, None, true).unwrap();
        assert_eq!(a.job_id, "dryrun.1");
        assert_eq!(b.job_id, "dryrun.2");
        assert_eq!(a.script, b.script);
    }

    #[test]
    fn test_per_processor() {
        assert_eq!(per_processor("8G", 4), "2G");
        assert_eq!(per_processor("10G", 4), "2.5G");
        assert_eq!(per_processor("1.5G", 2), "0.75G");
        assert_eq!(per_processor("lots", 2), "lots");
    }
}
