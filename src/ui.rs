use colored::Colorize;

use util::Timer;

/// All progress output from a submission goes through this struct.
/// Apart from submitted job ids, nothing is printed unless `verbose` is set.
pub struct Ui {
    /// displays progress and job scripts to the user
    pub verbose: bool,
    /// keeps track of time for the whole submission
    timer: Timer,
}

impl Ui {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            timer: Timer::now(),
        }
    }

    pub fn start_timer(&mut self) {
        if self.verbose {
            self.timer.reset();
        }
    }

    pub fn print_elapsed(&self, label: &str) {
        if self.verbose {
            self.timer.print_elapsed(label);
        }
    }

    /// Job ids are always printed, one per line, so a quiet run can still be tracked.
    pub fn submitted(&self, job_id: &str, name: &str, deps: &[String]) {
        eprintln!("{}", self.submitted_line(job_id, name, deps));
    }

    fn submitted_line(&self, job_id: &str, name: &str, deps: &[String]) -> String {
        if self.verbose {
            format!("{} {} {} ({})", "SUBMIT".green(), job_id, name, deps.join(","))
        } else {
            job_id.to_owned()
        }
    }

    pub fn skipped(&self, name: &str) {
        if self.verbose {
            eprintln!("{} {}", "SKIP".yellow(), name);
        }
    }

    pub fn script(&self, job_id: &str, script: &str) {
        if self.verbose {
            eprintln!("{}", format!("-[{job_id}]---------------").magenta());
            eprintln!("{}", script.trim_end());
        }
    }

    pub fn released(&self, job_ids: &[String]) {
        if self.verbose && !job_ids.is_empty() {
            eprintln!("{} {}", "RELEASE".green(), job_ids.join(","));
        }
    }

    pub fn aborted(&self, job_ids: &[String]) {
        if self.verbose {
            eprintln!("{} {}", "ABORT".red(), job_ids.join(","));
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_submission_prints_job_id() {
        let deps = vec!["41".to_owned()];
        let quiet = Ui::new(false);
        assert_eq!(quiet.submitted_line("42", "P.gzip", &deps), "42");

        colored::control::set_override(false);
        let verbose = Ui::new(true);
        assert_eq!(verbose.submitted_line("42", "P.gzip", &deps), "SUBMIT 42 P.gzip (41)");
    }
}
