use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

use graph::{Programs, Registry, Task, TaskGraph, TaskId, TaskState};
use monitor::{AbortCode, JobSubmission, Monitor, MonitorUri, RunInfo};
use util::RunCodes;

use crate::config::Config;
use crate::runner::{self, JobView, Runner};
use crate::ui::Ui;

/// Job naming
mod naming;
pub use naming::{namespace, sanitize};

static RUN_CODES: RunCodes = RunCodes::new();
static GENERATIONS: AtomicU64 = AtomicU64::new(0);

const ABORT_REASON: &str = "submission failure";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Dependencies of {0} task(s) can never be satisfied: {1}")]
    Unsatisfiable(usize, String),
}

/// A job submitted during a run.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub name: String,
    pub job_id: String,
    pub script: String,
}

/// What a successful [`Pipeline::submit`] did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_code: String,
    /// Jobs in submission order.
    pub jobs: Vec<SubmittedJob>,
    /// Held jobs released at the end of the run.
    pub released: Vec<String>,
    pub skipped: usize,
}

impl RunSummary {
    /// The job submitted for the task with full name `name`.
    pub fn job(&self, name: &str) -> Option<&SubmittedJob> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// What was undone after a failed submission.
#[derive(Debug, Clone, Default)]
pub struct AbortReport {
    /// Jobs we asked the scheduler to cancel.
    pub cancelled: Vec<String>,
    /// Jobs marked as aborted in the monitor, including their dependents.
    pub marked: Vec<String>,
}

/// Collects the tasks of one run and submits them to a cluster scheduler.
///
/// Tasks are registered through [`graph::TaskDef::invoke`] (the pipeline is
/// the [`Registry`]), or added directly with [`Pipeline::add_task`].
/// After [`Pipeline::submit`], successful or not, the pipeline is reset and
/// can host another run.
pub struct Pipeline {
    runner: Box<dyn Runner>,
    monitor_uri: Option<String>,
    monitor_bin: String,
    holding: bool,
    programs: Programs,

    project: String,
    sample: String,
    basename: String,

    run_code: String,
    graph: TaskGraph,
    global_deps: Vec<TaskId>,
    barrier: Option<TaskId>,
    /// Job ids submitted so far in this run, in submission order.
    submitted: Vec<String>,
}

impl Pipeline {
    /// Create a new `Pipeline` with no monitor and no barrier task.
    pub fn new(runner: Box<dyn Runner>) -> Self {
        Self {
            runner,
            monitor_uri: None,
            monitor_bin: "qtask-mon".to_owned(),
            holding: false,
            programs: Programs::new(),
            project: String::new(),
            sample: String::new(),
            basename: String::new(),
            run_code: RUN_CODES.next(),
            graph: TaskGraph::new(next_generation()),
            global_deps: Vec::new(),
            barrier: None,
            submitted: Vec::new(),
        }
    }

    /// Create a `Pipeline` using the `runner`, `monitor`, `monitor.bin`
    /// and `holding` config keys.
    pub fn from_config(config: &Config) -> Result<Self> {
        let runner = runner::from_config(config)?;
        let mut pipeline = Self::new(runner);
        pipeline.holding = config.get_bool("holding", true);
        if let Some(bin) = config.get_str("monitor.bin") {
            pipeline.monitor_bin = bin;
        }
        if let Some(uri) = config.get_str("monitor") {
            pipeline
                .set_monitor(&uri)
                .context("while reading monitor from config")?;
        }
        Ok(pipeline)
    }

    /// Use the monitor at `uri`. Unknown schemes are rejected here,
    /// before any task is submitted.
    pub fn set_monitor(&mut self, uri: &str) -> Result<(), monitor::Error> {
        MonitorUri::parse(uri)?;
        self.monitor_uri = Some(uri.to_owned());
        Ok(())
    }

    pub fn clear_monitor(&mut self) {
        self.monitor_uri = None;
    }

    pub fn monitor_uri(&self) -> Option<&str> {
        self.monitor_uri.as_deref()
    }

    /// Whether tasks of later runs hang off a held barrier task.
    pub fn set_holding(&mut self, holding: bool) {
        self.holding = holding;
    }

    pub fn set_project(&mut self, project: impl Into<String>) {
        self.project = project.into();
    }

    pub fn set_sample(&mut self, sample: impl Into<String>) {
        self.sample = sample.into();
    }

    /// Extra namespace segment, after project and sample.
    pub fn set_basename(&mut self, basename: impl Into<String>) {
        self.basename = basename.into();
    }

    pub fn run_code(&self) -> &str {
        &self.run_code
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Programs checked for tasks' `requires` option.
    pub fn programs_mut(&mut self) -> &mut Programs {
        &mut self.programs
    }

    /// Make every task added from now on in this run depend on
    /// `job_id`, a job already known to the scheduler.
    pub fn add_global_dependency(&mut self, job_id: impl Into<String>) -> TaskId {
        let id = self.graph.add(Task::external(job_id));
        self.global_deps.push(id);
        id
    }

    /// Add an edge by hand, on top of those recorded through output handles.
    pub fn add_dependency(&mut self, task: TaskId, on: TaskId) -> bool {
        self.graph.add_dependency(task, on)
    }

    /// Namespace `task` and add it to the run.
    pub fn add_task(&mut self, mut task: Task) -> TaskId {
        task.basename = namespace(&self.project, &self.sample, &self.basename);
        if !task.is_skip() {
            task.depends_on.extend(self.global_deps.iter().copied());
            if self.holding {
                let barrier = self.barrier();
                task.depends_on.push(barrier);
            }
        }
        log::debug!("adding task {}", task.fullname());
        self.graph.add(task)
    }

    /// The barrier task for this run, created on first use.
    fn barrier(&mut self) -> TaskId {
        if let Some(id) = self.barrier {
            return id;
        }
        let mut task = Task::barrier();
        task.basename = namespace(&self.project, &self.sample, &self.basename);
        let id = self.graph.add(task);
        self.barrier = Some(id);
        id
    }

    /// Start over with an empty run: new run code, new graph generation
    /// (so output handles from the old run are rejected), and no
    /// project, sample, basename or global dependencies.
    pub fn reset(&mut self) {
        self.run_code = RUN_CODES.next();
        self.graph = TaskGraph::new(next_generation());
        self.project.clear();
        self.sample.clear();
        self.basename.clear();
        self.global_deps.clear();
        self.barrier = None;
        self.submitted.clear();
    }
}

impl Registry for Pipeline {
    fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn register(&mut self, task: Task) -> TaskId {
        self.add_task(task)
    }

    fn require(&mut self, program: &str) -> Result<(), graph::Error> {
        self.programs.check(program)
    }
}

fn next_generation() -> u64 {
    GENERATIONS.fetch_add(1, Ordering::Relaxed) + 1
}

// SUBMITTING /////////////////
impl Pipeline {
    /// Submit every task of the run, in dependency order.
    ///
    /// If any submission fails, every job already submitted in this run is
    /// cancelled (and marked aborted in the monitor) before the error is
    /// returned. With `dryrun`, the runner makes no external calls, nothing
    /// is cancelled or released, and no monitor is opened.
    pub fn submit(&mut self, verbose: bool, dryrun: bool) -> Result<RunSummary> {
        let mut ui = Ui::new(verbose);
        ui.start_timer();

        if let Some(barrier) = self.barrier {
            if self.graph.get(barrier).children.is_empty() {
                log::debug!("barrier task has no dependents; dropping it");
                self.graph.get_mut(barrier).state = TaskState::Skipped;
            }
        }

        let mut mon = match self.open_monitor(dryrun) {
            Ok(mon) => mon,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        match self.submit_all(&ui, &mut mon, dryrun) {
            Ok(jobs) => {
                let summary = self.complete(&ui, mon, jobs, dryrun);
                ui.print_elapsed("Submission");
                summary
            }
            Err(e) => {
                log::error!("submission failed, aborting run {}", self.run_code);
                let report = self.abort(&ui, mon, dryrun);
                log::info!(
                    "cancelled {} job(s), marked {} job(s) aborted",
                    report.cancelled.len(),
                    report.marked.len()
                );
                self.reset();
                Err(e)
            }
        }
    }

    fn open_monitor(&mut self, dryrun: bool) -> Result<Option<Box<dyn Monitor>>> {
        let uri = match (&self.monitor_uri, dryrun) {
            (Some(uri), false) => uri.clone(),
            _ => return Ok(None),
        };
        self.programs
            .check(&self.monitor_bin)
            .context("job scripts call back to the monitor program")?;

        let mut mon =
            monitor::open(&uri).with_context(|| format!("while opening monitor \"{uri}\""))?;
        mon.start_run(&RunInfo {
            run_code: self.run_code.clone(),
            project: self.project.clone(),
            sample: self.sample.clone(),
            cluster: self.runner.cluster().to_owned(),
        })?;
        Ok(Some(mon))
    }

    /// Wavefront submission: keep submitting every task whose dependencies
    /// have all been submitted or skipped, until none are left.
    fn submit_all(
        &mut self,
        ui: &Ui,
        mon: &mut Option<Box<dyn Monitor>>,
        dryrun: bool,
    ) -> Result<Vec<SubmittedJob>> {
        let mut jobs = Vec::with_capacity(self.graph.len());
        let mut pending: Vec<TaskId> = self
            .graph
            .iter()
            .filter(|(_, task)| !task.is_done())
            .map(|(id, _)| id)
            .collect();

        while !pending.is_empty() {
            let mut progressed = false;
            for &id in &pending {
                let task = self.graph.get(id);
                if task.is_skip() {
                    ui.skipped(&task.fullname());
                    self.graph.get_mut(id).state = TaskState::Skipped;
                    progressed = true;
                } else if self.graph.is_ready(id) {
                    let job = self.submit_one(id, mon, dryrun)?;
                    ui.submitted(&job.job_id, &job.name, &self.graph.dependency_job_ids(id));
                    ui.script(&job.job_id, &job.script);
                    jobs.push(job);
                    progressed = true;
                }
            }

            pending.retain(|id| !self.graph.get(*id).is_done());
            if !progressed && !pending.is_empty() {
                let names: Vec<String> = pending
                    .iter()
                    .map(|id| self.graph.get(*id).fullname())
                    .collect();
                return Err(Error::Unsatisfiable(pending.len(), names.join(", ")).into());
            }
        }
        Ok(jobs)
    }

    fn submit_one(
        &mut self,
        id: TaskId,
        mon: &mut Option<Box<dyn Monitor>>,
        dryrun: bool,
    ) -> Result<SubmittedJob> {
        let deps = self.graph.dependency_job_ids(id);
        let task = self.graph.get(id);
        let name = task.fullname();
        let job = JobView {
            name: &name,
            command: &task.command,
            options: &task.options,
            deps: &deps,
        };
        let submitted = self
            .runner
            .qsub(&job, self.monitor_uri.as_deref(), dryrun)
            .with_context(|| format!("while submitting task \"{name}\""))?;
        log::info!("submitted {name} as {}", submitted.job_id);

        let record = mon.as_ref().map(|_| JobSubmission {
            job_id: submitted.job_id.clone(),
            run_code: self.run_code.clone(),
            name: name.clone(),
            command: task.command.clone(),
            deps,
            resources: task.options.entries(),
            script: submitted.script.clone(),
        });

        let task = self.graph.get_mut(id);
        task.job_id = Some(submitted.job_id.clone());
        task.state = TaskState::Submitted;
        self.submitted.push(submitted.job_id.clone());

        if let (Some(mon), Some(record)) = (mon.as_mut(), record) {
            mon.submit_job(&record)
                .with_context(|| format!("while recording job {} in monitor", record.job_id))?;
        }

        Ok(SubmittedJob {
            name,
            job_id: submitted.job_id,
            script: submitted.script,
        })
    }

    /// Ids of the held jobs this run has submitted.
    fn held_ids(&self) -> Vec<String> {
        self.graph
            .iter()
            .map(|(_, task)| task)
            .filter(|task| !task.is_external() && task.state == TaskState::Submitted)
            .filter(|task| task.options.is_hold())
            .filter_map(|task| task.job_id.clone())
            .collect()
    }

    /// Release held jobs, finish up with the runner and monitor, and reset.
    fn complete(
        &mut self,
        ui: &Ui,
        mon: Option<Box<dyn Monitor>>,
        jobs: Vec<SubmittedJob>,
        dryrun: bool,
    ) -> Result<RunSummary> {
        let held = self.held_ids();
        let skipped = self
            .graph
            .iter()
            .filter(|(_, task)| task.state == TaskState::Skipped)
            .count();

        let released = if dryrun || held.is_empty() {
            Ok(())
        } else {
            self.runner.qrls(&held)
        };
        ui.released(&held);
        let finished = self.runner.done();
        let closed = match mon {
            Some(mut mon) => mon.close(),
            None => Ok(()),
        };

        let summary = RunSummary {
            run_code: self.run_code.clone(),
            jobs,
            released: held,
            skipped,
        };
        self.reset();
        ui.done();

        released.context("while releasing held jobs")?;
        finished.context("while finishing submission")?;
        closed.context("while closing monitor")?;
        Ok(summary)
    }

    /// Cancel everything submitted so far and mark it aborted in the monitor.
    fn abort(&mut self, ui: &Ui, mon: Option<Box<dyn Monitor>>, dryrun: bool) -> AbortReport {
        let mut report = AbortReport {
            cancelled: self.submitted.clone(),
            ..Default::default()
        };
        if !report.cancelled.is_empty() {
            ui.aborted(&report.cancelled);
            if !dryrun {
                if let Err(e) = self.runner.qdel(&report.cancelled) {
                    log::error!("unable to cancel submitted jobs: {e}");
                }
            }
        }

        if let Some(mut mon) = mon {
            // Newest first: a job's dependents are all submitted after it, so each
            // cancelled job gets its own mark before an ancestor's cascade reaches it.
            for job_id in report.cancelled.iter().rev() {
                match mon.abort(job_id, ABORT_REASON, AbortCode::Signalled) {
                    Ok(cascade) => report.marked.extend(cascade.aborted),
                    Err(e) => log::warn!("unable to mark job {job_id} aborted: {e}"),
                }
            }
            if let Err(e) = mon.close() {
                log::warn!("unable to close monitor: {e}");
            }
        }
        report
    }
}
