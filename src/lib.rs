//! qtask builds a graph of shell-command tasks, chaining them through the
//! files they declare as outputs, and submits the graph to a cluster
//! scheduler (SGE, PBS, or a local bash script) one wavefront at a time.
//! Job scripts report back to a monitor store through the `qtask-mon`
//! program, which also cascades failures to dependent jobs.

/// Configuration file and environment settings
pub mod config;
/// Scheduler backends
pub mod runner;
/// Run bookkeeping and wavefront submission
pub mod pipeline;
/// Text UI
mod ui;

/// Definition of command-line args
mod args;
/// `qtask-mon` command-line app
mod app;

pub use config::{Config, ConfigValue};
pub use pipeline::{Pipeline, RunSummary, SubmittedJob};
pub use runner::{JobView, Runner, Submitted};

pub use graph::{
    Args as TaskArgs, BuildError, Invocation, OutputHandle, Outputs, Programs, Task, TaskDef,
    TaskId, TaskOptions, TaskResult,
};
pub use monitor::{AbortCode, JobRecord, Monitor};

// exported for tests:
pub use app::App;
pub use args::{Args, Cmd};

/// Run the `qtask-mon` command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    let app = App::new(args);
    app.run()?;

    Ok(())
}
