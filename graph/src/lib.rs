//! Graph side of qtask: tasks, their resource options, and the builder
//! that turns a plain computation into a registered task node.
//!
//! Output chaining works through [`OutputHandle`]s. A handle stands in for a
//! file some task has declared it will write; passing the handle as an
//! argument to another task's [`TaskDef::invoke`] substitutes the path and
//! records a dependency edge on the producer.

mod id;
pub use id::TaskId;

/// Per-task scheduler hints
mod options;
pub use options::{OptionValue, TaskOptions, OPTION_KEYS};

mod task;
pub use task::{Task, TaskState};

/// Arena of tasks for a single run
mod graph;
pub use graph::TaskGraph;

/// Placeholders for not-yet-written output files
mod handle;
pub use handle::{Declared, OutputHandle, Outputs};

/// Arguments passed into a task computation
mod args;
pub use args::{Arg, Args, Invocation, Resolved};

/// Turns computations into registered tasks
mod builder;
pub use builder::{Registry, TaskDef, TaskResult};

/// Checks that required programs are available
mod programs;
pub use programs::Programs;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Missing required program: {0}")]
    MissingProgram(String),
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Problems with the shape of arguments or results while building a task.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BuildError {
    #[error("Output handle \"{0}\" was created by a different pipeline run")]
    StaleHandle(String),
    #[error("Missing argument: {0}")]
    MissingArgument(String),
    #[error("Argument {0} is a list where a single value was expected")]
    ExpectedValue(String),
    #[error("Argument {0} is a single value where a list was expected")]
    ExpectedList(String),
    #[error("Invalid value for option \"{0}\": {1}")]
    InvalidOption(String, String),
    #[error("Keyword argument \"name\" must be a single value")]
    InvalidName,
}
