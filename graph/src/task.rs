use crate::{TaskId, TaskOptions};

/// Where a task is in the submission lifecycle.
/// `Submitted` is terminal; anything later is tracked by the monitor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Pending,
    Skipped,
    Submitted,
}

/// A vertex in the task graph.
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Short name, usually the name of the computation that built it.
    pub name: String,
    /// Namespace prefix assigned by the pipeline.
    pub basename: String,
    /// Shell command; may be empty.
    pub command: String,
    pub options: TaskOptions,
    /// Tasks that must be submitted before this one.
    pub depends_on: Vec<TaskId>,
    /// Inverse of `depends_on`, maintained by the graph.
    pub children: Vec<TaskId>,
    /// Scheduler job id, set once submitted.
    pub job_id: Option<String>,
    pub state: TaskState,
    /// Stands in for a job submitted outside this run.
    external: bool,
}

impl Task {
    /// Create a new pending task.
    pub fn new(name: impl Into<String>, command: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            options,
            ..Default::default()
        }
    }

    /// A minimal-resource held task that everything else in a run can hang off.
    pub fn barrier() -> Self {
        let options = TaskOptions {
            walltime: Some("00:00:10".to_owned()),
            mem: Some("10M".to_owned()),
            hold: Some(true),
            ..Default::default()
        };
        Self::new("holding", "", options)
    }

    /// A job that already exists in the scheduler (e.g. from a previous run).
    /// It is always considered submitted.
    pub fn external(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            name: job_id.clone(),
            job_id: Some(job_id),
            state: TaskState::Submitted,
            external: true,
            ..Default::default()
        }
    }

    /// True if there is nothing to submit: no command and no hold marker.
    /// Skipped tasks are satisfied as soon as the scheduler sees them.
    pub fn is_skip(&self) -> bool {
        !self.external && self.command.trim().is_empty() && !self.options.is_hold()
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// True once the task is skipped or submitted.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state != TaskState::Pending
    }

    /// `basename.name`, or just `name` when there is no basename.
    pub fn fullname(&self) -> String {
        if self.basename.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.basename, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_iff_empty_command_without_hold() {
        assert!(Task::new("a", "", TaskOptions::default()).is_skip());
        assert!(Task::new("a", "  \n", TaskOptions::default()).is_skip());
        assert!(!Task::new("a", "true", TaskOptions::default()).is_skip());
        assert!(!Task::barrier().is_skip());
        assert!(!Task::external("1234").is_skip());
    }

    #[test]
    fn test_external_is_submitted() {
        let t = Task::external("1234");
        assert!(t.is_done());
        assert!(t.is_external());
        assert_eq!(t.job_id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_fullname() {
        let mut t = Task::new("gzip", "gzip x", TaskOptions::default());
        assert_eq!(t.fullname(), "gzip");
        t.basename = "P.s1".to_owned();
        assert_eq!(t.fullname(), "P.s1.gzip");
    }
}
