use util::IdVec;

use crate::{Task, TaskId};

/// Owns every task of one pipeline run.
///
/// Tasks are stored in insertion order, which is also submission priority.
/// The `generation` identifies the run, so that output handles minted by a
/// previous run can be told apart from current ones.
#[derive(Debug, Default)]
pub struct TaskGraph {
    generation: u64,
    tasks: IdVec<TaskId, Task>,
}

impl TaskGraph {
    /// Create an empty graph for run `generation`.
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            tasks: IdVec::with_capacity(32),
        }
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Add `task`, wiring up child edges for each of its dependencies.
    /// Dependencies on skip tasks and duplicate dependencies are dropped.
    pub fn add(&mut self, mut task: Task) -> TaskId {
        let deps = std::mem::take(&mut task.depends_on);
        let id = self.tasks.push(task);
        for dep in deps {
            self.add_dependency(id, dep);
        }
        id
    }

    /// Record that `task` depends on `on`.
    /// Returns false (and adds nothing) if `on` is a skip task or the edge already exists.
    pub fn add_dependency(&mut self, task: TaskId, on: TaskId) -> bool {
        if task == on || self.get(on).is_skip() || self.get(task).depends_on.contains(&on) {
            return false;
        }
        self.tasks.get_mut(task).depends_on.push(on);
        self.tasks.get_mut(on).children.push(task);
        true
    }

    #[inline]
    pub fn get(&self, id: TaskId) -> &Task {
        self.tasks.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: TaskId) -> &mut Task {
        self.tasks.get_mut(id)
    }

    #[inline]
    pub fn try_get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.try_get(id)
    }

    /// Iterate over (id, task) in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task)> + '_ {
        self.tasks.iter_ids()
    }

    /// True if every non-skip dependency of `id` has been skipped or submitted.
    pub fn is_ready(&self, id: TaskId) -> bool {
        self.get(id)
            .depends_on
            .iter()
            .map(|dep| self.get(*dep))
            .all(|dep| dep.is_skip() || dep.is_done())
    }

    /// Scheduler job ids of the non-skip dependencies of `id`, in dependency order.
    pub fn dependency_job_ids(&self, id: TaskId) -> Vec<String> {
        self.get(id)
            .depends_on
            .iter()
            .filter_map(|dep| self.get(*dep).job_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskOptions, TaskState};

    fn task(name: &str, cmd: &str) -> Task {
        Task::new(name, cmd, TaskOptions::default())
    }

    #[test]
    fn test_add_wires_children() {
        let mut g = TaskGraph::new(0);
        let a = g.add(task("a", "echo a"));
        let mut b = task("b", "echo b");
        b.depends_on = vec![a, a];
        let b = g.add(b);

        assert_eq!(g.get(b).depends_on, vec![a]);
        assert_eq!(g.get(a).children, vec![b]);
    }

    #[test]
    fn test_dependency_on_skip_task_is_noop() {
        let mut g = TaskGraph::new(0);
        let skip = g.add(task("skip", ""));
        let b = g.add(task("b", "echo b"));

        assert!(!g.add_dependency(b, skip));
        assert!(g.get(b).depends_on.is_empty());
        assert!(g.get(skip).children.is_empty());
    }

    #[test]
    fn test_is_ready_and_job_ids() {
        let mut g = TaskGraph::new(0);
        let a = g.add(task("a", "echo a"));
        let ext = g.add(Task::external("999"));
        let b = g.add(task("b", "echo b"));
        g.add_dependency(b, a);
        g.add_dependency(b, ext);

        assert!(!g.is_ready(b));

        let t = g.get_mut(a);
        t.job_id = Some("1".to_owned());
        t.state = TaskState::Submitted;

        assert!(g.is_ready(b));
        assert_eq!(g.dependency_job_ids(b), vec!["1", "999"]);
    }
}
