/// Handle to a task within one [`crate::TaskGraph`].
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u32);

impl From<TaskId> for usize {
    fn from(id: TaskId) -> usize {
        id.0 as usize
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> TaskId {
        Self(val as u32)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
