use std::collections::BTreeMap;

use crate::TaskId;

/// Placeholder for an output path that a task has declared it will write.
///
/// Handles are deliberately not strings: the path has to be unwrapped with
/// [`OutputHandle::path`], and passing the handle to another task records a
/// dependency on its producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputHandle {
    path: String,
    producer: TaskId,
    generation: u64,
}

impl OutputHandle {
    pub(crate) fn new(path: String, producer: TaskId, generation: u64) -> Self {
        Self {
            path,
            producer,
            generation,
        }
    }

    /// The declared output path (empty for tasks that declared no outputs).
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The task that writes this output.
    #[inline]
    pub fn producer(&self) -> TaskId {
        self.producer
    }

    /// The pipeline run this handle belongs to.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Output paths declared by a task computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Declared {
    #[default]
    None,
    Path(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
    /// Fixed arity; unlike `List`, the arity is part of the task's contract.
    Tuple(Vec<String>),
}

/// Output handles returned from [`crate::TaskDef::invoke`],
/// in the same shape as the task's [`Declared`] outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outputs {
    Single(OutputHandle),
    List(Vec<OutputHandle>),
    Map(BTreeMap<String, OutputHandle>),
    Tuple(Vec<OutputHandle>),
}

impl Outputs {
    /// Wrap each declared path in a handle bound to `producer`.
    pub(crate) fn wrap(declared: Declared, producer: TaskId, generation: u64) -> Self {
        let h = |path: String| OutputHandle::new(path, producer, generation);
        match declared {
            Declared::None => Outputs::Single(h(String::new())),
            Declared::Path(p) => Outputs::Single(h(p)),
            Declared::List(ps) => Outputs::List(ps.into_iter().map(h).collect()),
            Declared::Map(m) => Outputs::Map(m.into_iter().map(|(k, p)| (k, h(p))).collect()),
            Declared::Tuple(ps) => Outputs::Tuple(ps.into_iter().map(h).collect()),
        }
    }

    /// The handle, if this is a single output.
    pub fn single(&self) -> Option<&OutputHandle> {
        match self {
            Outputs::Single(h) => Some(h),
            _ => None,
        }
    }

    /// Element `i` of a list or tuple output.
    pub fn index(&self, i: usize) -> Option<&OutputHandle> {
        match self {
            Outputs::List(v) | Outputs::Tuple(v) => v.get(i),
            _ => None,
        }
    }

    /// Entry `key` of a mapping output.
    pub fn key(&self, key: &str) -> Option<&OutputHandle> {
        match self {
            Outputs::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// All handles, in declaration order. Map entries come in key order,
    /// without their keys.
    pub fn handles(&self) -> Vec<&OutputHandle> {
        match self {
            Outputs::Single(h) => vec![h],
            Outputs::List(v) | Outputs::Tuple(v) => v.iter().collect(),
            Outputs::Map(m) => m.values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_preserves_shape() {
        let id = TaskId::from(3);
        let map: BTreeMap<String, String> = [("bam", "x.bam"), ("bai", "x.bam.bai")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        let out = Outputs::wrap(Declared::Map(map), id, 1);
        assert_eq!(out.key("bam").map(OutputHandle::path), Some("x.bam"));
        assert_eq!(out.key("bai").map(OutputHandle::producer), Some(id));
        assert_eq!(out.handles().len(), 2);

        let out = Outputs::wrap(Declared::Tuple(vec!["a".into(), "b".into()]), id, 1);
        assert!(matches!(&out, Outputs::Tuple(v) if v.len() == 2));
        assert_eq!(out.index(1).map(OutputHandle::path), Some("b"));

        let out = Outputs::wrap(Declared::None, id, 1);
        assert_eq!(out.single().map(OutputHandle::path), Some(""));
    }
}
