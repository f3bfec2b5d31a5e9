use crate::{BuildError, OutputHandle, Outputs, TaskGraph, TaskId};

/// One argument to a task computation, before output handles are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(String),
    Handle(OutputHandle),
    List(Vec<Arg>),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Value(s.to_owned())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Value(s)
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Arg::Value(i.to_string())
    }
}

impl From<OutputHandle> for Arg {
    fn from(h: OutputHandle) -> Self {
        Arg::Handle(h)
    }
}

impl From<&OutputHandle> for Arg {
    fn from(h: &OutputHandle) -> Self {
        Arg::Handle(h.clone())
    }
}

/// Single outputs become a handle; lists, tuples and maps become a list
/// of handles. Maps are flattened in key order and their keys are dropped,
/// so pass `Outputs::key` entries instead when a computation needs to know
/// which path is which.
impl From<&Outputs> for Arg {
    fn from(out: &Outputs) -> Self {
        match out {
            Outputs::Single(h) => Arg::Handle(h.clone()),
            _ => Arg::List(out.handles().into_iter().map(Arg::from).collect()),
        }
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(v: Vec<T>) -> Self {
        Arg::List(v.into_iter().map(Into::into).collect())
    }
}

/// Positional and keyword arguments for [`crate::TaskDef::invoke`].
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub(crate) positional: Vec<Arg>,
    pub(crate) keyword: Vec<(String, Arg)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.positional.push(arg.into());
        self
    }

    /// Add a keyword argument. A later value for the same key wins.
    pub fn kwarg(mut self, key: impl Into<String>, arg: impl Into<Arg>) -> Self {
        let key = key.into();
        self.keyword.retain(|(k, _)| *k != key);
        self.keyword.push((key, arg.into()));
        self
    }
}

/// An argument with every output handle replaced by its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Value(String),
    List(Vec<Resolved>),
}

impl Resolved {
    /// Substitute handles in `arg` with their paths, collecting producers into `producers`.
    pub(crate) fn resolve(
        arg: Arg,
        graph: &TaskGraph,
        producers: &mut Vec<TaskId>,
    ) -> Result<Self, BuildError> {
        match arg {
            Arg::Value(s) => Ok(Resolved::Value(s)),
            Arg::Handle(h) => {
                if h.generation() != graph.generation() || graph.try_get(h.producer()).is_none() {
                    return Err(BuildError::StaleHandle(h.path().to_owned()));
                }
                if !producers.contains(&h.producer()) {
                    producers.push(h.producer());
                }
                Ok(Resolved::Value(h.path().to_owned()))
            }
            Arg::List(args) => args
                .into_iter()
                .map(|a| Self::resolve(a, graph, producers))
                .collect::<Result<_, _>>()
                .map(Resolved::List),
        }
    }

    fn as_value(&self, label: &str) -> Result<&str, BuildError> {
        match self {
            Resolved::Value(s) => Ok(s),
            Resolved::List(_) => Err(BuildError::ExpectedValue(label.to_owned())),
        }
    }

    fn as_list(&self, label: &str) -> Result<Vec<&str>, BuildError> {
        match self {
            Resolved::List(items) => items.iter().map(|r| r.as_value(label)).collect(),
            Resolved::Value(_) => Err(BuildError::ExpectedList(label.to_owned())),
        }
    }
}

/// What a task computation gets to see: resolved arguments,
/// plus whether any of its dependencies will actually run.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub(crate) args: Vec<Resolved>,
    pub(crate) kwargs: Vec<(String, Resolved)>,
    pub(crate) force: bool,
}

impl Invocation {
    /// True if at least one direct dependency is not a skip task,
    /// i.e. inputs are about to be regenerated.
    #[inline]
    pub fn force(&self) -> bool {
        self.force
    }

    #[inline]
    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    /// Positional argument `i` as a single value.
    pub fn arg(&self, i: usize) -> Result<&str, BuildError> {
        self.resolved(i)?.as_value(&i.to_string())
    }

    /// Positional argument `i` as a list of values.
    pub fn list(&self, i: usize) -> Result<Vec<&str>, BuildError> {
        self.resolved(i)?.as_list(&i.to_string())
    }

    /// Positional argument `i` in whatever shape it was passed.
    pub fn resolved(&self, i: usize) -> Result<&Resolved, BuildError> {
        self.args
            .get(i)
            .ok_or_else(|| BuildError::MissingArgument(i.to_string()))
    }

    /// Keyword argument `key` as a single value.
    pub fn kwarg(&self, key: &str) -> Result<&str, BuildError> {
        self.opt_kwarg(key)?
            .ok_or_else(|| BuildError::MissingArgument(key.to_owned()))
    }

    /// Keyword argument `key` as a single value, if it was passed.
    pub fn opt_kwarg(&self, key: &str) -> Result<Option<&str>, BuildError> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_value(key))
            .transpose()
    }

    /// Keyword argument `key` as a list of values.
    pub fn kwarg_list(&self, key: &str) -> Result<Vec<&str>, BuildError> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == key)
            .ok_or_else(|| BuildError::MissingArgument(key.to_owned()))?
            .1
            .as_list(key)
    }
}
