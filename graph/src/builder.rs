use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::{
    Args, BuildError, Declared, Error, Invocation, OptionValue, Outputs, Resolved, Task, TaskGraph,
    TaskId, TaskOptions,
};

/// Whatever owns the tasks of a run (in practice, the pipeline).
/// [`TaskDef::invoke`] registers the tasks it builds through this trait.
pub trait Registry {
    /// The graph that output handles are resolved against.
    fn graph(&self) -> &TaskGraph;

    /// Accept a fully built task and return its id.
    fn register(&mut self, task: Task) -> TaskId;

    /// Fail with [`Error::MissingProgram`] unless `program` can be run.
    fn require(&mut self, program: &str) -> Result<(), Error>;
}

/// What a task computation returns: a command, plus optional
/// name, resource options and declared outputs.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub command: String,
    pub name: Option<String>,
    pub outputs: Declared,
    options: Vec<(String, OptionValue)>,
}

impl TaskResult {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// A result with no command; the task will be skipped.
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a resource option. Values are validated when the task is built.
    pub fn option(mut self, key: impl Into<String>, val: impl Into<OptionValue>) -> Self {
        self.options.push((key.into(), val.into()));
        self
    }

    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.outputs = Declared::Path(path.into());
        self
    }

    pub fn output_list<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Declared::List(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn output_tuple<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Declared::Tuple(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn output_map<I, K, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<String>,
    {
        let map: BTreeMap<String, String> = paths
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.outputs = Declared::Map(map);
        self
    }
}

impl From<&str> for TaskResult {
    fn from(command: &str) -> Self {
        TaskResult::new(command)
    }
}

impl From<String> for TaskResult {
    fn from(command: String) -> Self {
        TaskResult::new(command)
    }
}

type Computation = dyn Fn(&Invocation) -> Result<TaskResult>;

/// A reusable task definition: a computation that decides a command,
/// bound to a name and default resource options.
pub struct TaskDef {
    name: String,
    defaults: TaskOptions,
    compute: Box<Computation>,
}

impl std::fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl TaskDef {
    /// Create a new `TaskDef` named `name`.
    pub fn new<F, R>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Invocation) -> Result<R> + 'static,
        R: Into<TaskResult>,
    {
        Self {
            name: name.into(),
            defaults: TaskOptions::default(),
            compute: Box::new(move |inv| compute(inv).map(Into::into)),
        }
    }

    /// Add a default option, used when the computation doesn't set `key` itself.
    pub fn with_option(
        mut self,
        key: &str,
        val: impl Into<OptionValue>,
    ) -> Result<Self, BuildError> {
        self.defaults.set(key, val.into())?;
        Ok(self)
    }

    /// Replace all default options.
    pub fn with_options(mut self, defaults: TaskOptions) -> Self {
        self.defaults = defaults;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a task from `args` and register it with `reg`.
    ///
    /// Output handles in `args` are replaced by their paths and their producers
    /// become dependencies. Returns handles for the task's declared outputs;
    /// a skip task still gets handles, so chaining code doesn't need to care.
    pub fn invoke<R: Registry + ?Sized>(&self, reg: &mut R, args: Args) -> Result<Outputs> {
        let graph = reg.graph();
        let generation = graph.generation();

        let mut producers = Vec::with_capacity(args.positional.len());
        let mut name_override = None;
        let mut inv = Invocation {
            args: Vec::with_capacity(args.positional.len()),
            kwargs: Vec::with_capacity(args.keyword.len()),
            force: false,
        };
        for arg in args.positional {
            inv.args.push(Resolved::resolve(arg, graph, &mut producers)?);
        }
        for (k, arg) in args.keyword {
            let val = Resolved::resolve(arg, graph, &mut producers)?;
            if k == "name" {
                match val {
                    Resolved::Value(s) => name_override = Some(s),
                    Resolved::List(_) => return Err(BuildError::InvalidName.into()),
                }
            } else {
                inv.kwargs.push((k, val));
            }
        }
        inv.force = producers.iter().any(|p| !graph.get(*p).is_skip());

        let result = (self.compute)(&inv)
            .with_context(|| format!("while building task \"{}\"", self.name))?;

        let mut options = TaskOptions::default();
        for (k, v) in result.options {
            options.set(&k, v)?;
        }
        options.merge_defaults(&self.defaults);

        let name = name_override
            .or(result.name)
            .unwrap_or_else(|| self.name.clone());

        for program in options.required_programs() {
            reg.require(program)
                .with_context(|| format!("while checking requirements of task \"{name}\""))?;
        }

        let mut task = Task::new(name, result.command, options);
        task.depends_on = producers;
        if task.is_skip() {
            log::debug!("new task {} (skip)", task.name);
        } else {
            log::debug!("new task {}: {}", task.name, task.command);
        }

        let id = reg.register(task);
        Ok(Outputs::wrap(result.outputs, id, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutputHandle;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Minimal registry: just the graph, and a list of programs that "exist".
    struct TestRegistry {
        graph: TaskGraph,
        programs: Vec<&'static str>,
    }

    impl TestRegistry {
        fn new() -> Self {
            Self {
                graph: TaskGraph::new(1),
                programs: vec!["gzip"],
            }
        }
    }

    impl Registry for TestRegistry {
        fn graph(&self) -> &TaskGraph {
            &self.graph
        }

        fn register(&mut self, task: Task) -> TaskId {
            self.graph.add(task)
        }

        fn require(&mut self, program: &str) -> Result<(), Error> {
            if self.programs.contains(&program) {
                Ok(())
            } else {
                Err(Error::MissingProgram(program.to_owned()))
            }
        }
    }

    fn gzip() -> TaskDef {
        TaskDef::new("gzip", |inv: &Invocation| {
            let f = inv.arg(0)?;
            Ok(TaskResult::new(format!("gzip {f}")).output(format!("{f}.gz")))
        })
    }

    #[test]
    fn test_chaining_adds_dependency() -> Result<()> {
        let mut reg = TestRegistry::new();
        let md5 = TaskDef::new("md5", |inv: &Invocation| {
            Ok(format!("md5sum {}", inv.arg(0)?))
        });

        let gz = gzip().invoke(&mut reg, Args::new().arg("in.txt"))?;
        let gz = gz.single().unwrap();
        assert_eq!(gz.path(), "in.txt.gz");

        let sum = md5.invoke(&mut reg, Args::new().arg(gz))?;
        let sum_task = reg.graph.get(sum.single().unwrap().producer());
        assert_eq!(sum_task.command, "md5sum in.txt.gz");
        assert_eq!(sum_task.depends_on, vec![gz.producer()]);
        assert_eq!(sum_task.name, "md5");
        Ok(())
    }

    #[test]
    fn test_force_only_with_non_skip_dependency() -> Result<()> {
        let mut reg = TestRegistry::new();
        let seen = Rc::new(Cell::new(None));
        let seen2 = seen.clone();
        let consumer = TaskDef::new("consumer", move |inv: &Invocation| {
            seen2.set(Some(inv.force()));
            Ok(format!("cat {}", inv.arg(0)?))
        });
        let skipper = TaskDef::new("exists", |inv: &Invocation| {
            Ok(TaskResult::skip().output(inv.arg(0)?))
        });

        let existing = skipper.invoke(&mut reg, Args::new().arg("done.txt"))?;
        let out = consumer.invoke(&mut reg, Args::new().arg(&existing))?;
        assert_eq!(seen.get(), Some(false));
        let task = reg.graph.get(out.single().unwrap().producer());
        assert!(task.depends_on.is_empty(), "no edge to a skip task");

        let gz = gzip().invoke(&mut reg, Args::new().arg("x"))?;
        consumer.invoke(&mut reg, Args::new().arg(&gz))?;
        assert_eq!(seen.get(), Some(true));
        Ok(())
    }

    #[test]
    fn test_skip_task_still_returns_handle() -> Result<()> {
        let mut reg = TestRegistry::new();
        let none = TaskDef::new("nothing", |_: &Invocation| Ok(TaskResult::skip()));
        let out = none.invoke(&mut reg, Args::new())?;
        let h = out.single().unwrap();
        assert_eq!(h.path(), "");
        assert!(reg.graph.get(h.producer()).is_skip());
        Ok(())
    }

    #[test]
    fn test_output_shapes() -> Result<()> {
        let mut reg = TestRegistry::new();
        let split = TaskDef::new("split", |inv: &Invocation| {
            let f = inv.arg(0)?;
            Ok(TaskResult::new(format!("split {f}"))
                .output_list([format!("{f}.1"), format!("{f}.2"), format!("{f}.3")]))
        });
        let align = TaskDef::new("align", |_: &Invocation| {
            Ok(TaskResult::new("align").output_map([("bam", "x.bam"), ("bai", "x.bai")]))
        });
        let pair = TaskDef::new("pair", |_: &Invocation| {
            Ok(TaskResult::new("pair").output_tuple(["r1.fq", "r2.fq"]))
        });

        let parts = split.invoke(&mut reg, Args::new().arg("f"))?;
        assert!(matches!(&parts, Outputs::List(v) if v.len() == 3));

        let bam = align.invoke(&mut reg, Args::new())?;
        let keys: Vec<&String> = match &bam {
            Outputs::Map(m) => m.keys().collect(),
            _ => panic!("expected a map"),
        };
        assert_eq!(keys, vec!["bai", "bam"]);

        let reads = pair.invoke(&mut reg, Args::new())?;
        assert!(matches!(&reads, Outputs::Tuple(v) if v.len() == 2));

        // a list of handles is resolved element-wise, keeping its shape:
        let cat = TaskDef::new("cat", |inv: &Invocation| {
            Ok(format!("cat {}", inv.list(0)?.join(" ")))
        });
        let out = cat.invoke(&mut reg, Args::new().arg(&parts))?;
        let task = reg.graph.get(out.single().unwrap().producer());
        assert_eq!(task.command, "cat f.1 f.2 f.3");
        assert_eq!(task.depends_on.len(), 1);
        Ok(())
    }

    #[test]
    fn test_defaults_and_name_override() -> Result<()> {
        let mut reg = TestRegistry::new();
        let def = TaskDef::new("sort", |_: &Invocation| {
            Ok(TaskResult::new("sort x").option("mem", "8G"))
        })
        .with_option("mem", "1G")?
        .with_option("walltime", "1:00:00")?;

        let out = def.invoke(&mut reg, Args::new().kwarg("name", "sort_sample1"))?;
        let task = reg.graph.get(out.single().unwrap().producer());
        assert_eq!(task.name, "sort_sample1");
        assert_eq!(task.options.mem.as_deref(), Some("8G"));
        assert_eq!(task.options.walltime.as_deref(), Some("1:00:00"));
        Ok(())
    }

    #[test]
    fn test_missing_program_registers_nothing() {
        let mut reg = TestRegistry::new();
        let def = TaskDef::new("needs", |_: &Invocation| {
            Ok(TaskResult::new("nonexistent_prog_xyz").option("requires", "gzip,nonexistent_prog_xyz"))
        });
        let err = def.invoke(&mut reg, Args::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingProgram(p)) if p == "nonexistent_prog_xyz"
        ));
        assert!(reg.graph.is_empty());
    }

    #[test]
    fn test_bad_option_is_build_error() {
        let mut reg = TestRegistry::new();
        let def = TaskDef::new("bad", |_: &Invocation| {
            Ok(TaskResult::new("x").option("procs", "lots"))
        });
        let err = def.invoke(&mut reg, Args::new()).unwrap_err();
        assert!(err.downcast_ref::<BuildError>().is_some());
    }

    #[test]
    fn test_handle_from_other_graph_is_rejected() {
        let mut reg = TestRegistry::new();
        let foreign = OutputHandle::new("old".into(), TaskId::from(0), 99);
        let err = gzip()
            .invoke(&mut reg, Args::new().arg(foreign))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BuildError>(),
            Some(&BuildError::StaleHandle("old".into()))
        );
    }
}
