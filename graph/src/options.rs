use std::collections::BTreeMap;
use std::fmt;

use crate::BuildError;

/// Every option key with a dedicated field in [`TaskOptions`].
/// Anything else lands in [`TaskOptions::extra`].
pub const OPTION_KEYS: [&str; 15] = [
    "walltime", "mem", "himem", "hold", "mail", "queue", "qos", "wd", "stdout", "stderr", "procs",
    "ppn", "env", "account", "requires",
];

/// Loosely typed option value, as supplied by callers.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl OptionValue {
    /// False for `false`, zero, and the empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            OptionValue::Str(s) => !s.is_empty(),
            OptionValue::Bool(b) => *b,
            OptionValue::Int(i) => *i != 0,
            OptionValue::Float(f) => *f != 0.0,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Str(s) => f.write_str(s),
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<i32> for OptionValue {
    fn from(i: i32) -> Self {
        OptionValue::Int(i.into())
    }
}

impl From<u32> for OptionValue {
    fn from(i: u32) -> Self {
        OptionValue::Int(i.into())
    }
}

impl From<f64> for OptionValue {
    fn from(x: f64) -> Self {
        OptionValue::Float(x)
    }
}

/// Scheduler resource hints for a single task.
///
/// The well-known keys get typed fields; backend-specific keys are kept
/// verbatim in `extra`. A field left as `None` is "not specified", which is
/// what lets builder defaults fill in without clobbering caller values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions {
    /// Wall clock limit, `H:MM:SS`, `MM:SS` or plain seconds.
    pub walltime: Option<String>,
    pub mem: Option<String>,
    pub himem: Option<String>,
    /// Submit in a held state; also marks an empty-command task as a barrier.
    pub hold: Option<bool>,
    pub mail: Option<String>,
    pub queue: Option<String>,
    pub qos: Option<String>,
    /// Working directory.
    pub wd: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub procs: Option<u32>,
    pub ppn: Option<u32>,
    /// Inherit the caller's environment.
    pub env: Option<bool>,
    pub account: Option<String>,
    /// Comma-separated programs that must exist before the task is accepted.
    pub requires: Option<String>,
    pub extra: BTreeMap<String, OptionValue>,
}

impl TaskOptions {
    /// Set option `key` from a loosely typed value.
    #[rustfmt::skip]
    pub fn set(&mut self, key: &str, val: OptionValue) -> Result<(), BuildError> {
        let key = key.to_lowercase();
        match key.as_str() {
            "walltime" => self.walltime = Some(walltime_value(&key, val)?),
            "mem"      => self.mem      = Some(val.to_string()),
            "himem"    => self.himem    = Some(val.to_string()),
            "hold"     => self.hold     = Some(val.is_truthy()),
            "mail"     => self.mail     = Some(val.to_string()),
            "queue"    => self.queue    = Some(val.to_string()),
            "qos"      => self.qos      = Some(val.to_string()),
            "wd"       => self.wd       = Some(val.to_string()),
            "stdout"   => self.stdout   = Some(val.to_string()),
            "stderr"   => self.stderr   = Some(val.to_string()),
            "procs"    => self.procs    = Some(count_value(&key, val)?),
            "ppn"      => self.ppn      = Some(count_value(&key, val)?),
            "env"      => self.env      = Some(val.is_truthy()),
            "account"  => self.account  = Some(val.to_string()),
            "requires" => self.requires = Some(val.to_string()),
            _ => {
                self.extra.insert(key, val);
            }
        }
        Ok(())
    }

    /// Get option `key`, if it is set.
    pub fn get(&self, key: &str) -> Option<OptionValue> {
        let key = key.to_lowercase();
        let s = |v: &Option<String>| v.clone().map(OptionValue::Str);
        let n = |v: &Option<u32>| v.map(OptionValue::from);
        let b = |v: &Option<bool>| v.map(OptionValue::Bool);
        match key.as_str() {
            "walltime" => s(&self.walltime),
            "mem" => s(&self.mem),
            "himem" => s(&self.himem),
            "hold" => b(&self.hold),
            "mail" => s(&self.mail),
            "queue" => s(&self.queue),
            "qos" => s(&self.qos),
            "wd" => s(&self.wd),
            "stdout" => s(&self.stdout),
            "stderr" => s(&self.stderr),
            "procs" => n(&self.procs),
            "ppn" => n(&self.ppn),
            "env" => b(&self.env),
            "account" => s(&self.account),
            "requires" => s(&self.requires),
            _ => self.extra.get(&key).cloned(),
        }
    }

    /// Fill in every option from `defaults` that isn't already set here.
    pub fn merge_defaults(&mut self, defaults: &TaskOptions) {
        for key in OPTION_KEYS {
            if self.get(key).is_none() {
                if let Some(val) = defaults.get(key) {
                    // values came out of a TaskOptions, so they are already valid:
                    let _ = self.set(key, val);
                }
            }
        }
        for (k, v) in &defaults.extra {
            self.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// True if the task should be submitted in a held state.
    #[inline]
    pub fn is_hold(&self) -> bool {
        self.hold.unwrap_or(false)
    }

    /// True if the task should inherit the submitting environment.
    #[inline]
    pub fn is_env(&self) -> bool {
        self.env.unwrap_or(false)
    }

    /// Processor count, from `procs` or else `ppn`.
    #[inline]
    pub fn procs(&self) -> Option<u32> {
        self.procs.or(self.ppn)
    }

    /// Memory budget, from `mem` or else `himem`.
    #[inline]
    pub fn memory(&self) -> Option<&str> {
        self.mem.as_deref().or(self.himem.as_deref())
    }

    /// Programs listed in `requires`.
    pub fn required_programs(&self) -> impl Iterator<Item = &str> {
        self.requires
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// All truthy options as (key, value) strings, well-known keys first.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::with_capacity(OPTION_KEYS.len() + self.extra.len());
        for key in OPTION_KEYS {
            if let Some(val) = self.get(key) {
                if val.is_truthy() {
                    entries.push((key.to_owned(), val.to_string()));
                }
            }
        }
        for (k, v) in &self.extra {
            if v.is_truthy() {
                entries.push((k.clone(), v.to_string()));
            }
        }
        entries
    }
}

fn walltime_value(key: &str, val: OptionValue) -> Result<String, BuildError> {
    match val {
        OptionValue::Str(s) if valid_walltime(&s) => Ok(s),
        OptionValue::Int(i) if i >= 0 => Ok(i.to_string()),
        other => Err(BuildError::InvalidOption(key.to_owned(), other.to_string())),
    }
}

fn valid_walltime(s: &str) -> bool {
    let cols: Vec<&str> = s.split(':').collect();
    cols.len() <= 3 && cols.iter().all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()))
}

fn count_value(key: &str, val: OptionValue) -> Result<u32, BuildError> {
    let invalid = |v: &OptionValue| BuildError::InvalidOption(key.to_owned(), v.to_string());
    match &val {
        OptionValue::Int(i) => u32::try_from(*i).map_err(|_| invalid(&val)),
        OptionValue::Str(s) => s.trim().parse().map_err(|_| invalid(&val)),
        _ => Err(invalid(&val)),
    }
}
