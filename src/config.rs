use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the per-user config file, looked for in `$HOME`.
pub const USER_CONFIG: &str = ".qtaskrc";
/// Environment variables with this prefix override config file values.
pub const ENV_PREFIX: &str = "QTASK_";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown runner: \"{0}\" (valid: sge, pbs, bash)")]
    UnknownRunner(String),
    #[error("Invalid config line {1} in {0:?}: \"{2}\"")]
    InvalidLine(PathBuf, usize, String),
    #[error("Invalid value for config key \"{0}\": \"{1}\"")]
    InvalidValue(String, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single config value, coerced from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// `t`/`true`/`y` and `f`/`false`/`n` (any case) become bools,
    /// integer literals become ints, and anything else stays a string.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.to_ascii_uppercase().as_str() {
            "T" | "TRUE" | "Y" => return ConfigValue::Bool(true),
            "F" | "FALSE" | "N" => return ConfigValue::Bool(false),
            _ => (),
        }
        match text.parse::<i64>() {
            Ok(i) => ConfigValue::Int(i),
            Err(_) => ConfigValue::Str(text.to_owned()),
        }
    }

    /// Truthiness: non-zero ints and non-empty strings are true.
    pub fn as_bool(&self) -> bool {
        match self {
            ConfigValue::Bool(b) => *b,
            ConfigValue::Int(i) => *i != 0,
            ConfigValue::Str(s) => !s.is_empty(),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::parse(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Int(i)
    }
}

/// Resolved configuration: case-insensitive keys, later sources override earlier ones.
#[derive(Debug, Clone)]
pub struct Config {
    values: BTreeMap<String, ConfigValue>,
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            values: BTreeMap::new(),
        };
        config.set("runner", "sge");
        config.set("holding", true);
        config.set("monitor.bin", "qtask-mon");
        config
    }
}

impl Config {
    /// Built-in defaults, then `~/.qtaskrc`, then `QTASK_*` environment variables.
    pub fn load() -> Result<Self, Error> {
        Self::load_with(None)
    }

    /// Like [`Config::load`], with an extra config file read after the user one.
    pub fn load_with(extra: Option<&Path>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(home) = std::env::var_os("HOME") {
            config.load_file(&Path::new(&home).join(USER_CONFIG))?;
        }
        if let Some(path) = extra {
            config.load_file(path)?;
        }
        config.load_env();
        Ok(config)
    }

    /// Read `key=value` lines from `path`; a line with just `key` sets it to true.
    /// A missing file is not an error.
    pub fn load_file(&mut self, path: &Path) -> Result<(), Error> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        log::debug!("reading config from {}", path.display());
        self.load_str(&text)
            .map_err(|(lineno, line)| Error::InvalidLine(path.to_owned(), lineno, line))
    }

    fn load_str(&mut self, text: &str) -> Result<(), (usize, String)> {
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => self.set(k.trim(), ConfigValue::parse(v)),
                Some(_) => return Err((i + 1, line.to_owned())),
                None => self.set(line, true),
            }
        }
        Ok(())
    }

    /// Apply `QTASK_*` variables from the process environment.
    pub fn load_env(&mut self) {
        self.load_vars(std::env::vars());
    }

    /// Apply `QTASK_*` variables: the prefix is stripped, `_` becomes `.`
    /// and the key is lowercased, so `QTASK_RUNNER_ACCOUNT` sets `runner.account`.
    pub fn load_vars<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in vars {
            if let Some(key) = k.strip_prefix(ENV_PREFIX) {
                if !key.is_empty() {
                    self.set(&key.replace('_', "."), ConfigValue::parse(&v));
                }
            }
        }
    }

    pub fn set(&mut self, key: &str, val: impl Into<ConfigValue>) {
        self.values.insert(key.to_lowercase(), val.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(&key.to_lowercase())
    }

    /// The value for `key` as text, if it is set.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).map(ConfigValue::as_bool).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(i)) => Ok(Some(*i as f64)),
            Some(v) => {
                let s = v.to_string();
                s.parse()
                    .map(Some)
                    .map_err(|_| Error::InvalidValue(key.to_owned(), s))
            }
        }
    }

    /// All entries whose key starts with `prefix`, with the prefix removed.
    pub fn with_prefix(&self, prefix: &str) -> Config {
        let prefix = prefix.to_lowercase();
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_owned(), v.clone()))
            })
            .collect();
        Config { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_coercion() {
        assert_eq!(ConfigValue::parse("T"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::parse("yes"), ConfigValue::Str("yes".into()));
        assert_eq!(ConfigValue::parse(" n "), ConfigValue::Bool(false));
        assert_eq!(ConfigValue::parse("-12"), ConfigValue::Int(-12));
        assert_eq!(ConfigValue::parse("1.5"), ConfigValue::Str("1.5".into()));
    }

    #[test]
    fn test_precedence() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("qtaskrc");
        std::fs::write(
            &path,
            "# comment\nRunner=pbs\nrunner.account=lab\nholding=false\nverbose\n",
        )?;

        let mut config = Config::default();
        assert_eq!(config.get_str("runner").as_deref(), Some("sge"));
        assert!(config.get_bool("holding", false));

        config.load_file(&path)?;
        assert_eq!(config.get_str("runner").as_deref(), Some("pbs"));
        assert!(!config.get_bool("holding", true));
        assert_eq!(config.get("verbose"), Some(&ConfigValue::Bool(true)));

        config.load_vars(vec![
            ("QTASK_RUNNER".to_owned(), "bash".to_owned()),
            ("QTASK_RUNNER_ACCOUNT".to_owned(), "other".to_owned()),
            ("QTASK_RUNNER_MULTIPLIER".to_owned(), "2".to_owned()),
            ("HOME".to_owned(), "/nowhere".to_owned()),
        ]);
        assert_eq!(config.get_str("RUNNER").as_deref(), Some("bash"));

        let runner = config.with_prefix("runner.");
        assert_eq!(runner.get_str("account").as_deref(), Some("other"));
        assert_eq!(runner.get_f64("multiplier")?, Some(2.0));
        assert!(runner.get("runner").is_none());
        Ok(())
    }

    #[test]
    fn test_missing_file_and_bad_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = Config::default();
        config.load_file(&dir.path().join("absent"))?;

        let path = dir.path().join("bad");
        std::fs::write(&path, "runner=sge\n=oops\n")?;
        let err = config.load_file(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidLine(_, 2, _)));
        Ok(())
    }
}
