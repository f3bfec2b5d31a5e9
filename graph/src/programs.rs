use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::Error;

/// Registry of programs that tasks may require.
///
/// A program is available if a registered probe script exits 0
/// (its output is kept as the program's version), or, with no probe,
/// if an executable of that name is found on the search path.
/// Successful checks are cached for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct Programs {
    search_path: Option<OsString>,
    found: BTreeSet<String>,
    probes: BTreeMap<String, String>,
    versions: BTreeMap<String, String>,
}

impl Programs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search `path` instead of `$PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Register a shell snippet that prints the version of `program`.
    pub fn register_probe(&mut self, program: impl Into<String>, script: impl Into<String>) {
        let program = program.into();
        self.found.remove(&program);
        self.versions.remove(&program);
        self.probes.insert(program, script.into());
    }

    /// Fail with [`Error::MissingProgram`] unless `program` is available.
    pub fn check(&mut self, program: &str) -> Result<(), Error> {
        if self.found.contains(program) {
            return Ok(());
        }
        let ok = if let Some(script) = self.probes.get(program) {
            match run_probe(script) {
                Some(version) => {
                    self.versions.insert(program.to_owned(), version);
                    true
                }
                None => false,
            }
        } else {
            self.on_path(program)
        };
        if ok {
            log::trace!("found required program {program}");
            self.found.insert(program.to_owned());
            Ok(())
        } else {
            Err(Error::MissingProgram(program.to_owned()))
        }
    }

    /// Version string reported by the probe for `program`, running it if needed.
    /// Returns `Ok(None)` for programs without a probe.
    pub fn version(&mut self, program: &str) -> Result<Option<&str>, Error> {
        if !self.probes.contains_key(program) {
            return Ok(None);
        }
        self.check(program)?;
        Ok(self.versions.get(program).map(String::as_str))
    }

    fn on_path(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        let search = match &self.search_path {
            Some(p) => Some(p.clone()),
            None => std::env::var_os("PATH"),
        };
        match search {
            Some(search) => std::env::split_paths(&search).any(|dir| is_executable(&dir.join(program))),
            None => false,
        }
    }
}

fn run_probe(script: &str) -> Option<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| log::debug!("unable to run probe '{script}': {e}"))
        .ok()?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let text = text.trim();
    if !output.status.success() || text.contains("command not found") {
        None
    } else {
        Some(text.to_owned())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
