/// Where a job script reports back to, when a monitor is set.
#[derive(Debug, Clone, Copy)]
pub struct Callback<'a> {
    /// Path or name of the `qtask-mon` program.
    pub bin: &'a str,
    /// Monitor URI.
    pub uri: &'a str,
}

/// Utility for building the contents of a job script.
/// Note that it modifies a String reference held internally;
/// read that String to get the script's contents.
#[derive(Debug)]
pub struct ScriptBuilder<'a> {
    strbuf: &'a mut String,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(strbuf: &'a mut String) -> Self {
        Self { strbuf }
    }
}

impl ScriptBuilder<'_> {
    /// shebang line
    pub fn write_prefix(&mut self) {
        self.strbuf.clear();
        self.strbuf.push_str("#!/bin/bash\n");
    }

    /// a scheduler directive, e.g. `#$ -N name`
    pub fn write_directive(&mut self, prefix: &str, flag: &str, val: &str) {
        self.strbuf.push_str(prefix);
        self.strbuf.push(' ');
        self.strbuf.push_str(flag);
        if !val.is_empty() {
            self.strbuf.push(' ');
            self.strbuf.push_str(val);
        }
        self.strbuf.push('\n');
    }

    /// any line of shell, indented
    pub fn write_line(&mut self, indent: &str, line: &str) {
        self.strbuf.push_str(indent);
        self.strbuf.push_str(line);
        self.strbuf.push('\n');
    }

    /// wrap the job's command in a function, so its return code can be captured
    pub fn write_func(&mut self, name: &str, command: &str) {
        let command = command.trim_end();
        self.strbuf.push_str(name);
        self.strbuf.push_str(" () {\n  ");
        // held barrier jobs have no command of their own:
        self.strbuf.push_str(if command.trim().is_empty() { "true" } else { command });
        self.strbuf.push_str("\n  return $?\n}\n");
    }

    /// a call back to the monitor program
    pub fn write_callback(&mut self, indent: &str, cb: &Callback<'_>, args: &[&str]) {
        self.strbuf.push_str(indent);
        self.strbuf.push('"');
        self.strbuf.push_str(cb.bin);
        self.strbuf.push_str("\" \"");
        self.strbuf.push_str(cb.uri);
        self.strbuf.push('"');
        for arg in args {
            self.strbuf.push(' ');
            self.strbuf.push_str(arg);
        }
        self.strbuf.push('\n');
    }

    /// run `func` with its output captured under `tmpdir`, then save its return code
    pub fn write_captured_run(&mut self, func: &str, job: &str, tmpdir: &str) {
        self.strbuf.push_str(&format!(
            "{func} 2>\"{}\" >\"{}\"\nRETVAL=$?\n",
            capture_path(tmpdir, job, "stderr"),
            capture_path(tmpdir, job, "stdout"),
        ));
    }

    /// tell the monitor the job has stopped, handing it the captured output
    pub fn write_stop(&mut self, indent: &str, cb: &Callback<'_>, job: &str, tmpdir: &str) {
        let out = format!("\"{}\"", capture_path(tmpdir, job, "stdout"));
        let err = format!("\"{}\"", capture_path(tmpdir, job, "stderr"));
        self.write_callback(indent, cb, &["stop", job, "$RETVAL", &out, &err]);
    }

    /// move captured output to where the task asked for it, or remove it
    pub fn write_keep_output(
        &mut self,
        indent: &str,
        job: &str,
        tmpdir: &str,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) {
        for (kind, target) in [("stdout", stdout), ("stderr", stderr)] {
            let capture = capture_path(tmpdir, job, kind);
            let line = match target {
                Some(target) => format!("mv \"{capture}\" \"{target}\""),
                None => format!("rm \"{capture}\""),
            };
            self.write_line(indent, &line);
        }
    }
}

fn capture_path(tmpdir: &str, job: &str, kind: &str) -> String {
    format!("{tmpdir}/{job}.qtask.{kind}")
}
