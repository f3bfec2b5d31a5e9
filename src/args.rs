use std::path::PathBuf;

use clap::{Parser, Subcommand};

const CMD_NAME: &str = "qtask-mon";
const DEFAULT_TIMEOUT: u64 = 60;

/// Stores our command-line args format.
///
/// Job scripts call back into this program, so the argument order
/// (`<URI> <command> <job> ...`) is part of the script format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = "Record job progress in a qtask monitor")]
pub struct Args {
    /// Monitor URI (file://path or sqlite://path)
    #[arg(value_name = "URI", env = "QTASK_MONITOR")]
    pub uri: String,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Seconds to wait for the monitor's lock
    #[arg(short, long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Cmd {
    /// A job has started running
    Start {
        job: String,
        /// Host the job is running on
        host: Option<String>,
    },
    /// A job has finished; a non-zero return code aborts its dependents
    Stop {
        job: String,
        #[arg(allow_negative_numbers = true)]
        return_code: i64,
        /// File holding the job's captured stdout
        stdout: Option<PathBuf>,
        /// File holding the job's captured stderr
        stderr: Option<PathBuf>,
    },
    /// Mark a job and its dependents aborted
    Abort {
        job: String,
        /// Who or what aborted the job (defaults to the job itself)
        #[arg(long, value_name = "WHO")]
        by: Option<String>,
    },
    /// A job received a signal from the scheduler
    Signal { job: String, signal: String },
    /// Mark every dependent of a failed job aborted
    #[command(alias = "failed")]
    Killdeps { job: String },
    /// Print everything recorded about a job
    View { job: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_callbacks_parse() {
        let args = Args::parse_from([
            "qtask-mon",
            "sqlite:///tmp/q.db",
            "stop",
            "123",
            "1",
            "/tmp/123.qtask.stdout",
        ]);
        assert_eq!(args.uri, "sqlite:///tmp/q.db");
        assert_eq!(args.timeout, DEFAULT_TIMEOUT);
        assert_eq!(
            args.cmd,
            Cmd::Stop {
                job: "123".into(),
                return_code: 1,
                stdout: Some("/tmp/123.qtask.stdout".into()),
                stderr: None,
            }
        );

        let args = Args::parse_from(["qtask-mon", "-vv", "file://log", "failed", "7"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.cmd, Cmd::Killdeps { job: "7".into() });

        let args = Args::parse_from(["qtask-mon", "file://log", "signal", "7", "SIGKILL"]);
        assert_eq!(
            args.cmd,
            Cmd::Signal {
                job: "7".into(),
                signal: "SIGKILL".into()
            }
        );
    }

    #[test]
    fn test_negative_return_code() {
        let args = Args::parse_from(["qtask-mon", "file://log", "stop", "7", "-9"]);
        assert!(matches!(args.cmd, Cmd::Stop { return_code: -9, .. }));
    }
}
