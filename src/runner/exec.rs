use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use super::Error;

/// Run `program` with `args`, feeding `input` on stdin.
/// Returns stdout and stderr combined, and whether the command succeeded.
pub fn run_with_input(program: &str, args: &[&str], input: &str) -> Result<(bool, String), Error> {
    log::debug!("running {program} {}", args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Spawn(program.to_owned(), e))?;

    // write stdin on its own thread, so a chatty child can't deadlock us:
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.to_owned();
        thread::spawn(move || stdin.write_all(input.as_bytes()))
    });

    let output = child
        .wait_with_output()
        .map_err(|e| Error::Spawn(program.to_owned(), e))?;

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => log::warn!("error writing to {program}: {e}"),
            Err(_) => log::warn!("stdin writer for {program} panicked"),
        }
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.success(), text))
}

/// Run `program` with `args`, failing on a non-zero exit.
pub fn run(program: &str, args: &[&str]) -> Result<(), Error> {
    let (ok, text) = run_with_input(program, args, "")?;
    if ok {
        Ok(())
    } else {
        Err(Error::Command(
            format!("{program} {}", args.join(" ")),
            text.trim().to_owned(),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_input_and_status() {
        let (ok, out) = run_with_input("cat", &[], "hello\n").unwrap();
        assert!(ok);
        assert_eq!(out, "hello\n");

        assert!(run("true", &[]).is_ok());
        assert!(matches!(run("false", &[]), Err(Error::Command(..))));
        assert!(matches!(
            run("nonexistent_prog_xyz", &[]),
            Err(Error::Spawn(..))
        ));
    }
}
