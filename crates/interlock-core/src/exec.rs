use std::io::Write;
use std::process::{Command, Stdio};

use crate::{Error, Result};

const SUDO: &str = "/usr/bin/sudo";

/// Run an external tool, optionally through sudo, with an optional
/// passphrase (or other secret material) fed on standard input.
///
/// A non-zero exit propagates the tool's stderr as `Error::ExternalTool`.
pub fn run(cmd: &str, args: &[&str], root: bool, stdin_data: Option<&str>) -> Result<String> {
    let mut command = if root {
        let mut c = Command::new(SUDO);
        c.arg(cmd).args(args);
        c
    } else {
        let mut c = Command::new(cmd);
        c.args(args);
        c
    };

    command
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(sudo = root, cmd, ?args, "executing system command");

    let mut child = command
        .spawn()
        .map_err(|e| Error::ExternalTool(format!("{cmd}: {e}")))?;

    if let Some(data) = stdin_data {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ExternalTool("error writing to stdin".into()))?;
        stdin
            .write_all(data.as_bytes())
            .map_err(|_| Error::ExternalTool("error writing to stdin".into()))?;
        // closing the handle delivers EOF to the tool
    }

    let output = child
        .wait_with_output()
        .map_err(|e| Error::ExternalTool(format!("{cmd}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::ExternalTool(if stderr.is_empty() {
            format!("{cmd} exited with {}", output.status)
        } else {
            stderr
        }));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let out = run("/bin/echo", &["hello"], false, None).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_feeds_stdin() {
        let out = run("/bin/cat", &[], false, Some("secret\n")).unwrap();
        assert_eq!(out, "secret\n");
    }

    #[test]
    fn test_run_propagates_stderr_on_failure() {
        let err = run("/bin/cat", &["/nonexistent-interlock-test"], false, None).unwrap_err();
        match err {
            Error::ExternalTool(msg) => assert!(msg.contains("nonexistent-interlock-test")),
            other => panic!("expected ExternalTool, got {other:?}"),
        }
    }
}
