//! Shell command execution for iproute2.
//!
//! Every argument that originates from user input is wrapped with
//! [`shellquote`] before it reaches `/bin/sh`, so names and addresses can
//! never be interpreted as shell syntax.
//!
//! # Example
//!
//! ```ignore
//! use gretun_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link delete dev {}", IP_CMD, shellquote("tun0"));
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{ShellError, ShellResult};

/// Path to the `ip` command used to drive the kernel interface table.
pub const IP_CMD: &str = "/sbin/ip";

/// Characters that keep a special meaning inside shell double quotes:
/// `$`, `` ` ``, `"`, `\` and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and every character that is
/// special inside double quotes is backslash-escaped.
///
/// ```
/// use gretun_common::shell::shellquote;
///
/// assert_eq!(shellquote("tun0"), "\"tun0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by a signal).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout and stderr joined, for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a command line through `/bin/sh -c`.
///
/// A non-zero exit code is not an error here; only a failure to spawn is.
pub async fn exec(cmd: &str) -> ShellResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ShellError::Spawn {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a command and turns a non-zero exit into [`ShellError::CommandFailed`].
///
/// Returns stdout on success.
pub async fn exec_or_throw(cmd: &str) -> ShellResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(ShellError::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
