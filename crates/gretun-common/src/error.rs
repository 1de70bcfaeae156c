//! Error types for command execution.

use std::io;
use thiserror::Error;

/// Result type alias for command execution.
pub type ShellResult<T> = Result<T, ShellError>;

/// Errors that can occur while running an external command.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The command could not be spawned.
    #[error("Failed to execute shell command '{command}': {source}")]
    Spawn {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The command ran and returned a non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },
}

impl ShellError {
    /// Returns the command line this error refers to.
    pub fn command(&self) -> &str {
        match self {
            ShellError::Spawn { command, .. } | ShellError::CommandFailed { command, .. } => {
                command
            }
        }
    }

    /// Returns the diagnostic output of a failed command, if it ran at all.
    pub fn output(&self) -> Option<&str> {
        match self {
            ShellError::CommandFailed { output, .. } => Some(output),
            ShellError::Spawn { .. } => None,
        }
    }
}
