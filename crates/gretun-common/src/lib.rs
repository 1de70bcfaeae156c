//! Common infrastructure shared by the gretun crates.
//!
//! - [`shell`]: quoted `ip(8)` command execution through `/bin/sh`
//! - [`error`]: error types for command execution
//!
//! # Example
//!
//! ```ignore
//! use gretun_common::shell::{self, IP_CMD, shellquote};
//!
//! async fn set_up(name: &str) -> gretun_common::ShellResult<()> {
//!     let cmd = format!("{} link set dev {} up", IP_CMD, shellquote(name));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

pub use error::{ShellError, ShellResult};
pub use shell::ExecResult;
