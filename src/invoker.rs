//! Invocation of the gpg executable.
//!
//! An [`Invoker`] runs gpg with operation-specific arguments and hands back
//! the raw [`InvocationResult`]; deciding whether that result is a success is
//! left to [`crate::classify`].

mod process;

pub use process::{run_command, CommandOutput, ProcessInvoker};

use std::ffi::OsString;

use async_trait::async_trait;

use crate::error::GpgError;
use crate::status::{StatusCode, StatusMessage, StderrLine};

/// Flags passed to every gpg invocation, ahead of any caller arguments.
///
/// No interactive prompts, no tty, colon-delimited listings, status lines on
/// fd 2, and abort if a status line cannot be written.
pub const BASE_ARGS: &[&str] = &[
    "--batch",
    "--no-tty",
    "--with-colons",
    "--status-fd",
    "2",
    "--exit-on-status-write-error",
];

/// Everything collected from one finished gpg process.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    pub exit_code: i32,
    pub stdout: String,
    /// Status lines, in the order gpg wrote them.
    pub status_messages: Vec<StatusMessage>,
    /// Non-status lines from the error stream, in the order gpg wrote them.
    pub stderr_lines: Vec<String>,
}

impl InvocationResult {
    /// Build a result from raw error-stream lines, partitioning them into
    /// status messages and diagnostics.
    pub fn from_output<I>(exit_code: i32, stdout: String, stderr: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut status_messages = Vec::new();
        let mut stderr_lines = Vec::new();
        for line in stderr {
            match StderrLine::partition(line.as_ref()) {
                StderrLine::Status(msg) => status_messages.push(msg),
                StderrLine::Diagnostic(text) => stderr_lines.push(text),
            }
        }

        Self {
            exit_code,
            stdout,
            status_messages,
            stderr_lines,
        }
    }

    pub fn has_status(&self, code: &StatusCode) -> bool {
        self.status_messages.iter().any(|m| &m.code == code)
    }

    /// True when every one of `codes` was reported at least once.
    pub fn has_all(&self, codes: &[StatusCode]) -> bool {
        codes.iter().all(|code| self.has_status(code))
    }

    /// Payloads of every message with the given code, in arrival order.
    /// Messages without a payload are skipped.
    pub fn payloads<'a>(&'a self, code: &'a StatusCode) -> impl Iterator<Item = &'a str> + 'a {
        self.status_messages
            .iter()
            .filter(move |m| &m.code == code)
            .filter_map(|m| m.payload.as_deref())
    }

    /// Diagnostic lines joined by newline, each indented.
    pub fn diagnostics(&self) -> String {
        self.stderr_lines
            .iter()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs gpg and collects its output.
///
/// `args` are appended after [`BASE_ARGS`] and any home-directory flag.
/// When `input` is given it is written to gpg's stdin, which is then closed.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<InvocationResult, GpgError>;
}
