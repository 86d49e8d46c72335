//! Errors raised while driving gpg.
//!
//! Two tiers share one enum. Low-level variants report protocol or tooling
//! anomalies and are meant for logs. High-level variants describe failures a
//! user can act on; their messages are fit to show directly.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::status::StatusCode;

/// Closed classification of every [`GpgError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidFile,
    NoUsableKey,
    Cancelled,
    InvalidRecipient,
    GenericFailure,
    SetupError,
}

/// Why an encryption recipient was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientProblem {
    /// gpg reported `KEYEXPIRED` alongside the invalid recipient.
    Expired,
    /// The key is unknown or not trusted.
    Untrusted,
}

impl fmt::Display for RecipientProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expired => {
                "Encryption failed, the key of one or more recipients is invalid or expired"
            }
            Self::Untrusted => {
                "Encryption failed, one or more recipients are unknown or their key is not trusted"
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum GpgError {
    // Low-level tier.
    #[error("gpg exited with code {exit_code}:\n{diagnostics}")]
    UnexpectedExitCode { exit_code: i32, diagnostics: String },

    #[error("expected gpg to report status code {code}, but it did not")]
    MissingStatusCode { code: StatusCode },

    #[error("gpg reported disallowed status code {code}")]
    DisallowedStatusCode { code: StatusCode },

    #[error("{program} did not finish within {}s and was killed", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // High-level tier.
    #[error("The file does not appear to be a valid encrypted file.")]
    InvalidFile,

    #[error("No matching private key found. The file was encrypted for: {}", .key_ids.join(", "))]
    NoUsableKey { key_ids: Vec<String> },

    #[error("No private keys were found. Without a private key, nothing can be decrypted.")]
    NoSecretKeys,

    #[error("Decryption was cancelled.")]
    Cancelled,

    #[error("{reason}: {}", .recipients.join(", "))]
    InvalidRecipient {
        recipients: Vec<String>,
        reason: RecipientProblem,
    },

    #[error("gpg reported a failure:\n{diagnostics}")]
    Gpg { diagnostics: String },

    #[error("gpg executable not found at '{}'", .path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("gpg-agent tooling not found at '{}'", .path.display())]
    AgentToolMissing { path: PathBuf },
}

impl GpgError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFile => ErrorKind::InvalidFile,
            Self::NoUsableKey { .. } | Self::NoSecretKeys => ErrorKind::NoUsableKey,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRecipient { .. } => ErrorKind::InvalidRecipient,
            Self::ExecutableNotFound { .. } | Self::AgentToolMissing { .. } => ErrorKind::SetupError,
            Self::UnexpectedExitCode { .. }
            | Self::MissingStatusCode { .. }
            | Self::DisallowedStatusCode { .. }
            | Self::Timeout { .. }
            | Self::Spawn { .. }
            | Self::Io { .. }
            | Self::Gpg { .. } => ErrorKind::GenericFailure,
        }
    }

    /// Whether the message describes a recognized, user-actionable failure.
    pub const fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Self::UnexpectedExitCode { .. }
                | Self::MissingStatusCode { .. }
                | Self::DisallowedStatusCode { .. }
                | Self::Timeout { .. }
                | Self::Spawn { .. }
                | Self::Io { .. }
        )
    }
}
