//! Parsing of gpg's `--status-fd` channel.
//!
//! gpg multiplexes machine-readable status lines onto its error stream,
//! interleaved with human-readable diagnostics. Status lines look like:
//!
//! ```text
//! [GNUPG:] <TOKEN>[ <payload>]
//! ```
//!
//! Only marker-prefixed lines take part in outcome classification; every
//! other line on the stream is a plain diagnostic.

use std::fmt;

/// Prefix of every status-channel line.
pub const STATUS_MARKER: &str = "[GNUPG:] ";

macro_rules! status_codes {
    ($($variant:ident => $token:literal,)+) => {
        /// A status token emitted by gpg.
        ///
        /// Tokens outside the known set map to [`StatusCode::Unknown`], which
        /// keeps the registry forward compatible with newer gpg releases.
        ///
        /// Equality compares the carried token for `Unknown`, so two
        /// different unrecognized tokens are not equal. Known codes compare
        /// by variant alone.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $(
                #[doc = concat!("`", $token, "`")]
                $variant,
            )+
            /// A token this crate does not recognize, kept verbatim.
            Unknown(String),
        }

        impl StatusCode {
            /// Look up a raw token. Matching is exact and case-sensitive.
            pub fn from_token(token: &str) -> Self {
                match token {
                    $($token => Self::$variant,)+
                    other => Self::Unknown(other.to_string()),
                }
            }

            /// The protocol token for this code.
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $token,)+
                    Self::Unknown(token) => token,
                }
            }
        }
    };
}

status_codes! {
    NewSig => "NEWSIG",
    GoodSig => "GOODSIG",
    ExpSig => "EXPSIG",
    ExpKeySig => "EXPKEYSIG",
    RevKeySig => "REVKEYSIG",
    BadSig => "BADSIG",
    ErrSig => "ERRSIG",
    ValidSig => "VALIDSIG",
    SigId => "SIG_ID",
    EncTo => "ENC_TO",
    BeginDecryption => "BEGIN_DECRYPTION",
    EndDecryption => "END_DECRYPTION",
    DecryptionKey => "DECRYPTION_KEY",
    DecryptionInfo => "DECRYPTION_INFO",
    DecryptionFailed => "DECRYPTION_FAILED",
    DecryptionOkay => "DECRYPTION_OKAY",
    DecryptionComplianceMode => "DECRYPTION_COMPLIANCE_MODE",
    BeginEncryption => "BEGIN_ENCRYPTION",
    EndEncryption => "END_ENCRYPTION",
    EncryptionComplianceMode => "ENCRYPTION_COMPLIANCE_MODE",
    NoPubkey => "NO_PUBKEY",
    NoSeckey => "NO_SECKEY",
    NoData => "NODATA",
    Unexpected => "UNEXPECTED",
    TrustUndefined => "TRUST_UNDEFINED",
    TrustNever => "TRUST_NEVER",
    TrustMarginal => "TRUST_MARGINAL",
    TrustFully => "TRUST_FULLY",
    TrustUltimate => "TRUST_ULTIMATE",
    Plaintext => "PLAINTEXT",
    PlaintextLength => "PLAINTEXT_LENGTH",
    InvRecp => "INV_RECP",
    InvSgnr => "INV_SGNR",
    NoRecp => "NO_RECP",
    NoSgnr => "NO_SGNR",
    KeyExpired => "KEYEXPIRED",
    KeyRevoked => "KEYREVOKED",
    SigExpired => "SIGEXPIRED",
    KeyConsidered => "KEY_CONSIDERED",
    UseridHint => "USERID_HINT",
    NeedPassphrase => "NEED_PASSPHRASE",
    BadPassphrase => "BAD_PASSPHRASE",
    GoodPassphrase => "GOOD_PASSPHRASE",
    MissingPassphrase => "MISSING_PASSPHRASE",
    PinentryLaunched => "PINENTRY_LAUNCHED",
    GoodMdc => "GOODMDC",
    BadMdc => "BADMDC",
    ErrMdc => "ERRMDC",
    BadArmor => "BADARMOR",
    CardCtrl => "CARDCTRL",
    ScOpFailure => "SC_OP_FAILURE",
    ScOpSuccess => "SC_OP_SUCCESS",
    InquireMaxlen => "INQUIRE_MAXLEN",
    NotationName => "NOTATION_NAME",
    NotationData => "NOTATION_DATA",
    PolicyUrl => "POLICY_URL",
    KeyCreated => "KEY_CREATED",
    Imported => "IMPORTED",
    ImportOk => "IMPORT_OK",
    ImportRes => "IMPORT_RES",
    FileStart => "FILE_START",
    FileDone => "FILE_DONE",
    FileError => "FILE_ERROR",
    Progress => "PROGRESS",
    Error => "ERROR",
    Warning => "WARNING",
    Failure => "FAILURE",
    Success => "SUCCESS",
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed status-channel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub code: StatusCode,
    /// The token as it appeared on the wire; never empty.
    pub raw_code: String,
    /// Everything after the first space following the token, if any.
    pub payload: Option<String>,
}

impl StatusMessage {
    /// Parse a line from gpg's error stream.
    ///
    /// Returns `None` when the line does not start with [`STATUS_MARKER`] or
    /// carries no token after it; such lines are plain diagnostics.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(STATUS_MARKER)?;
        let (raw_code, payload) = match rest.split_once(' ') {
            Some((token, payload)) => (token, Some(payload.to_string())),
            None => (rest, None),
        };
        if raw_code.is_empty() {
            return None;
        }

        Some(Self {
            code: StatusCode::from_token(raw_code),
            raw_code: raw_code.to_string(),
            payload,
        })
    }
}

/// A line read from gpg's error stream, after partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StderrLine {
    Status(StatusMessage),
    Diagnostic(String),
}

impl StderrLine {
    /// Route a raw error-stream line to the status parser or the diagnostics.
    pub fn partition(line: &str) -> Self {
        StatusMessage::parse(line).map_or_else(|| Self::Diagnostic(line.to_string()), Self::Status)
    }
}
