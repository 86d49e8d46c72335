//! Classification of gpg invocation results.
//!
//! gpg's exit code cannot tell a cancelled passphrase prompt from a corrupt
//! file or a missing key. The status codes can, so the rules here look at
//! combinations of codes first and only fall back to the exit code when none
//! of the known failure patterns match.

use tracing::debug;

use crate::error::{GpgError, RecipientProblem};
use crate::invoker::InvocationResult;
use crate::status::StatusCode;

/// Diagnostic gpg prints when the pinentry dialog is dismissed.
const CANCELLED_DIAGNOSTIC: &str = "Operation cancelled";

/// Check the result of a decryption.
///
/// Rules are applied in order; the first match wins.
pub fn classify_decrypt(result: &InvocationResult) -> Result<(), GpgError> {
    if result.has_all(&[StatusCode::Failure, StatusCode::NoData]) {
        return Err(GpgError::InvalidFile);
    }

    if result.has_all(&[StatusCode::DecryptionFailed, StatusCode::NoSeckey]) {
        let key_ids = result
            .payloads(&StatusCode::NoSeckey)
            .map(str::to_string)
            .collect();
        return Err(GpgError::NoUsableKey { key_ids });
    }

    if result.has_status(&StatusCode::DecryptionFailed)
        && result
            .stderr_lines
            .iter()
            .any(|line| line.contains(CANCELLED_DIAGNOSTIC))
    {
        return Err(GpgError::Cancelled);
    }

    if result.has_status(&StatusCode::Failure) {
        return Err(GpgError::Gpg {
            diagnostics: result.diagnostics(),
        });
    }

    ensure_exit_success(result)
}

/// Check the result of an encryption.
pub fn classify_encrypt(result: &InvocationResult) -> Result<(), GpgError> {
    if result.has_all(&[StatusCode::Failure, StatusCode::InvRecp]) {
        let recipients = result
            .payloads(&StatusCode::InvRecp)
            .map(|payload| strip_reason(payload).to_string())
            .collect();
        let reason = if result.has_status(&StatusCode::KeyExpired) {
            RecipientProblem::Expired
        } else {
            RecipientProblem::Untrusted
        };
        debug!(?reason, ?recipients, "Encryption rejected recipients");
        return Err(GpgError::InvalidRecipient { recipients, reason });
    }

    ensure_exit_success(result)?;
    ensure_no_status_codes(result, &[StatusCode::Failure])?;
    ensure_status_codes(result, &[StatusCode::EndEncryption])
}

/// `INV_RECP` payloads are `<reason> <recipient>`; keep the recipient.
fn strip_reason(payload: &str) -> &str {
    payload
        .split_once(' ')
        .map_or(payload, |(_, recipient)| recipient)
}

/// Fail with the exit code and diagnostics unless gpg exited with 0.
pub fn ensure_exit_success(result: &InvocationResult) -> Result<(), GpgError> {
    if result.exit_code == 0 {
        return Ok(());
    }
    Err(GpgError::UnexpectedExitCode {
        exit_code: result.exit_code,
        diagnostics: result.diagnostics(),
    })
}

/// Fail unless every code in `codes` was reported.
pub fn ensure_status_codes(result: &InvocationResult, codes: &[StatusCode]) -> Result<(), GpgError> {
    match codes.iter().find(|code| !result.has_status(code)) {
        Some(code) => Err(GpgError::MissingStatusCode { code: code.clone() }),
        None => Ok(()),
    }
}

/// Fail if any code in `codes` was reported.
pub fn ensure_no_status_codes(
    result: &InvocationResult,
    codes: &[StatusCode],
) -> Result<(), GpgError> {
    match codes.iter().find(|code| result.has_status(code)) {
        Some(code) => Err(GpgError::DisallowedStatusCode { code: code.clone() }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;

    fn result(exit_code: i32, stderr: &[&str]) -> InvocationResult {
        InvocationResult::from_output(exit_code, String::new(), stderr)
    }

    #[test]
    fn test_clean_decrypt_passes() {
        let r = result(
            0,
            &[
                "[GNUPG:] BEGIN_DECRYPTION",
                "[GNUPG:] DECRYPTION_OKAY",
                "[GNUPG:] END_DECRYPTION",
            ],
        );
        assert!(classify_decrypt(&r).is_ok());
    }

    #[yare::parameterized(
        exit_zero    = { 0 },
        exit_two     = { 2 },
        exit_unusual = { 130 },
    )]
    fn test_failure_and_nodata_is_invalid_file(exit_code: i32) {
        let r = result(exit_code, &["[GNUPG:] FAILURE foo", "[GNUPG:] NODATA bar"]);
        assert!(matches!(classify_decrypt(&r), Err(GpgError::InvalidFile)));
    }

    #[test]
    fn test_missing_secret_key_names_key_ids() {
        let r = result(
            2,
            &[
                "[GNUPG:] ENC_TO AABBCC 1 0",
                "[GNUPG:] NO_SECKEY 0xAABBCC",
                "gpg: decryption failed: No secret key",
                "[GNUPG:] DECRYPTION_FAILED",
            ],
        );
        let err = classify_decrypt(&r).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoUsableKey);
        assert!(err.to_string().contains("0xAABBCC"));
    }

    #[test]
    fn test_multiple_secret_keys_joined_in_order() {
        let r = result(
            2,
            &[
                "[GNUPG:] NO_SECKEY 1111",
                "[GNUPG:] NO_SECKEY 2222",
                "[GNUPG:] DECRYPTION_FAILED",
            ],
        );
        match classify_decrypt(&r) {
            Err(GpgError::NoUsableKey { key_ids }) => assert_eq!(key_ids, ["1111", "2222"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_pinentry() {
        let r = result(
            2,
            &[
                "gpg: public key decryption failed: Operation cancelled",
                "[GNUPG:] ERROR pkdecrypt_failed 99",
                "[GNUPG:] DECRYPTION_FAILED",
                "[GNUPG:] FAILURE decrypt 99",
            ],
        );
        assert!(matches!(classify_decrypt(&r), Err(GpgError::Cancelled)));
    }

    #[test]
    fn test_cancelled_text_without_decryption_failure_is_generic() {
        let r = result(
            2,
            &["gpg: Operation cancelled", "[GNUPG:] FAILURE decrypt 99"],
        );
        assert!(matches!(classify_decrypt(&r), Err(GpgError::Gpg { .. })));
    }

    #[test]
    fn test_generic_failure_carries_indented_diagnostics() {
        let r = result(
            2,
            &[
                "gpg: something odd",
                "[GNUPG:] FAILURE decrypt 1",
                "gpg: and more",
            ],
        );
        match classify_decrypt(&r) {
            Err(GpgError::Gpg { diagnostics }) => {
                assert_eq!(diagnostics, "  gpg: something odd\n  gpg: and more");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_nonzero_exit_without_status_codes() {
        let r = result(2, &["gpg: can't open 'x.gpg': No such file or directory"]);
        match classify_decrypt(&r) {
            Err(GpgError::UnexpectedExitCode {
                exit_code,
                diagnostics,
            }) => {
                assert_eq!(exit_code, 2);
                assert!(diagnostics.contains("No such file"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_codes_match_no_rule() {
        let r = result(0, &["[GNUPG:] FAILURE_X", "[GNUPG:] NODATA_Y"]);
        assert!(classify_decrypt(&r).is_ok());
    }

    #[test]
    fn test_expired_recipient() {
        let r = result(
            2,
            &[
                "[GNUPG:] KEYEXPIRED 1600000000",
                "[GNUPG:] INV_RECP 0xDEADBEEF expired",
                "[GNUPG:] FAILURE encrypt 53",
            ],
        );
        match classify_encrypt(&r) {
            Err(GpgError::InvalidRecipient { recipients, reason }) => {
                assert_eq!(recipients, ["expired"]);
                assert_eq!(reason, RecipientProblem::Expired);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_untrusted_recipient() {
        let r = result(
            2,
            &[
                "[GNUPG:] INV_RECP 0 alice@example.org",
                "[GNUPG:] INV_RECP 10 bob@example.org",
                "[GNUPG:] FAILURE encrypt 53",
            ],
        );
        match classify_encrypt(&r) {
            Err(GpgError::InvalidRecipient { recipients, reason }) => {
                assert_eq!(recipients, ["alice@example.org", "bob@example.org"]);
                assert_eq!(reason, RecipientProblem::Untrusted);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_recipient_without_reason_token_kept_whole() {
        assert_eq!(strip_reason("alice"), "alice");
        assert_eq!(strip_reason("1 alice bob"), "alice bob");
    }

    #[test]
    fn test_encrypt_falls_through_to_exit_code() {
        let r = result(2, &["[GNUPG:] INV_RECP 0 alice", "gpg: alice: skipped"]);
        assert!(matches!(
            classify_encrypt(&r),
            Err(GpgError::UnexpectedExitCode { exit_code: 2, .. })
        ));
    }

    #[test]
    fn test_encrypt_success_requires_end_encryption() {
        let ok = result(0, &["[GNUPG:] BEGIN_ENCRYPTION 2 9", "[GNUPG:] END_ENCRYPTION"]);
        assert!(classify_encrypt(&ok).is_ok());

        let truncated = result(0, &["[GNUPG:] BEGIN_ENCRYPTION 2 9"]);
        assert!(matches!(
            classify_encrypt(&truncated),
            Err(GpgError::MissingStatusCode {
                code: StatusCode::EndEncryption
            })
        ));

        let failed = result(0, &["[GNUPG:] END_ENCRYPTION", "[GNUPG:] FAILURE encrypt 1"]);
        assert!(matches!(
            classify_encrypt(&failed),
            Err(GpgError::DisallowedStatusCode {
                code: StatusCode::Failure
            })
        ));
    }

    fn any_status_line() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("[GNUPG:] DECRYPTION_FAILED".to_string()),
            Just("[GNUPG:] NO_SECKEY 0xAABBCC".to_string()),
            Just("[GNUPG:] KEYEXPIRED 0".to_string()),
            Just("[GNUPG:] INV_RECP 0 alice".to_string()),
            Just("gpg: Operation cancelled".to_string()),
            "[A-Z_]{1,16}( [a-z0-9 ]{0,12})?".prop_map(|s| format!("[GNUPG:] {s}")),
            "[a-z :]{0,30}",
        ]
    }

    proptest! {
        #[test]
        fn test_failure_with_nodata_always_invalid_file(
            mut lines in proptest::collection::vec(any_status_line(), 0..12),
            failure_at in 0usize..12,
            nodata_at in 0usize..12,
            exit_code in -1i32..256,
        ) {
            lines.insert(failure_at.min(lines.len()), "[GNUPG:] FAILURE decrypt 58".to_string());
            lines.insert(nodata_at.min(lines.len()), "[GNUPG:] NODATA 4".to_string());
            let r = InvocationResult::from_output(exit_code, String::new(), &lines);
            prop_assert!(matches!(classify_decrypt(&r), Err(GpgError::InvalidFile)));
        }

        #[test]
        fn test_exit_zero_without_known_failures_succeeds(
            tokens in proptest::collection::vec("[A-Z]{1,8}_X", 0..8),
        ) {
            let lines: Vec<_> = tokens.iter().map(|t| format!("[GNUPG:] {t}")).collect();
            let r = InvocationResult::from_output(0, String::new(), &lines);
            prop_assert!(classify_decrypt(&r).is_ok());
        }
    }
}
