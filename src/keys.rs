//! Parsing of `--with-colons` secret-key listings.
//!
//! Only the records needed to identify a key are read: `sec` (primary key),
//! the `fpr` directly after it, and the first `uid`. Subkey records and
//! everything else are skipped.

/// A secret key available to gpg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKey {
    /// Long key id of the primary key.
    pub key_id: String,
    pub fingerprint: Option<String>,
    /// First user id, with gpg's `\xHH` escapes decoded.
    pub user_id: Option<String>,
}

/// Parse the stdout of `gpg --with-colons --list-secret-keys`.
pub fn parse_secret_keys(listing: &str) -> Vec<SecretKey> {
    let mut keys: Vec<SecretKey> = Vec::new();
    // Whether the last key record seen was a primary key rather than a subkey.
    let mut in_primary = false;

    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields[0] {
            "sec" => {
                let Some(key_id) = fields.get(4).filter(|id| !id.is_empty()) else {
                    continue;
                };
                keys.push(SecretKey {
                    key_id: (*key_id).to_string(),
                    fingerprint: None,
                    user_id: None,
                });
                in_primary = true;
            }
            "ssb" => in_primary = false,
            "fpr" if in_primary => {
                if let Some(key) = keys.last_mut() {
                    key.fingerprint = field(&fields, 9).map(str::to_string);
                }
                in_primary = false;
            }
            "uid" => {
                if let Some(key) = keys.last_mut().filter(|k| k.user_id.is_none()) {
                    key.user_id = field(&fields, 9).map(unescape);
                }
            }
            _ => {}
        }
    }

    keys
}

fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

/// Decode the `\xHH` escapes gpg uses for special characters in colon output.
fn unescape(raw: &str) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(byte) = raw
                .get(i + 2..i + 4)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
