use aliri_braid::braid;
use std::fmt;

/// Redacts a secret unless alternate formatting is requested, in which case
/// only a prefix of `$default` characters (or the formatter width) is shown
macro_rules! redacted {
    ($ty:ty: $label:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }
    };
}

fn reveal_prefix(secret: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if secret.char_indices().nth(max_len).is_none() {
        return f.write_str(secret);
    }

    if max_len <= 1 {
        return f.write_str("…");
    }

    // keep `max_len - 1` characters so the ellipsis fits in `max_len`
    let cut = secret
        .char_indices()
        .nth(max_len - 1)
        .map_or(secret.len(), |(idx, _)| idx);
    f.write_str(&secret[..cut])?;
    f.write_str("…")
}

/// An opaque bearer token issued by the identity backend
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN", 15);

/// The identifier of a service account
#[braid(serde)]
pub struct ServiceAccountId;

/// The password of a service account
#[braid(serde, debug = "owned", display = "owned")]
pub struct ServiceAccountPassword;

redacted!(ServiceAccountPasswordRef: "SERVICE ACCOUNT PASSWORD", 0);
