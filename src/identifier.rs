//! Validated, normalized container names.
//!
//! An identifier is a non-empty path of `[a-z0-9_]` segments separated by
//! `/`. Normalization lowercases ASCII letters and, if requested, remaps
//! `/` to a platform-specific separator. `.` is never permitted: it is
//! reserved for implementation-chosen file suffixes.

use crate::error::PickleError;

/// Returns `true` if `c` may appear in a raw (pre-normalized) identifier.
pub fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/'
}

/// Normalizes `id`, remapping `/` to `sep`.
///
/// Lowercases ASCII letters, rejects any character outside
/// `{a-z, A-Z, 0-9, _, /}`, and rejects two consecutive `/`.
pub fn normalize(id: &str, sep: char) -> Result<String, PickleError> {
    if id.is_empty() {
        return Err(PickleError::InvalidArgument(
            "identifier must not be empty".to_string(),
        ));
    }

    let mut out = String::with_capacity(id.len());
    let mut prev_was_sep = false;
    for c in id.chars() {
        if !is_allowed(c) {
            return Err(PickleError::InvalidArgument(format!(
                "identifier {id:?} contains disallowed character {c:?}"
            )));
        }
        if c == '/' {
            if prev_was_sep {
                return Err(PickleError::InvalidArgument(format!(
                    "identifier {id:?} contains consecutive separators"
                )));
            }
            prev_was_sep = true;
            out.push(sep);
        } else {
            prev_was_sep = false;
            out.push(c.to_ascii_lowercase());
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separator() {
        assert_eq!(
            normalize("/Users/Johnny/123_hello", '\\').unwrap(),
            "\\users\\johnny\\123_hello"
        );
    }

    #[test]
    fn rejects_disallowed_character() {
        let err = normalize("C:/Users/Johnny", '/').unwrap_err();
        assert!(matches!(err, PickleError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_consecutive_separators() {
        let err = normalize("a//b", '/').unwrap_err();
        assert!(matches!(err, PickleError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_dot() {
        let err = normalize("a.b", '/').unwrap_err();
        assert!(matches!(err, PickleError::InvalidArgument(_)));
    }

    #[test]
    fn is_idempotent() {
        let once = normalize("/Users/Johnny/123", '/').unwrap();
        let twice = normalize(&once, '/').unwrap();
        assert_eq!(once, twice);
    }
}
