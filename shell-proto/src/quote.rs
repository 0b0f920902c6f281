//! PowerShell single-quoted string literal quoting.
//!
//! PowerShell's single-quoted strings treat everything literally except a
//! doubled `''`, which escapes to one literal quote. This is the only
//! escaping rule the shell-side protocol vocabulary needs, since every
//! parameter value this crate emits is quoted this way.

/// Wrap `s` as a PowerShell single-quoted literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
            out.push('\'');
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Inverse of [`quote`]: strip the surrounding single quotes and undouble any
/// escaped `''`. Returns `None` if `s` is not a well-formed single-quoted
/// literal (unbalanced or missing quotes). Used by the loopback shell driver
/// to recover parameter values from a rendered command string.
pub fn unquote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
            } else {
                return None;
            }
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_is_wrapped() {
        assert_eq!(quote("hello"), "'hello'");
    }

    #[test]
    fn embedded_quote_is_doubled() {
        assert_eq!(quote("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn empty_string_is_two_quotes() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn multiple_quotes_each_doubled() {
        assert_eq!(quote("'a'b'"), "'''a''b'''");
    }

    #[test]
    fn unquote_round_trips_plain_and_escaped() {
        assert_eq!(unquote(&quote("hello")).as_deref(), Some("hello"));
        assert_eq!(unquote(&quote("O'Brien")).as_deref(), Some("O'Brien"));
        assert_eq!(unquote(&quote("")).as_deref(), Some(""));
        assert_eq!(unquote(&quote("'a'b'")).as_deref(), Some("'a'b'"));
    }

    #[test]
    fn unquote_rejects_malformed_input() {
        assert_eq!(unquote("no quotes"), None);
        assert_eq!(unquote("'unterminated"), None);
        assert_eq!(unquote("'lone'quote'"), None);
    }
}
