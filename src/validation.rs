//! Name and path-pattern validation.

use std::sync::LazyLock;

use regex::Regex;

use crate::{FrameworkError, Result};

/// Pattern documented for name-string fields.
pub const NAME_STRING_PATTERN: &str = r"\w([\w-.]*\w)?";

/// ASCII word characters, then optionally word/`-`/`.` characters ending in a
/// word character.
static NAME_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Za-z_](?:[0-9A-Za-z_\-.]*[0-9A-Za-z_])?$")
        .expect("name-string regex is valid")
});

/// Returns true if `name` satisfies the name-string formatting rules.
///
/// # Example
///
/// ```
/// use vaultframe::validation::is_name_string;
///
/// assert!(is_name_string("abc-.123"));
/// assert!(is_name_string("a"));
///
/// assert!(!is_name_string(""));
/// assert!(!is_name_string("-leading"));
/// assert!(!is_name_string("trailing."));
/// assert!(!is_name_string("has space"));
/// ```
pub fn is_name_string(name: &str) -> bool {
    NAME_STRING_RE.is_match(name)
}

/// Anchors a path pattern with `^` and `$` unless already anchored.
pub fn anchor_pattern(pattern: &str) -> String {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

/// Anchors and compiles a path pattern.
///
/// # Errors
///
/// Returns [`FrameworkError::InvalidBackend`] for blank or uncompilable
/// patterns.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(FrameworkError::InvalidBackend(
            "routing pattern cannot be blank".to_string(),
        ));
    }

    Regex::new(&ascii_perl_classes(&anchor_pattern(pattern))).map_err(|e| {
        FrameworkError::InvalidBackend(format!("invalid pattern {pattern:?}: {e}"))
    })
}

/// Rewrites `\w`, `\d`, `\s` and their negations as POSIX classes, which the
/// regex crate always treats as ASCII, so routes agree with [`is_name_string`].
/// `.` and explicit Unicode classes are left alone.
fn ascii_perl_classes(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 16);
    // Nesting depth of bracketed classes.
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let escaped = chars[i + 1];
                let posix = match escaped {
                    'w' => Some("[:word:]"),
                    'W' => Some("[:^word:]"),
                    'd' => Some("[:digit:]"),
                    'D' => Some("[:^digit:]"),
                    's' => Some("[:space:]"),
                    'S' => Some("[:^space:]"),
                    _ => None,
                };
                match posix {
                    Some(class) if depth > 0 => out.push_str(class),
                    Some(class) => {
                        out.push('[');
                        out.push_str(class);
                        out.push(']');
                    }
                    None => {
                        out.push(c);
                        out.push(escaped);
                    }
                }
                i += 2;
            }
            '[' if depth > 0 && chars.get(i + 1) == Some(&':') => {
                // POSIX class inside a class: copy through its closing `:]`.
                let end = (i + 2..chars.len().saturating_sub(1))
                    .find(|&j| chars[j] == ':' && chars[j + 1] == ']')
                    .map_or(chars.len(), |j| j + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            '[' => {
                depth += 1;
                out.push(c);
                i += 1;
                if chars.get(i) == Some(&'^') {
                    out.push('^');
                    i += 1;
                }
                // A leading `]` is a literal.
                if chars.get(i) == Some(&']') {
                    out.push(']');
                    i += 1;
                }
            }
            ']' if depth > 0 => {
                depth -= 1;
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_string() {
        assert!(is_name_string("my-role.v2"));
        assert!(is_name_string("under_score"));
        assert!(!is_name_string("slash/inside"));
        assert!(!is_name_string("ünïcode"));
    }

    #[test]
    fn test_anchor_pattern() {
        assert_eq!(anchor_pattern("foo"), "^foo$");
        assert_eq!(anchor_pattern("^foo"), "^foo$");
        assert_eq!(anchor_pattern("foo$"), "^foo$");
        assert_eq!(anchor_pattern("^foo$"), "^foo$");
    }

    #[test]
    fn test_compile_pattern_anchors() {
        let re = compile_pattern("foo").unwrap();
        assert!(re.is_match("foo"));
        assert!(!re.is_match("foobar"));
        assert!(!re.is_match("xfoo"));
    }

    #[test]
    fn test_compile_pattern_errors() {
        let err = compile_pattern("").unwrap_err();
        assert!(err.to_string().contains("blank"));

        let err = compile_pattern("roles/(?P<name>").unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidBackend(_)));
    }

    #[test]
    fn test_ascii_perl_classes() {
        assert_eq!(ascii_perl_classes(r"a\w"), "a[[:word:]]");
        assert_eq!(ascii_perl_classes(r"[\w\-.]+"), r"[[:word:]\-.]+");
        assert_eq!(ascii_perl_classes(r"\D[^\s]"), "[[:^digit:]][^[:space:]]");
        assert_eq!(ascii_perl_classes(r"[[:alpha:]\d]"), "[[:alpha:][:digit:]]");
        assert_eq!(ascii_perl_classes(r"[]\w]"), "[][:word:]]");
        assert_eq!(ascii_perl_classes(r"\\w\.x"), r"\\w\.x");
        assert_eq!(ascii_perl_classes("(?P<rest>.*)"), "(?P<rest>.*)");
    }

    #[test]
    fn test_compiled_word_class_is_ascii() {
        let re = compile_pattern(r"roles/(?P<name>\w(([\w\-.]+)?\w)?)").unwrap();
        assert!(re.is_match("roles/web-1.v2"));
        assert!(!re.is_match("roles/ünï"));
        assert!(!re.is_match("roles/naïve"));

        let digits = compile_pattern(r"v\d+").unwrap();
        assert!(digits.is_match("v42"));
        assert!(!digits.is_match("v\u{0663}"));

        // `.` still matches any character.
        let any = compile_pattern("files/(?P<path>.+)").unwrap();
        assert!(any.is_match("files/ünï"));
    }
}
