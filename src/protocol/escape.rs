//! Escaping for the character fast path.
//!
//! Frames are newline-delimited, so newlines, carriage returns and the escape
//! character itself must be escaped inside a payload. Framings that embed
//! payloads in script string literals additionally escape `'` and `/` (the
//! latter keeps `</script>` from closing the tag early).

use std::borrow::Cow;

/// Escape `\`, `\n` and `\r`.
///
/// Returns the input borrowed when nothing needs escaping.
pub fn escape(s: &str) -> Cow<'_, str> {
    escape_with(s, false)
}

/// Escape for embedding inside a single-quoted script string literal.
///
/// Returns the input borrowed when nothing needs escaping.
pub fn escape_script(s: &str) -> Cow<'_, str> {
    escape_with(s, true)
}

fn needs_escape(c: char, script: bool) -> bool {
    match c {
        '\\' | '\n' | '\r' => true,
        '\'' | '/' => script,
        _ => false,
    }
}

fn escape_with(s: &str, script: bool) -> Cow<'_, str> {
    let Some(first) = s.find(|c| needs_escape(c, script)) else {
        return Cow::Borrowed(s);
    };

    let mut out = String::with_capacity(s.len() + 16);
    out.push_str(&s[..first]);
    for c in s[first..].chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\'' if script => out.push_str("\\'"),
            '/' if script => out.push_str("\\/"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape`] and [`escape_script`].
///
/// Unknown escape sequences keep the escaped character; a trailing lone
/// backslash is kept as is.
pub fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('\\') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}
