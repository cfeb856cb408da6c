//! Redaction of sensitive substrings in error messages
//!
//! Masks credential assignments, e-mail addresses, IPv4 addresses and file
//! paths. Replacement tokens never match any pattern, so sanitizing is
//! idempotent, and only the matched substring is replaced.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static CREDENTIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(password|passwd|pwd|secret|token|access[_-]?key|api[_-]?key|key)(\s*[=:]\s*)[^\s,;&]+",
    )
    .expect("credential pattern is valid")
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").expect("email pattern is valid"));

static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("ipv4 pattern is valid")
});

static UNIX_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/[\w.-]+){2,}").expect("unix path pattern is valid"));

static WINDOWS_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z]:\\[\w\\.-]+").expect("windows path pattern is valid")
});

pub const REDACTED: &str = "[REDACTED]";

/// Mask sensitive substrings of `message`
pub fn sanitize_error_message(message: &str) -> String {
    let out = CREDENTIAL.replace_all(message, format!("${{1}}${{2}}{REDACTED}").as_str());
    let out = replace(out, &EMAIL, "[EMAIL]");
    let out = replace(out, &IPV4, "[IP]");
    let out = replace(out, &WINDOWS_PATH, "[PATH]");
    let out = replace(out, &UNIX_PATH, "[PATH]");
    out.into_owned()
}

fn replace<'a>(input: Cow<'a, str>, pattern: &Regex, with: &str) -> Cow<'a, str> {
    match pattern.replace_all(&input, with) {
        Cow::Borrowed(_) => input,
        Cow::Owned(s) => Cow::Owned(s),
    }
}
