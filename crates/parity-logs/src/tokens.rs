use regex::Regex;
use std::sync::OnceLock;

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        )
        .expect("uuid pattern compiles")
    })
}

fn hex_request_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[a-f0-9]{24}\b").expect("hex id pattern compiles"))
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
        )
        .expect("timestamp pattern compiles")
    })
}

fn repeated_tabs_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\t[ \t]*\t").expect("tab pattern compiles"))
}

/// True for a whole-token UUID such as a Lambda request id.
pub fn is_uuid(token: &str) -> bool {
    uuid_pattern()
        .find(token)
        .is_some_and(|found| found.start() == 0 && found.end() == token.len())
}

/// True for a whole-token ISO-8601 timestamp as written by the platform loggers.
pub(crate) fn is_timestamp(token: &str) -> bool {
    timestamp_pattern()
        .find(token)
        .is_some_and(|found| found.start() == 0 && found.end() == token.len())
}

/// `[INFO]`, `[ERROR]` and friends from the Python logging formatter.
pub(crate) fn is_level_tag(token: &str) -> bool {
    token
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .is_some_and(|level| !level.is_empty() && level.chars().all(|c| c.is_ascii_uppercase()))
}

/// True for a whole-token 24-character lowercase hex id (queue task ids).
pub fn is_hex_request_id(token: &str) -> bool {
    token.len() == 24 && hex_request_id_pattern().is_match(token)
}

/// Removes timestamps and request ids from one line and squeezes the
/// separators they leave behind.
pub(crate) fn strip_volatile_tokens(line: &str) -> String {
    let without_time = timestamp_pattern().replace_all(line, "");
    let without_uuid = uuid_pattern().replace_all(&without_time, "");
    let without_ids = hex_request_id_pattern().replace_all(&without_uuid, "");
    let mut squeezed = without_ids.into_owned();
    while repeated_tabs_pattern().is_match(&squeezed) {
        squeezed = repeated_tabs_pattern()
            .replace_all(&squeezed, "\t")
            .into_owned();
    }
    squeezed.trim().to_string()
}
