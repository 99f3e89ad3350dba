/// Baseline of a cumulative log stream taken before an invocation.
///
/// The log store only ever appends within a stream, but it may start a new
/// stream or expire old events between polls. Content after the baseline is
/// located by prefix first, then by the last non-empty baseline line; if
/// neither is visible the whole current text is treated as new and the
/// completion detector discards stale spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSnapshot {
    text: String,
}

impl LogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn capture(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn new_content<'a>(&self, current: &'a str) -> &'a str {
        if self.text.is_empty() {
            return current;
        }
        if let Some(rest) = current.strip_prefix(self.text.as_str()) {
            return rest;
        }
        let Some(last_line) = self.text.lines().rev().find(|line| !line.trim().is_empty()) else {
            return current;
        };
        match current.rfind(last_line) {
            Some(position) => {
                let after = &current[position + last_line.len()..];
                after
                    .strip_prefix("\r\n")
                    .or_else(|| after.strip_prefix('\n'))
                    .unwrap_or(after)
            }
            None => current,
        }
    }
}
