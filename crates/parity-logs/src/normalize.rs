use parity_fixtures::Runtime;
use thiserror::Error;

use crate::completion::{CompletionDetector, CompletionError, CompletionGrammar};
use crate::tokens::strip_volatile_tokens;

const IMAGE_PRELUDE_PREFIX: &str = "Unable to find image";
const IMAGE_PRELUDE_DONE: &str = "Status: Downloaded";
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("cannot interpret log: {excerpt}")]
    Uninterpretable { excerpt: String },
    #[error("log integrity violation: {0}")]
    Integrity(#[from] CompletionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineCleaner {
    RequestScoped,
    Verbatim,
}

/// Runtime-specific cleaner for captured handler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogNormalizer {
    cleaner: LineCleaner,
}

impl LogNormalizer {
    pub fn for_runtime(runtime: &Runtime) -> Self {
        let cleaner = match runtime {
            Runtime::NodeJs | Runtime::NodeJs43 | Runtime::Python27 => LineCleaner::RequestScoped,
            Runtime::Java8 | Runtime::Other(_) => LineCleaner::Verbatim,
        };
        Self { cleaner }
    }

    /// False when the runtime has no registered cleaner and text passes through.
    pub fn is_registered(&self) -> bool {
        self.cleaner != LineCleaner::Verbatim
    }

    /// Idempotent line cleaning of already-extracted output.
    pub fn clean(&self, text: &str) -> String {
        let body = strip_image_prelude(text);
        match self.cleaner {
            LineCleaner::Verbatim => body.to_string(),
            LineCleaner::RequestScoped => {
                let mut cleaned = String::with_capacity(body.len());
                for line in body.lines() {
                    cleaned.push_str(&strip_volatile_tokens(line));
                    cleaned.push('\n');
                }
                cleaned
            }
        }
    }

    /// Extracts the most recent span of `raw` under `grammar` and cleans it.
    ///
    /// `queue_marker` is the task id the queue service assigned; queue
    /// captures are read only after the completion signal.
    pub fn normalize_capture(
        &self,
        grammar: CompletionGrammar,
        raw: &str,
        queue_marker: Option<&str>,
    ) -> Result<String, NormalizeError> {
        let body = strip_image_prelude(raw);
        let mut detector = match (grammar, queue_marker) {
            (CompletionGrammar::Queue, Some(marker)) => {
                CompletionDetector::with_marker(grammar, marker)
            }
            _ => CompletionDetector::new(grammar),
        };
        detector.feed_text(body)?;
        if grammar == CompletionGrammar::Queue {
            detector.signal_end();
        }

        let scan = detector.scan();
        if grammar == CompletionGrammar::Invoke && scan.marker.is_none() {
            return Err(NormalizeError::Uninterpretable {
                excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
            });
        }

        Ok(self.clean(&scan.span))
    }

    /// Best-effort cleaning of output from an execution that never finished.
    /// Falls back to the whole text when no span can be recovered.
    pub fn normalize_partial(&self, grammar: CompletionGrammar, raw: &str) -> String {
        let mut detector = CompletionDetector::new(grammar);
        match detector.feed_text(strip_image_prelude(raw)) {
            Ok(()) if !detector.scan().span.is_empty() => self.clean(&detector.scan().span),
            _ => self.clean(raw),
        }
    }
}

/// Drops the docker image download banner that precedes the first run of a
/// freshly pulled image. Text without a finished download is returned as-is.
pub fn strip_image_prelude(text: &str) -> &str {
    if !text.starts_with(IMAGE_PRELUDE_PREFIX) {
        return text;
    }
    let Some(index) = text.find(IMAGE_PRELUDE_DONE) else {
        return text;
    };
    let tail = &text[index..];
    match tail.find('\n') {
        Some(newline) => &tail[newline + 1..],
        None => "",
    }
}
