use std::collections::HashSet;
use thiserror::Error;

use crate::tokens::{is_hex_request_id, is_level_tag, is_timestamp, is_uuid};

const INVOKE_START: &str = "START RequestId:";
const INVOKE_END: &str = "END RequestId:";
const INVOKE_REPORT: &str = "REPORT RequestId:";

/// Completion vocabulary of one backend.
///
/// `Invoke` logs frame every request with explicit `START`/`END`/`REPORT`
/// lines. `Queue` logs carry no framing: the service's completion signal is
/// the end of the span and the task id is known before the log is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionGrammar {
    Queue,
    Invoke,
}

/// Classification of a single log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Start(String),
    End(String),
    Report(String),
    /// Handler output, optionally tagged with the request id it was logged under.
    Body(Option<String>),
}

impl CompletionGrammar {
    pub fn classify(self, line: &str) -> LineKind {
        match self {
            Self::Invoke => classify_invoke_line(line),
            Self::Queue => LineKind::Body(logger_marker(line, is_hex_request_id)),
        }
    }
}

/// Request id written by the platform's logger: `[LEVEL]\t<timestamp>\t<id>\t`
/// with the level tag optional. Ids printed anywhere else are handler output.
fn logger_marker(line: &str, is_marker: fn(&str) -> bool) -> Option<String> {
    let mut fields = line.trim_start().split('\t');
    let mut field = fields.next()?;
    if is_level_tag(field) {
        field = fields.next()?;
    }
    if !is_timestamp(field) {
        return None;
    }
    let marker = fields.next()?;
    fields.next()?;
    is_marker(marker).then(|| marker.to_string())
}

fn classify_invoke_line(line: &str) -> LineKind {
    let trimmed = line.trim_start();
    let framed: [(&str, fn(String) -> LineKind); 3] = [
        (INVOKE_START, LineKind::Start),
        (INVOKE_END, LineKind::End),
        (INVOKE_REPORT, LineKind::Report),
    ];
    for (prefix, kind) in framed {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            if let Some(marker) = rest.split_whitespace().next() {
                return kind(marker.to_string());
            }
        }
    }

    LineKind::Body(logger_marker(line, is_uuid))
}

/// A line referenced a request that was never started inside the observed
/// window, which means output from an unrelated invocation leaked in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("{kind} line references unknown request marker '{marker}': {line}")]
    UnknownMarker {
        kind: &'static str,
        marker: String,
        line: String,
    },
}

/// Result of scanning a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionScan {
    /// Body lines of the most recent span, newline terminated.
    pub span: String,
    pub marker: Option<String>,
    pub complete: bool,
}

/// Incremental START/END/REPORT state machine.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    grammar: CompletionGrammar,
    known: HashSet<String>,
    current: Option<String>,
    open: bool,
    complete: bool,
    span: String,
}

impl CompletionDetector {
    pub fn new(grammar: CompletionGrammar) -> Self {
        Self {
            grammar,
            known: HashSet::new(),
            current: None,
            open: grammar == CompletionGrammar::Queue,
            complete: false,
            span: String::new(),
        }
    }

    /// Starts a detector whose span was opened by the service itself.
    pub fn with_marker(grammar: CompletionGrammar, marker: impl Into<String>) -> Self {
        let mut detector = Self::new(grammar);
        detector.start(marker.into());
        detector
    }

    fn start(&mut self, marker: String) {
        self.known.insert(marker.clone());
        self.current = Some(marker);
        self.span.clear();
        self.open = true;
        self.complete = false;
    }

    fn ensure_known(
        &self,
        kind: &'static str,
        marker: &str,
        line: &str,
    ) -> Result<(), CompletionError> {
        if self.known.contains(marker) {
            return Ok(());
        }
        Err(CompletionError::UnknownMarker {
            kind,
            marker: marker.to_string(),
            line: line.to_string(),
        })
    }

    pub fn feed_line(&mut self, line: &str) -> Result<LineKind, CompletionError> {
        let kind = self.grammar.classify(line);
        match &kind {
            LineKind::Start(marker) => self.start(marker.clone()),
            LineKind::End(marker) => {
                self.ensure_known("END", marker, line)?;
                if self.current.as_deref() == Some(marker.as_str()) && self.open {
                    self.open = false;
                    self.complete = true;
                }
            }
            LineKind::Report(marker) => self.ensure_known("REPORT", marker, line)?,
            LineKind::Body(Some(marker)) => {
                if self.grammar == CompletionGrammar::Queue && self.current.is_none() {
                    self.known.insert(marker.clone());
                    self.current = Some(marker.clone());
                }
                self.ensure_known("body", marker, line)?;
                if self.open && self.current.as_deref() == Some(marker.as_str()) {
                    self.push_span_line(line);
                }
            }
            LineKind::Body(None) => {
                if self.open {
                    self.push_span_line(line);
                }
            }
        }
        Ok(kind)
    }

    pub fn feed_text(&mut self, text: &str) -> Result<(), CompletionError> {
        for line in text.lines() {
            self.feed_line(line)?;
        }
        Ok(())
    }

    /// Records the service's completion signal (queue framing).
    pub fn signal_end(&mut self) {
        if self.open {
            self.open = false;
            self.complete = true;
        }
    }

    pub fn scan(&self) -> CompletionScan {
        CompletionScan {
            span: self.span.clone(),
            marker: self.current.clone(),
            complete: self.complete,
        }
    }

    fn push_span_line(&mut self, line: &str) {
        self.span.push_str(line);
        self.span.push('\n');
    }
}

/// Scans a whole capture. Queue captures are fetched only after the
/// completion signal, so they are complete by construction.
pub fn detect_completion(
    grammar: CompletionGrammar,
    text: &str,
) -> Result<CompletionScan, CompletionError> {
    let mut detector = CompletionDetector::new(grammar);
    detector.feed_text(text)?;
    if grammar == CompletionGrammar::Queue {
        detector.signal_end();
    }
    Ok(detector.scan())
}
