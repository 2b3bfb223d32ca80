//! Structured exception records parsed from device stack-trace text.
//!
//! Instrumentation failures arrive as raw text blobs. This module parses
//! them into a structured form: exception class, message, stack frames,
//! and a recursive `Caused by:` chain, so reports can render them without
//! re-parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured exception: class, message, stack frames, and an optional
/// nested cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    /// Fully qualified exception class name.
    pub class_name: String,

    /// Exception message (may be empty).
    pub message: String,

    /// Stack frames, one `at ...` line each, outermost first.
    #[serde(default)]
    pub frames: Vec<String>,

    /// Nested cause, if the trace carried a `Caused by:` section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    /// Create an exception record with no frames or cause.
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Parse a raw stack-trace blob into a structured exception.
    ///
    /// The first line is expected to be `com.example.SomeException: message`.
    /// Indented `at ...` lines become frames. Each `Caused by:` line starts
    /// a nested section, which becomes the `cause` chain, recursively.
    /// Unrecognized input never fails: it is preserved as the message of a
    /// generic record.
    pub fn from_trace(trace: &str) -> Self {
        let trimmed = trace.trim();
        if trimmed.is_empty() {
            return Self::new("UnknownFailure", "");
        }

        // Split into sections at each `Caused by:` line.
        let mut sections: Vec<Vec<&str>> = vec![Vec::new()];
        for line in trimmed.lines() {
            let stripped = line.trim_start();
            if let Some(rest) = stripped.strip_prefix("Caused by: ") {
                sections.push(vec![rest]);
            } else {
                sections.last_mut().unwrap().push(line);
            }
        }

        // Build the chain innermost-first so each section can own its cause.
        let mut cause: Option<Box<ExceptionInfo>> = None;
        for section in sections.iter().rev() {
            let mut info = Self::parse_section(section);
            info.cause = cause.take();
            cause = Some(Box::new(info));
        }
        *cause.unwrap()
    }

    fn parse_section(lines: &[&str]) -> Self {
        let header = lines.first().copied().unwrap_or_default().trim();
        let (class_name, message) = match header.split_once(": ") {
            Some((class, message)) => (class.to_string(), message.to_string()),
            None => (header.trim_end_matches(':').to_string(), String::new()),
        };

        let frames = lines
            .iter()
            .skip(1)
            .map(|line| line.trim())
            .filter(|line| line.starts_with("at "))
            .map(str::to_string)
            .collect();

        Self {
            class_name,
            message,
            frames,
            cause: None,
        }
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.class_name)
        } else {
            write!(f, "{}: {}", self.class_name, self.message)
        }
    }
}
