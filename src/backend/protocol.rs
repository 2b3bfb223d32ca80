//! Streaming parser for the raw instrumentation status protocol.
//!
//! `am instrument -r` emits blocks of `INSTRUMENTATION_STATUS: key=value`
//! lines terminated by an `INSTRUMENTATION_STATUS_CODE: n` line, then a
//! final `INSTRUMENTATION_RESULT`/`INSTRUMENTATION_CODE` pair for the run
//! itself. Values (stack traces in particular) span multiple lines; a
//! line without the protocol prefix continues the most recent value.
//!
//! Status codes: `1` start, `0` ok, `-1` error, `-2` failure, `-3`
//! ignored, `-4` assumption failure.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use super::{FailureKind, RunListener};
use crate::model::DeviceTest;

const STATUS_START: i32 = 1;
const STATUS_OK: i32 = 0;
const STATUS_ERROR: i32 = -1;
const STATUS_FAILURE: i32 = -2;
const STATUS_IGNORED: i32 = -3;
const STATUS_ASSUMPTION_FAILURE: i32 = -4;

/// Session result code emitted by a run that completed normally.
const RUN_COMPLETE: i32 = -1;

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^INSTRUMENTATION_(STATUS_CODE|STATUS|RESULT|CODE|FAILED|ABORTED): ?(.*)$")
            .expect("valid literal regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Status,
    Result,
}

/// Incremental parser converting protocol lines into [`RunListener`]
/// callbacks.
pub struct InstrumentationOutputParser {
    status_values: HashMap<String, String>,
    result_values: HashMap<String, String>,
    current_key: Option<(Section, String)>,
    current_test: Option<DeviceTest>,
    saw_run_code: bool,
    run_failed_reported: bool,
}

impl InstrumentationOutputParser {
    pub fn new() -> Self {
        Self {
            status_values: HashMap::new(),
            result_values: HashMap::new(),
            current_key: None,
            current_test: None,
            saw_run_code: false,
            run_failed_reported: false,
        }
    }

    /// Feed one line of instrumentation output.
    pub fn parse_line(&mut self, line: &str, listener: &mut dyn RunListener) {
        let Some(captures) = line_pattern().captures(line) else {
            self.continue_value(line);
            return;
        };
        let rest = captures.get(2).map_or("", |m| m.as_str());
        match &captures[1] {
            "STATUS" => self.record(Section::Status, rest),
            "RESULT" => self.record(Section::Result, rest),
            "STATUS_CODE" => match rest.trim().parse::<i32>() {
                Ok(code) => self.dispatch(code, listener),
                Err(_) => warn!("unparseable instrumentation status code: {rest}"),
            },
            "CODE" => {
                self.saw_run_code = true;
                let complete = rest.trim().parse::<i32>() == Ok(RUN_COMPLETE);
                if !complete {
                    let message = self
                        .result_values
                        .get("shortMsg")
                        .or_else(|| self.result_values.get("stream"))
                        .cloned()
                        .unwrap_or_else(|| format!("instrumentation finished with code {rest}"));
                    self.report_run_failed(message.trim(), listener);
                }
            }
            "FAILED" | "ABORTED" => {
                self.saw_run_code = true;
                self.report_run_failed(rest.trim(), listener);
            }
            _ => unreachable!("pattern only matches known kinds"),
        }
    }

    /// Signal end of output. An output stream that stops before the run
    /// result is a run-level failure, and an open test is closed out as
    /// errored so its evidence is not lost.
    pub fn finish(&mut self, listener: &mut dyn RunListener) {
        if let Some(test) = self.current_test.take() {
            listener.test_failed(&test, FailureKind::Error, "test did not complete");
            listener.test_ended(&test);
        }
        if !self.saw_run_code {
            self.report_run_failed("instrumentation run did not complete", listener);
        }
    }

    fn record(&mut self, section: Section, rest: &str) {
        let Some((key, value)) = rest.split_once('=') else {
            warn!("unparseable instrumentation key-value: {rest}");
            return;
        };
        let values = match section {
            Section::Status => &mut self.status_values,
            Section::Result => &mut self.result_values,
        };
        values.insert(key.to_string(), value.to_string());
        self.current_key = Some((section, key.to_string()));
    }

    fn continue_value(&mut self, line: &str) {
        let Some((section, key)) = &self.current_key else {
            return;
        };
        let values = match section {
            Section::Status => &mut self.status_values,
            Section::Result => &mut self.result_values,
        };
        if let Some(value) = values.get_mut(key) {
            value.push('\n');
            value.push_str(line);
        }
    }

    fn dispatch(&mut self, code: i32, listener: &mut dyn RunListener) {
        let values = std::mem::take(&mut self.status_values);
        self.current_key = None;

        let class = values.get("class").map(|v| v.trim());
        let method = values.get("test").map(|v| v.trim());
        let (Some(class), Some(method)) = (class, method) else {
            // A status block without a test identity is the runner itself
            // reporting trouble (e.g. `Error=Unable to find instrumentation`).
            if let Some(error) = values.get("Error") {
                self.report_run_failed(error.trim(), listener);
            }
            return;
        };

        let test = DeviceTest::new(class, method);
        let stack = values.get("stack").map(String::as_str).unwrap_or("");

        match code {
            STATUS_START => {
                self.current_test = Some(test.clone());
                listener.test_started(&test);
            }
            STATUS_OK => {
                listener.test_ended(&test);
                self.current_test = None;
            }
            STATUS_ERROR => {
                listener.test_failed(&test, FailureKind::Error, stack);
                listener.test_ended(&test);
                self.current_test = None;
            }
            STATUS_FAILURE => {
                listener.test_failed(&test, FailureKind::Failure, stack);
                listener.test_ended(&test);
                self.current_test = None;
            }
            STATUS_IGNORED => {
                listener.test_ignored(&test);
                listener.test_ended(&test);
                self.current_test = None;
            }
            STATUS_ASSUMPTION_FAILURE => {
                listener.test_assumption_failure(&test, stack);
                listener.test_ended(&test);
                self.current_test = None;
            }
            other => warn!("unknown instrumentation status code {other} for {test}"),
        }
    }

    fn report_run_failed(&mut self, message: &str, listener: &mut dyn RunListener) {
        // A broken run tends to trip several protocol-level symptoms;
        // report the first, which carries the root cause.
        if self.run_failed_reported {
            return;
        }
        self.run_failed_reported = true;
        listener.test_run_failed(message);
    }
}

impl Default for InstrumentationOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Started(String),
        Failed(String, FailureKind, String),
        Ignored(String),
        Assumption(String),
        Ended(String),
        RunFailed(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Seen>,
    }

    impl RunListener for Recorder {
        fn test_started(&mut self, test: &DeviceTest) {
            self.events.push(Seen::Started(test.id()));
        }
        fn test_failed(&mut self, test: &DeviceTest, kind: FailureKind, trace: &str) {
            self.events.push(Seen::Failed(test.id(), kind, trace.to_string()));
        }
        fn test_ignored(&mut self, test: &DeviceTest) {
            self.events.push(Seen::Ignored(test.id()));
        }
        fn test_assumption_failure(&mut self, test: &DeviceTest, trace: &str) {
            self.events.push(Seen::Assumption(test.id()));
            let _ = trace;
        }
        fn test_ended(&mut self, test: &DeviceTest) {
            self.events.push(Seen::Ended(test.id()));
        }
        fn test_run_failed(&mut self, message: &str) {
            self.events.push(Seen::RunFailed(message.to_string()));
        }
    }

    fn parse(output: &str) -> Vec<Seen> {
        let mut parser = InstrumentationOutputParser::new();
        let mut recorder = Recorder::default();
        for line in output.lines() {
            parser.parse_line(line, &mut recorder);
        }
        parser.finish(&mut recorder);
        recorder.events
    }

    #[test]
    fn test_passing_test_sequence() {
        let events = parse(
            "INSTRUMENTATION_STATUS: class=com.example.FooTest\n\
             INSTRUMENTATION_STATUS: test=testBar\n\
             INSTRUMENTATION_STATUS: numtests=1\n\
             INSTRUMENTATION_STATUS_CODE: 1\n\
             INSTRUMENTATION_STATUS: class=com.example.FooTest\n\
             INSTRUMENTATION_STATUS: test=testBar\n\
             INSTRUMENTATION_STATUS_CODE: 0\n\
             INSTRUMENTATION_RESULT: stream=OK (1 test)\n\
             INSTRUMENTATION_CODE: -1\n",
        );
        assert_eq!(
            events,
            vec![
                Seen::Started("com.example.FooTest#testBar".into()),
                Seen::Ended("com.example.FooTest#testBar".into()),
            ]
        );
    }

    #[test]
    fn test_failed_test_with_multiline_stack() {
        let events = parse(
            "INSTRUMENTATION_STATUS: class=com.example.FooTest\n\
             INSTRUMENTATION_STATUS: test=testBar\n\
             INSTRUMENTATION_STATUS_CODE: 1\n\
             INSTRUMENTATION_STATUS: class=com.example.FooTest\n\
             INSTRUMENTATION_STATUS: test=testBar\n\
             INSTRUMENTATION_STATUS: stack=java.lang.AssertionError: nope\n\
             \tat com.example.FooTest.testBar(FooTest.java:10)\n\
             \tat java.lang.reflect.Method.invoke(Native Method)\n\
             INSTRUMENTATION_STATUS_CODE: -2\n\
             INSTRUMENTATION_CODE: -1\n",
        );
        let Seen::Failed(id, kind, trace) = &events[1] else {
            panic!("expected failure, got {events:?}");
        };
        assert_eq!(id, "com.example.FooTest#testBar");
        assert_eq!(*kind, FailureKind::Failure);
        assert!(trace.contains("AssertionError"));
        assert!(trace.contains("FooTest.java:10"));
        assert_eq!(events[2], Seen::Ended("com.example.FooTest#testBar".into()));
    }

    #[test]
    fn test_error_ignored_and_assumption_codes() {
        let block = |code: i32| {
            format!(
                "INSTRUMENTATION_STATUS: class=c.T\n\
                 INSTRUMENTATION_STATUS: test=m{code}\n\
                 INSTRUMENTATION_STATUS_CODE: 1\n\
                 INSTRUMENTATION_STATUS: class=c.T\n\
                 INSTRUMENTATION_STATUS: test=m{code}\n\
                 INSTRUMENTATION_STATUS: stack=boom\n\
                 INSTRUMENTATION_STATUS_CODE: {code}\n"
            )
        };
        let output = format!("{}{}{}INSTRUMENTATION_CODE: -1\n", block(-1), block(-3), block(-4));
        let events = parse(&output);

        assert!(matches!(&events[1], Seen::Failed(_, FailureKind::Error, _)));
        assert!(matches!(&events[4], Seen::Ignored(_)));
        assert!(matches!(&events[7], Seen::Assumption(_)));
    }

    #[test]
    fn test_runner_error_without_test_identity() {
        let events = parse(
            "INSTRUMENTATION_STATUS: Error=Unable to find instrumentation target package\n\
             INSTRUMENTATION_STATUS_CODE: -1\n\
             INSTRUMENTATION_CODE: 0\n",
        );
        assert_eq!(
            events,
            vec![Seen::RunFailed(
                "Unable to find instrumentation target package".into()
            )]
        );
    }

    #[test]
    fn test_instrumentation_failed_line() {
        let events = parse("INSTRUMENTATION_FAILED: com.example.test/.Runner\n");
        assert_eq!(
            events,
            vec![Seen::RunFailed("com.example.test/.Runner".into())]
        );
    }

    #[test]
    fn test_truncated_output_closes_open_test_and_fails_run() {
        let events = parse(
            "INSTRUMENTATION_STATUS: class=c.T\n\
             INSTRUMENTATION_STATUS: test=m\n\
             INSTRUMENTATION_STATUS_CODE: 1\n",
        );
        assert_eq!(events[0], Seen::Started("c.T#m".into()));
        assert!(matches!(&events[1], Seen::Failed(_, FailureKind::Error, _)));
        assert_eq!(events[2], Seen::Ended("c.T#m".into()));
        assert!(matches!(&events[3], Seen::RunFailed(_)));
    }

    #[test]
    fn test_clean_empty_run_reports_nothing() {
        let events = parse(
            "INSTRUMENTATION_RESULT: stream=OK (0 tests)\n\
             INSTRUMENTATION_CODE: -1\n",
        );
        assert!(events.is_empty());
    }
}
