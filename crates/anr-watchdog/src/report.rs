//! Structured ANR diagnostic reports.
//!
//! Hosts are free to return any text from
//! [`HostBinding::capture_diagnostic_report`](crate::host::HostBinding::capture_diagnostic_report);
//! [`AnrReport`] is the JSON layout used by the bundled [`QueueContext`](crate::host::QueueContext)
//! and by the capture-failure placeholder.

use serde::{Deserialize, Serialize};

use crate::error::{WatchdogError, WatchdogResult};

/// Title carried by every report.
pub const REPORT_TITLE: &str = "ANR Report";

/// Frames kept per thread; deeper frames rarely help triage.
pub const MAX_STACK_FRAMES: usize = 3;

/// One stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function or task label.
    pub func: String,
    /// Source file, if known.
    pub file: String,
    /// Source line, 0 if unknown.
    pub line: u32,
}

/// Snapshot of one thread at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Thread name.
    pub name: String,
    /// Free-form thread state (e.g. `RUNNING`, `BLOCKED`).
    pub state: String,
    /// Set on the monitored thread.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub supervised: bool,
    /// Innermost frames first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
}

impl ThreadSnapshot {
    /// Create a snapshot without frames.
    #[must_use]
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            supervised: false,
            stack: Vec::new(),
        }
    }

    /// Mark as the monitored thread.
    #[must_use]
    pub fn supervised(mut self) -> Self {
        self.supervised = true;
        self
    }

    /// Append a frame; frames past [`MAX_STACK_FRAMES`] are dropped.
    #[must_use]
    pub fn with_frame(mut self, func: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        if self.stack.len() < MAX_STACK_FRAMES {
            self.stack.push(StackFrame {
                func: func.into(),
                file: file.into(),
                line,
            });
        }
        self
    }
}

/// A diagnostic report for one ANR incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnrReport {
    /// Always [`REPORT_TITLE`].
    pub title: String,
    /// Application build version.
    pub build_version: String,
    /// Device or host identifier.
    pub device: String,
    /// Human-readable device name.
    pub name: String,
    /// Captured threads.
    pub callstacks: Vec<ThreadSnapshot>,
}

impl AnrReport {
    /// Create an empty report.
    #[must_use]
    pub fn new(
        build_version: impl Into<String>,
        device: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            title: REPORT_TITLE.to_string(),
            build_version: build_version.into(),
            device: device.into(),
            name: name.into(),
            callstacks: Vec::new(),
        }
    }

    /// Append a thread snapshot.
    pub fn push_thread(&mut self, snapshot: ThreadSnapshot) {
        self.callstacks.push(snapshot);
    }

    /// Encode as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::ReportEncoding`] if serialization fails.
    pub fn to_json(&self) -> WatchdogResult<String> {
        serde_json::to_string(self).map_err(|e| WatchdogError::ReportEncoding(e.to_string()))
    }
}

/// Placeholder report used when diagnostic capture fails.
#[must_use]
pub fn capture_failure_report(error: &WatchdogError) -> String {
    serde_json::json!({
        "title": REPORT_TITLE,
        "error": error.to_string(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_layout() -> WatchdogResult<()> {
        let mut report = AnrReport::new("1.4.2", "linux-x86_64", "build-host");
        report.push_thread(
            ThreadSnapshot::new("main", "RUNNING")
                .supervised()
                .with_frame("load_level", "<queue>", 0),
        );
        report.push_thread(ThreadSnapshot::new("worker", "BLOCKED"));

        insta::assert_snapshot!(
            report.to_json()?,
            @r#"{"title":"ANR Report","build_version":"1.4.2","device":"linux-x86_64","name":"build-host","callstacks":[{"name":"main","state":"RUNNING","supervised":true,"stack":[{"func":"load_level","file":"<queue>","line":0}]},{"name":"worker","state":"BLOCKED"}]}"#
        );
        Ok(())
    }

    #[test]
    fn test_stack_truncated() {
        let snapshot = (0..10).fold(ThreadSnapshot::new("main", "RUNNING"), |s, i| {
            s.with_frame(format!("frame_{i}"), "lib.rs", i)
        });
        assert_eq!(snapshot.stack.len(), MAX_STACK_FRAMES);
        assert_eq!(snapshot.stack[0].func, "frame_0");
    }

    #[test]
    fn test_capture_failure_placeholder() -> Result<(), serde_json::Error> {
        let error = WatchdogError::diagnostic_capture_failed("host detached");
        let placeholder = capture_failure_report(&error);
        let value: serde_json::Value = serde_json::from_str(&placeholder)?;
        assert_eq!(value["title"], REPORT_TITLE);
        assert_eq!(
            value["error"],
            "Diagnostic capture failed: host detached"
        );
        Ok(())
    }

    #[test]
    fn test_report_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let mut report = AnrReport::new("2.0", "dev", "name");
        report.push_thread(ThreadSnapshot::new("main", "IDLE").supervised());
        let decoded: AnrReport = serde_json::from_str(&report.to_json()?)?;
        assert_eq!(decoded, report);
        Ok(())
    }
}
