//! Generation progress reporting.
//!
//! The pipeline emits an ordered stream of [`ProgressEvent`]s at stage
//! boundaries and once per chapter. Progress is observability only; it
//! never influences control flow. Output goes to **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;
use std::sync::Mutex;

use repo_tutor_core::models::StageName;
use serde::Serialize;

/// One progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: StageName,
    pub message: String,
    /// Overall completion, 0–100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chapters: Option<usize>,
}

impl ProgressEvent {
    pub fn stage(stage: StageName, message: impl Into<String>, progress: u8) -> Self {
        Self {
            stage,
            message: message.into(),
            progress: progress.min(100),
            current_chapter: None,
            total_chapters: None,
        }
    }

    pub fn chapter(message: impl Into<String>, progress: u8, current: usize, total: usize) -> Self {
        Self {
            current_chapter: Some(current),
            total_chapters: Some(total),
            ..Self::stage(StageName::WriteChapters, message, progress)
        }
    }
}

/// Receives progress events from a pipeline run.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "[ 45%] write_chapters  chapter 2/5: Parser".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!("[{:>3}%] {}  {}\n", event.progress, event.stage, event.message);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let mut obj = serde_json::json!({ "event": "progress" });
        if let (Some(map), Ok(serde_json::Value::Object(fields))) =
            (obj.as_object_mut(), serde_json::to_value(&event))
        {
            map.extend(fields);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory; used by tests and embedders.
#[derive(Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_event_carries_counts() {
        let event = ProgressEvent::chapter("chapter 2/5", 40, 2, 5);
        assert_eq!(event.stage, StageName::WriteChapters);
        assert_eq!(event.current_chapter, Some(2));
        assert_eq!(event.total_chapters, Some(5));
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(ProgressEvent::stage(StageName::Fetch, "x", 250).progress, 100);
    }

    #[test]
    fn collecting_keeps_order() {
        let collector = CollectingProgress::new();
        collector.report(ProgressEvent::stage(StageName::Fetch, "a", 0));
        collector.report(ProgressEvent::stage(StageName::CombineTutorial, "b", 100));
        let events = collector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].stage, StageName::CombineTutorial);
    }

    #[test]
    fn event_serializes_snake_case_stage() {
        let json = serde_json::to_value(ProgressEvent::stage(StageName::OrderChapters, "m", 50)).unwrap();
        assert_eq!(json["stage"], "order_chapters");
        assert!(json.get("current_chapter").is_none());
    }
}
