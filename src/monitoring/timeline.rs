//! Execution Timeline
//!
//! Records when each task run starts and finishes so a run can be
//! summarized as per-space durations and an ASCII Gantt chart.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

/// One task run: a task within a parameter set of a space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub space: String,
    pub param_set: usize,
    pub task: String,
}

impl TaskKey {
    pub fn new(space: impl Into<String>, param_set: usize, task: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            param_set,
            task: task.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} {}", self.space, self.param_set, self.task)
    }
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub key: TaskKey,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// A finished (or still open) task run.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub key: TaskKey,
    pub start: Duration,
    pub end: Option<Duration>,
    pub failed: bool,
}

impl Span {
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_sub(self.start))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(&mut self, key: TaskKey, event_type: EventType) {
        self.events.push(TimelineEvent {
            key,
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Pairs start and finish events; a key run twice yields two spans.
    pub fn spans(&self) -> Vec<Span> {
        let mut spans: Vec<Span> = Vec::new();

        for event in &self.events {
            let at = event.timestamp.duration_since(self.start_time);
            match event.event_type {
                EventType::Started => spans.push(Span {
                    key: event.key.clone(),
                    start: at,
                    end: None,
                    failed: false,
                }),
                EventType::Completed | EventType::Failed => {
                    if let Some(open) = spans
                        .iter_mut()
                        .rev()
                        .find(|s| s.key == event.key && s.end.is_none())
                    {
                        open.end = Some(at);
                        open.failed = event.event_type == EventType::Failed;
                    }
                }
            }
        }

        spans
    }

    /// Total finished task time per space.
    pub fn space_durations(&self) -> BTreeMap<String, Duration> {
        let mut totals: BTreeMap<String, Duration> = BTreeMap::new();
        for span in self.spans() {
            if let Some(duration) = span.duration() {
                *totals.entry(span.key.space.clone()).or_default() += duration;
            }
        }
        totals
    }

    /// Renders finished spans as bars scaled to 50 columns.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }
        let scale = 50.0 / total_time as f64;

        for span in self.spans() {
            let Some(end) = span.end else { continue };
            let start = span.start.as_millis();
            let end = end.as_millis();

            let start_pos = (start as f64 * scale) as usize;
            let width = ((end.saturating_sub(start)) as f64 * scale).max(1.0) as usize;
            let mark = if span.failed { "x" } else { "#" };

            output.push_str(&format!(
                "{} |{}{}| ({} ms)\n",
                truncate(&span.key.to_string(), 24),
                " ".repeat(start_pos),
                mark.repeat(width),
                end.saturating_sub(start)
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or cuts a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(task: &str) -> TaskKey {
        TaskKey::new("S", 0, task)
    }

    #[test]
    fn test_spans_pair_events() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(key("W:t1"), EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event(key("W:t1"), EventType::Completed);
        timeline.add_event(key("W:t2"), EventType::Started);
        timeline.add_event(key("W:t2"), EventType::Failed);

        let spans = timeline.spans();
        assert_eq!(spans.len(), 2);
        assert!(spans[0].duration().unwrap() >= Duration::from_millis(20));
        assert!(!spans[0].failed);
        assert!(spans[1].failed);
    }

    #[test]
    fn test_repeated_key_yields_separate_spans() {
        let mut timeline = ExecutionTimeline::new();
        for _ in 0..2 {
            timeline.add_event(key("W:t1"), EventType::Started);
            timeline.add_event(key("W:t1"), EventType::Completed);
        }
        let spans = timeline.spans();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.end.is_some()));
    }

    #[test]
    fn test_open_span_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(key("W:t1"), EventType::Started);
        assert_eq!(timeline.spans()[0].duration(), None);
        assert!(timeline.space_durations().is_empty());
    }

    #[test]
    fn test_space_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(TaskKey::new("A", 0, "t"), EventType::Started);
        thread::sleep(Duration::from_millis(10));
        timeline.add_event(TaskKey::new("A", 0, "t"), EventType::Completed);
        timeline.add_event(TaskKey::new("B", 0, "t"), EventType::Started);
        timeline.add_event(TaskKey::new("B", 0, "t"), EventType::Completed);

        let durations = timeline.space_durations();
        assert_eq!(durations.len(), 2);
        assert!(durations["A"] >= Duration::from_millis(10));
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(key("W:t1"), EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event(key("W:t1"), EventType::Completed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("S#0 W:t1"));
        assert!(chart.contains('#'));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_task_key_display() {
        assert_eq!(TaskKey::new("Space", 3, "W:t").to_string(), "Space#3 W:t");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
