//! Progress event fan-out.
//!
//! Events are pushed to every attached listener. The engine only emits an
//! event after the repository reflects the state change it describes.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Execution progress events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    SpaceStarted {
        run_id: String,
        space: String,
    },
    SpaceCompleted {
        run_id: String,
        space: String,
    },
    ParamSetStarted {
        run_id: String,
        space: String,
        index: usize,
    },
    ParamSetCompleted {
        run_id: String,
        space: String,
        index: usize,
    },
    TaskStarted {
        run_id: String,
        space: String,
        index: usize,
        task: String,
    },
    TaskCompleted {
        run_id: String,
        space: String,
        index: usize,
        task: String,
    },
    InputRequired {
        run_id: String,
        space: String,
        prompt: String,
    },
    /// Fraction in `0.0..=1.0`
    Progress {
        run_id: String,
        fraction: f64,
        message: String,
    },
    Error {
        run_id: String,
        message: String,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::SpaceStarted { .. } => "space_started",
            ProgressEvent::SpaceCompleted { .. } => "space_completed",
            ProgressEvent::ParamSetStarted { .. } => "param_set_started",
            ProgressEvent::ParamSetCompleted { .. } => "param_set_completed",
            ProgressEvent::TaskStarted { .. } => "task_started",
            ProgressEvent::TaskCompleted { .. } => "task_completed",
            ProgressEvent::InputRequired { .. } => "input_required",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

type Listener = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Broadcasts progress events to any number of listeners.
#[derive(Clone, Default)]
pub struct ProgressEmitter {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl ProgressEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&ProgressEvent) + Send + Sync + 'static) {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(_) => warn!("Progress listener registry poisoned; listener dropped"),
        }
    }

    /// Attaches a channel receiving a copy of every event.
    pub fn subscribe_channel(&self) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribe(move |event| {
            // a dropped receiver just stops listening
            let _ = tx.send(event.clone());
        });
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn emit(&self, event: ProgressEvent) {
        debug!("Progress event: {}", event.name());
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(&event);
            }
        }
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_listener_receives_events() {
        let emitter = ProgressEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            emitter.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        emitter.emit(ProgressEvent::SpaceStarted {
            run_id: "r".into(),
            space: "S".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let emitter = ProgressEmitter::new();
        let mut rx = emitter.subscribe_channel();

        emitter.emit(ProgressEvent::Progress {
            run_id: "r".into(),
            fraction: 0.5,
            message: "half".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "progress");
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = ProgressEvent::TaskCompleted {
            run_id: "r".into(),
            space: "S".into(),
            index: 1,
            task: "W:t1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_completed");
        assert_eq!(json["task"], "W:t1");
    }

    #[test]
    fn test_clones_share_listeners() {
        let emitter = ProgressEmitter::new();
        let clone = emitter.clone();
        clone.subscribe(|_| {});
        assert_eq!(emitter.listener_count(), 1);
    }
}
