// src/events.rs
//! Progress events and their per-job delivery channel.
//!
//! Internally events are a closed enum; the string-keyed JSON shapes the UI
//! observes (`{"event":"progress",...}`, `{"status":"DONE",...}`) exist only
//! at the wire boundary via [`PipelineEvent::to_wire`].
//!
//! Delivery contract per job: emission order, finite stream, exactly one
//! terminal event and it is the last one delivered. Late subscribers get no
//! replay of earlier progress, but the terminal event is retained so any
//! subscriber that arrives before the retention sweep still observes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress {
        message: String,
    },
    ChartGenerated {
        chart_path: String,
        message: Option<String>,
    },
    Done {
        topic: String,
        ppt_filename: String,
        ppt_url: String,
    },
    Error {
        message: String,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done { .. } | PipelineEvent::Error { .. })
    }

    /// Serialize to the line/frame shape consumers observe.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            PipelineEvent::Progress { message } => json!({
                "event": "progress",
                "message": message,
            }),
            PipelineEvent::ChartGenerated {
                chart_path,
                message,
            } => {
                let mut frame = json!({
                    "type": "chart_generated",
                    "chart_path": chart_path,
                });
                if let Some(msg) = message {
                    frame["message"] = json!(msg);
                }
                frame
            }
            PipelineEvent::Done {
                topic,
                ppt_filename,
                ppt_url,
            } => json!({
                "status": "DONE",
                "topic": topic,
                "ppt_filename": ppt_filename,
                "ppt_url": ppt_url,
            }),
            PipelineEvent::Error { message } => json!({
                "status": "ERROR",
                "message": message,
            }),
        }
    }
}

struct JobChannel {
    tx: broadcast::Sender<PipelineEvent>,
    /// Set exactly once; guards both the exactly-one-terminal rule and the
    /// subscribe/publish race (a subscriber either gets a receiver registered
    /// before the terminal send, or reads the retained terminal directly).
    terminal: Mutex<Option<PipelineEvent>>,
}

/// Ordered, per-job event delivery. Append-only from the publisher side; the
/// orchestrator is the only publisher.
pub struct EventChannel {
    jobs: RwLock<HashMap<Uuid, Arc<JobChannel>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Create the channel for a job. Must precede any publish/subscribe.
    pub fn register(&self, job_id: Uuid) {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.jobs
            .write()
            .expect("event registry poisoned")
            .insert(
                job_id,
                Arc::new(JobChannel {
                    tx,
                    terminal: Mutex::new(None),
                }),
            );
    }

    /// Publish an event. Events after the terminal one are dropped, which
    /// keeps the exactly-one-terminal invariant even on buggy late emits.
    pub fn publish(&self, job_id: Uuid, event: PipelineEvent) -> bool {
        let Some(channel) = self.channel(job_id) else {
            return false;
        };
        let mut terminal = channel.terminal.lock().expect("terminal slot poisoned");
        if terminal.is_some() {
            tracing::warn!(job_id = %job_id, "dropping event after terminal");
            return false;
        }
        if event.is_terminal() {
            *terminal = Some(event.clone());
        }
        // No receivers is fine; the terminal slot still records the outcome.
        let _ = channel.tx.send(event);
        true
    }

    /// Subscribe to a job's remaining events. `None` for unknown jobs.
    pub fn subscribe(&self, job_id: Uuid) -> Option<EventStream> {
        let channel = self.channel(job_id)?;
        let terminal = channel.terminal.lock().expect("terminal slot poisoned");
        if let Some(t) = terminal.as_ref() {
            return Some(EventStream {
                rx: None,
                pending: Some(t.clone()),
                finished: false,
            });
        }
        Some(EventStream {
            rx: Some(channel.tx.subscribe()),
            pending: None,
            finished: false,
        })
    }

    /// Tear down a job's channel (retention sweep).
    pub fn remove(&self, job_id: Uuid) {
        self.jobs
            .write()
            .expect("event registry poisoned")
            .remove(&job_id);
    }

    fn channel(&self, job_id: Uuid) -> Option<Arc<JobChannel>> {
        self.jobs
            .read()
            .expect("event registry poisoned")
            .get(&job_id)
            .cloned()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Finite, non-restartable view of one job's events. Yields `None` exactly
/// once, always after the terminal event.
pub struct EventStream {
    rx: Option<broadcast::Receiver<PipelineEvent>>,
    pending: Option<PipelineEvent>,
    finished: bool,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        if self.finished {
            return None;
        }
        if let Some(terminal) = self.pending.take() {
            self.finished = true;
            return Some(terminal);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.finished = true;
                    }
                    return Some(event);
                }
                // Slow consumer: skip the lag notice and keep draining.
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}
