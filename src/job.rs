// src/job.rs
//! Job records and the in-memory registry.
//!
//! Jobs are owned by the orchestrator; status transitions are monotonic and
//! terminal jobs stay around for a retention window so late subscribers can
//! still read the outcome, then get swept.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::theme::ThemeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Monotonic order: Pending → Running → (Done | Error). No regressions.
    fn may_become(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Error) => true,
            (JobStatus::Running, JobStatus::Done) => true,
            (JobStatus::Running, JobStatus::Error) => true,
            _ => false,
        }
    }
}

/// What a successful job produced; read back by the synchronous endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobOutcome {
    pub ppt_filename: String,
    pub ppt_url: String,
    pub slide_count: usize,
    pub summary: Option<String>,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub max_sources: usize,
    pub theme: ThemeConfig,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(topic: String, max_sources: usize, theme: ThemeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            max_sources,
            theme,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }
}

#[derive(Debug)]
pub struct JobRegistry {
    inner: Mutex<HashMap<Uuid, Job>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            retention,
        }
    }

    pub fn insert(&self, job: Job) -> Uuid {
        let id = job.id;
        self.inner.lock().expect("job registry poisoned").insert(id, job);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.lock().expect("job registry poisoned").get(&id).cloned()
    }

    /// Apply a monotonic status transition. Regressions are ignored and
    /// reported as `false`; terminal transitions stamp `finished_at`.
    pub fn set_status(&self, id: Uuid, next: JobStatus) -> bool {
        let mut guard = self.inner.lock().expect("job registry poisoned");
        let Some(job) = guard.get_mut(&id) else {
            return false;
        };
        if !job.status.may_become(next) {
            tracing::warn!(job_id = %id, from = ?job.status, to = ?next, "ignoring status regression");
            return false;
        }
        job.status = next;
        if next.is_terminal() {
            job.finished_at = Some(Utc::now());
        }
        true
    }

    /// Record what a finished job produced. Set before the DONE transition
    /// so readers that observe the status also see the outcome.
    pub fn set_outcome(&self, id: Uuid, outcome: JobOutcome) {
        let mut guard = self.inner.lock().expect("job registry poisoned");
        if let Some(job) = guard.get_mut(&id) {
            job.outcome = Some(outcome);
        }
    }

    /// Drop terminal jobs older than the retention window; returns swept ids
    /// so the caller can tear down their event channels too.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let mut guard = self.inner.lock().expect("job registry poisoned");
        let expired: Vec<Uuid> = guard
            .iter()
            .filter(|(_, job)| {
                job.status.is_terminal()
                    && job
                        .finished_at
                        .map(|t| now - t >= retention)
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            guard.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("job registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::new(Duration::from_secs(60))
    }

    #[test]
    fn status_never_regresses() {
        let reg = registry();
        let id = reg.insert(Job::new("topic".into(), 5, ThemeConfig::default()));

        assert!(reg.set_status(id, JobStatus::Running));
        assert!(reg.set_status(id, JobStatus::Done));
        // Terminal is final: neither ERROR nor RUNNING may follow DONE.
        assert!(!reg.set_status(id, JobStatus::Error));
        assert!(!reg.set_status(id, JobStatus::Running));
        assert_eq!(reg.get(id).unwrap().status, JobStatus::Done);
    }

    #[test]
    fn pending_may_fail_directly() {
        let reg = registry();
        let id = reg.insert(Job::new("topic".into(), 5, ThemeConfig::default()));
        assert!(reg.set_status(id, JobStatus::Error));
    }

    #[test]
    fn sweep_removes_only_expired_terminal_jobs() {
        let reg = JobRegistry::new(Duration::from_secs(0));
        let done = reg.insert(Job::new("a".into(), 5, ThemeConfig::default()));
        let live = reg.insert(Job::new("b".into(), 5, ThemeConfig::default()));
        reg.set_status(done, JobStatus::Running);
        reg.set_status(done, JobStatus::Done);
        reg.set_status(live, JobStatus::Running);

        let swept = reg.sweep_expired(Utc::now());
        assert_eq!(swept, vec![done]);
        assert!(reg.get(done).is_none());
        assert!(reg.get(live).is_some());
    }
}
