//! Background job records for long-running ingestion runs.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::GraphResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Full,
    Incremental,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub phase: String,
    pub files_processed: usize,
    pub total_files: usize,
    pub percent: f64,
    pub message: String,
}

impl JobProgress {
    pub fn new(phase: &str, files_processed: usize, total_files: usize, message: impl Into<String>) -> Self {
        let percent = if total_files == 0 {
            0.0
        } else {
            (files_processed as f64 / total_files as f64 * 1000.0).round() / 10.0
        };
        Self {
            phase: phase.to_string(),
            files_processed,
            total_files,
            percent,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Where job records live between polls.
pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> GraphResult<Option<Job>>;

    fn put(&self, job: Job) -> GraphResult<()>;

    /// Most recently created first.
    fn list(&self, limit: usize) -> GraphResult<Vec<Job>>;

    /// Apply `f` to a stored job. Returns false when the id is unknown.
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Job)) -> GraphResult<bool> {
        match self.get(id)? {
            Some(mut job) => {
                f(&mut job);
                self.put(job)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn get(&self, id: &str) -> GraphResult<Option<Job>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    fn put(&self, job: Job) -> GraphResult<()> {
        self.jobs.write().insert(job.id.clone(), job);
        Ok(())
    }

    fn list(&self, limit: usize) -> GraphResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Job)) -> GraphResult<bool> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) => {
                f(job);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
