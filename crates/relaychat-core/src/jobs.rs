//! Background job execution.
//!
//! Enqueue writes a `pending` row and spawns a detached worker that flips
//! the row to `processing`, runs the registered [`JobRunner`], then records
//! `completed` with the result or `failed` with the error message. Spawned
//! tasks are held in a [`TaskTracker`] so a host can drain in-flight jobs
//! before shutdown instead of dropping them mid-write.
//!
//! Job types are a closed set: enqueueing a type with no registered runner
//! is a validation error, not a row that sits `pending` forever.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::store::{filters, OrderBy, RecordStore};

pub const TABLE: &str = "jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Executes one job type. Implementations own their own side effects; the
/// service only records lifecycle transitions around the call.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> anyhow::Result<Value>;
}

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn RecordStore>,
    runners: Arc<HashMap<String, Arc<dyn JobRunner>>>,
    tracker: TaskTracker,
}

impl JobService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            runners: Arc::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a runner for a job type. Builder-style, called at wiring time.
    pub fn with_runner(mut self, job_type: &str, runner: Arc<dyn JobRunner>) -> Self {
        let mut runners: HashMap<String, Arc<dyn JobRunner>> = (*self.runners).clone();
        runners.insert(job_type.to_string(), runner);
        self.runners = Arc::new(runners);
        self
    }

    /// Persist a pending job and spawn its worker. Returns the row as
    /// enqueued; poll `get_job` for the outcome.
    pub async fn enqueue(
        &self,
        user_id: &str,
        job_type: &str,
        payload: Value,
    ) -> CoreResult<Job> {
        let runner = self.runners.get(job_type).cloned().ok_or_else(|| {
            CoreError::Validation(format!("unknown job type: {job_type}"))
        })?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let row = serde_json::to_value(&job).map_err(|e| CoreError::Store(e.to_string()))?;
        self.store.insert(TABLE, row).await?;
        info!(job_id = %job.id, job_type, "Job enqueued");

        let store = self.store.clone();
        let worker_job = job.clone();
        self.tracker.spawn(async move {
            execute(store, runner, worker_job).await;
        });

        Ok(job)
    }

    pub async fn get_job(&self, user_id: &str, job_id: &str) -> CoreResult<Job> {
        let rows = self
            .store
            .select(
                TABLE,
                &filters([("id", json!(job_id)), ("user_id", json!(user_id))]),
                Some(1),
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .map(parse_row)
            .ok_or(CoreError::not_found("job"))?
    }

    /// The user's jobs, newest first, optionally narrowed to one status.
    pub async fn list_jobs(
        &self,
        user_id: &str,
        status: Option<JobStatus>,
    ) -> CoreResult<Vec<Job>> {
        let mut f = filters([("user_id", json!(user_id))]);
        if let Some(status) = status {
            f.insert("status".into(), json!(status));
        }
        let rows = self
            .store
            .select(TABLE, &f, None, Some(OrderBy::desc("created_at")))
            .await?;
        rows.into_iter().map(parse_row).collect()
    }

    /// Wait for every spawned worker to finish. Host shutdown hook.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn execute(store: Arc<dyn RecordStore>, runner: Arc<dyn JobRunner>, job: Job) {
    if let Err(e) = transition(&store, &job.id, JobStatus::Processing, None, None).await {
        error!(job_id = %job.id, error = %e, "Failed to mark job processing");
        return;
    }

    match runner.run(&job).await {
        Ok(result) => {
            info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
            if let Err(e) =
                transition(&store, &job.id, JobStatus::Completed, Some(result), None).await
            {
                error!(job_id = %job.id, error = %e, "Failed to record job result");
            }
        }
        Err(run_error) => {
            error!(job_id = %job.id, job_type = %job.job_type, error = %run_error, "Job failed");
            if let Err(e) = transition(
                &store,
                &job.id,
                JobStatus::Failed,
                None,
                Some(run_error.to_string()),
            )
            .await
            {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
            }
        }
    }
}

async fn transition(
    store: &Arc<dyn RecordStore>,
    job_id: &str,
    status: JobStatus,
    result: Option<Value>,
    error: Option<String>,
) -> CoreResult<()> {
    let mut patch = serde_json::Map::new();
    patch.insert("status".into(), json!(status));
    patch.insert("updated_at".into(), json!(Utc::now()));
    if let Some(result) = result {
        patch.insert("result".into(), result.into());
    }
    if let Some(error) = error {
        patch.insert("error".into(), json!(error));
    }
    store
        .update(TABLE, Value::Object(patch), &filters([("id", json!(job_id))]))
        .await?;
    Ok(())
}

fn parse_row(row: Value) -> CoreResult<Job> {
    serde_json::from_value(row).map_err(|e| CoreError::Store(format!("malformed job row: {e}")))
}
