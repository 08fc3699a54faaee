use std::{fmt, path::PathBuf, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Document;

pub mod io;
pub mod json_store;
pub mod memory;

pub use json_store::{JsonTaskStore, JsonTaskStoreConfig};
pub use memory::MemoryTaskStore;

pub type StorageResult<T> = Result<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            task_id: generate_task_id(),
            file_path: file_path.into(),
            created_at: Utc::now(),
        }
    }
}

pub fn generate_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

/// How long statuses and results stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub status_ttl: Duration,
    pub result_ttl: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            status_ttl: Duration::from_secs(3600),
            result_ttl: Duration::from_secs(86400),
        }
    }
}

/// Expiring value as kept by the stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Expiring<T> {
    pub value: T,
    pub expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { value, expires_at }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Task queue plus status and result store shared by workers.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    /// Enqueues `task` and marks it pending.
    async fn push_task(&self, task: Task) -> StorageResult<()>;

    /// Waits up to `timeout` for the next task.
    async fn pop_next_task(&self, timeout: Duration) -> StorageResult<Option<Task>>;

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> StorageResult<()>;
    async fn get_status(&self, task_id: &str) -> StorageResult<Option<TaskStatus>>;

    async fn store_result(&self, task_id: &str, document: &Document) -> StorageResult<()>;
    async fn get_result(&self, task_id: &str) -> StorageResult<Option<Document>>;

    /// Drops expired statuses and results; returns how many were removed.
    async fn purge_expired(&self) -> StorageResult<usize>;

    async fn queue_len(&self) -> StorageResult<usize>;
}
