use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, Notify},
    time::{Instant, timeout_at},
};

use super::{Expiring, Retention, StorageResult, Task, TaskStatus, TaskStore};
use crate::model::Document;

/// Queue, statuses and results. Shared by the in-memory and JSON stores;
/// `R` is what a result entry holds.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub(crate) struct TaskState<R = Document> {
    #[serde(default)]
    pub queue: VecDeque<Task>,
    #[serde(default)]
    pub statuses: HashMap<String, Expiring<TaskStatus>>,
    #[serde(default)]
    pub results: HashMap<String, Expiring<R>>,
}

impl<R> Default for TaskState<R> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            statuses: HashMap::new(),
            results: HashMap::new(),
        }
    }
}

/// What one purge removed.
#[derive(Debug, Default)]
pub(crate) struct Purged {
    pub statuses: usize,
    pub results: Vec<String>,
}

impl Purged {
    pub fn total(&self) -> usize {
        self.statuses + self.results.len()
    }
}

impl<R: Clone> TaskState<R> {
    pub fn push(&mut self, task: Task, retention: &Retention) {
        self.statuses.insert(
            task.task_id.clone(),
            Expiring::new(TaskStatus::Pending, retention.status_ttl),
        );
        self.queue.push_back(task);
    }

    /// Undoes a [`push`](Self::push) whose task never became visible.
    pub fn withdraw(&mut self, task_id: &str) {
        if let Some(pos) = self.queue.iter().rposition(|task| task.task_id == task_id) {
            self.queue.remove(pos);
        }
        self.statuses.remove(task_id);
    }

    pub fn set_status(&mut self, task_id: &str, status: TaskStatus, retention: &Retention) {
        self.statuses.insert(
            task_id.to_string(),
            Expiring::new(status, retention.status_ttl),
        );
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let now = Utc::now();
        self.statuses
            .get(task_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value)
    }

    pub fn store_result(&mut self, task_id: &str, value: R, retention: &Retention) {
        self.results.insert(
            task_id.to_string(),
            Expiring::new(value, retention.result_ttl),
        );
    }

    pub fn result(&self, task_id: &str) -> Option<R> {
        let now = Utc::now();
        self.results
            .get(task_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn purge_expired(&mut self) -> Purged {
        let now = Utc::now();
        let statuses_before = self.statuses.len();
        self.statuses.retain(|_, entry| entry.is_live(now));

        let mut results = Vec::new();
        self.results.retain(|task_id, entry| {
            let live = entry.is_live(now);
            if !live {
                results.push(task_id.clone());
            }
            live
        });
        Purged {
            statuses: statuses_before - self.statuses.len(),
            results,
        }
    }
}

/// Process-local store; waiting pollers are woken on push.
pub struct MemoryTaskStore {
    state: Mutex<TaskState>,
    notify: Notify,
    retention: Retention,
}

impl MemoryTaskStore {
    pub fn new(retention: Retention) -> Self {
        Self {
            state: Mutex::new(TaskState::default()),
            notify: Notify::new(),
            retention,
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn push_task(&self, task: Task) -> StorageResult<()> {
        self.state.lock().await.push(task, &self.retention);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop_next_task(&self, timeout: Duration) -> StorageResult<Option<Task>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.state.lock().await.queue.pop_front() {
                return Ok(Some(task));
            }
            // a push between the check and here leaves a stored permit
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> StorageResult<()> {
        self.state
            .lock()
            .await
            .set_status(task_id, status, &self.retention);
        Ok(())
    }

    async fn get_status(&self, task_id: &str) -> StorageResult<Option<TaskStatus>> {
        Ok(self.state.lock().await.status(task_id))
    }

    async fn store_result(&self, task_id: &str, document: &Document) -> StorageResult<()> {
        self.state
            .lock()
            .await
            .store_result(task_id, document.clone(), &self.retention);
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> StorageResult<Option<Document>> {
        Ok(self.state.lock().await.result(task_id))
    }

    async fn purge_expired(&self) -> StorageResult<usize> {
        Ok(self.state.lock().await.purge_expired().total())
    }

    async fn queue_len(&self) -> StorageResult<usize> {
        Ok(self.state.lock().await.queue.len())
    }
}
