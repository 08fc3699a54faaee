use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Notify, RwLock},
    time::{Instant, timeout_at},
};
use tracing::{info, warn};

use super::io::{ensure_parent_dir, load_or_default, read_json_file, write_json_file};
use super::memory::TaskState;
use super::{Retention, StorageResult, Task, TaskStatus, TaskStore};
use crate::model::Document;

#[derive(Clone, Debug)]
pub struct JsonTaskStoreConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
    pub workspace: Option<String>,
    pub retention: Retention,
}

/// Index entry for a result kept in its own file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResult {
    file: String,
}

/// Task store persisted to `task_store_<namespace>.json`.
///
/// Every mutation is flushed before the call returns, so pending tasks
/// survive a restart. Results live one per file under
/// `task_results_<namespace>/` and only their expiry is indexed, so the
/// main file stays small. One process owns both.
pub struct JsonTaskStore {
    final_namespace: String,
    file_path: PathBuf,
    results_dir: PathBuf,
    data: RwLock<TaskState<StoredResult>>,
    dirty: AtomicBool,
    notify: Notify,
    retention: Retention,
}

impl JsonTaskStore {
    pub fn new(config: JsonTaskStoreConfig) -> Self {
        let JsonTaskStoreConfig {
            working_dir,
            namespace,
            workspace,
            retention,
        } = config;

        let (workspace_prefix, workspace_dir) = match workspace.as_deref() {
            Some(ws) if !ws.is_empty() => (ws.to_string(), working_dir.join(ws)),
            _ => ("_".to_string(), working_dir.clone()),
        };

        Self {
            final_namespace: format!("{workspace_prefix}_{namespace}"),
            file_path: workspace_dir.join(format!("task_store_{namespace}.json")),
            results_dir: workspace_dir.join(format!("task_results_{namespace}")),
            data: RwLock::new(TaskState::default()),
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
            retention,
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn namespace(&self) -> &str {
        &self.final_namespace
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    fn result_path(&self, file: &str) -> PathBuf {
        self.results_dir.join(file)
    }

    async fn remove_result_files(&self, task_ids: &[String]) {
        for task_id in task_ids {
            let path = self.result_path(&result_file_name(task_id));
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %err, path = %path.display(), "failed to remove expired result");
                }
            }
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }

    async fn sync_if_dirty(&self) -> Result<()> {
        if !self.dirty.swap(false, AtomicOrdering::SeqCst) {
            return Ok(());
        }
        let guard = self.data.read().await;
        if let Err(err) = write_json_file(&self.file_path, &*guard).await {
            self.mark_dirty();
            return Err(err).with_context(|| format!("failed to persist {}", self.final_namespace));
        }
        Ok(())
    }

    async fn try_pop(&self) -> Result<Option<Task>> {
        let task = self.data.write().await.queue.pop_front();
        if task.is_some() {
            self.mark_dirty();
            self.sync_if_dirty().await?;
        }
        Ok(task)
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn initialize(&self) -> StorageResult<()> {
        ensure_parent_dir(&self.file_path).await?;
        let mut state: TaskState<StoredResult> = load_or_default(&self.file_path).await?;
        let purged = state.purge_expired();
        let queued = state.queue.len();
        *self.data.write().await = state;
        self.dirty.store(purged.total() > 0, AtomicOrdering::SeqCst);
        self.sync_if_dirty().await?;
        self.remove_result_files(&purged.results).await;
        let purged = purged.total();
        info!(
            namespace = %self.final_namespace,
            queued,
            purged,
            "task store loaded"
        );
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        self.sync_if_dirty().await
    }

    async fn push_task(&self, task: Task) -> StorageResult<()> {
        let task_id = task.task_id.clone();
        self.data.write().await.push(task, &self.retention);
        self.mark_dirty();
        if let Err(err) = self.sync_if_dirty().await {
            // not persisted, so not queued
            self.data.write().await.withdraw(&task_id);
            return Err(err);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn pop_next_task(&self, timeout: Duration) -> StorageResult<Option<Task>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_pop().await? {
                return Ok(Some(task));
            }
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> StorageResult<()> {
        self.data
            .write()
            .await
            .set_status(task_id, status, &self.retention);
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn get_status(&self, task_id: &str) -> StorageResult<Option<TaskStatus>> {
        Ok(self.data.read().await.status(task_id))
    }

    async fn store_result(&self, task_id: &str, document: &Document) -> StorageResult<()> {
        let file = result_file_name(task_id);
        ensure!(
            is_safe_file_stem(task_id),
            "task id {task_id:?} cannot name a result file"
        );
        write_json_file(&self.result_path(&file), document).await?;

        self.data
            .write()
            .await
            .store_result(task_id, StoredResult { file }, &self.retention);
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn get_result(&self, task_id: &str) -> StorageResult<Option<Document>> {
        let Some(stored) = self.data.read().await.result(task_id) else {
            return Ok(None);
        };
        read_json_file(&self.result_path(&stored.file)).await
    }

    async fn purge_expired(&self) -> StorageResult<usize> {
        let purged = self.data.write().await.purge_expired();
        if purged.total() > 0 {
            self.mark_dirty();
            self.sync_if_dirty().await?;
            self.remove_result_files(&purged.results).await;
        }
        Ok(purged.total())
    }

    async fn queue_len(&self) -> StorageResult<usize> {
        Ok(self.data.read().await.queue.len())
    }
}

fn result_file_name(task_id: &str) -> String {
    format!("{task_id}.json")
}

fn is_safe_file_stem(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
