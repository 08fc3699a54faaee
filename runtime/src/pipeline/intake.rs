//! Turns files dropped into the input directory into queued tasks.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::storage::{Task, TaskStore};

pub const ENQUEUED_DIR: &str = "__enqueued__";

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    /// Regular files directly inside `dir`, sorted by name.
    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct FsFileRepository;

#[async_trait]
impl FileRepository for FsFileRepository {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create directory {}", path.display()))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Clone)]
pub struct Intake {
    input_dir: PathBuf,
    file_repo: Arc<dyn FileRepository>,
}

impl Intake {
    pub async fn new(input_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_repository(input_dir, Arc::new(FsFileRepository)).await
    }

    pub async fn with_repository(
        input_dir: impl AsRef<Path>,
        file_repo: Arc<dyn FileRepository>,
    ) -> Result<Self> {
        let input_dir = input_dir.as_ref().to_path_buf();
        file_repo
            .create_dir_all(&input_dir.join(ENQUEUED_DIR))
            .await
            .with_context(|| format!("failed to prepare input directory {}", input_dir.display()))?;
        Ok(Self {
            input_dir,
            file_repo,
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Moves every waiting file under `__enqueued__` and queues a task for it.
    /// Hidden and temporary files are left alone. A file whose task cannot be
    /// queued is moved back for the next scan.
    pub async fn scan(&self, store: &dyn TaskStore) -> Result<Vec<Task>> {
        let mut queued = Vec::new();
        for path in self.file_repo.list_files(&self.input_dir).await? {
            if is_ignored(&path) {
                continue;
            }
            let target = match self.move_to_enqueued(&path).await {
                Ok(target) => target,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to claim input file");
                    continue;
                }
            };

            let task = Task::new(&target);
            if let Err(err) = store.push_task(task.clone()).await {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "failed to queue input file, returning it"
                );
                if let Err(err) = self.file_repo.rename(&target, &path).await {
                    warn!(path = %target.display(), error = %err, "failed to return input file");
                }
                continue;
            }
            info!(
                task_id = %task.task_id,
                path = %task.file_path.display(),
                "queued input file"
            );
            queued.push(task);
        }
        Ok(queued)
    }

    pub async fn move_to_enqueued(&self, file_path: &Path) -> Result<PathBuf> {
        let parent = file_path
            .parent()
            .ok_or_else(|| anyhow!("file has no parent directory"))?;
        let enqueued_dir = parent.join(ENQUEUED_DIR);
        self.file_repo.create_dir_all(&enqueued_dir).await?;

        let unique_name = self.unique_filename(&enqueued_dir, file_path)?;
        let target = enqueued_dir.join(&unique_name);
        self.file_repo.rename(file_path, &target).await?;
        Ok(target)
    }

    /// `name.ext`, then `name_1.ext`, `name_2.ext`, ... until one is free.
    fn unique_filename(&self, dir: &Path, file_path: &Path) -> Result<String> {
        let original = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("file name is missing"))?;
        if !self.file_repo.exists(&dir.join(original)) {
            return Ok(original.to_owned());
        }

        let as_path = Path::new(original);
        let stem = as_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(original);
        let ext = as_path.extension().and_then(|e| e.to_str());

        (1usize..)
            .map(|counter| match ext {
                Some(ext) => format!("{stem}_{counter}.{ext}"),
                None => format!("{stem}_{counter}"),
            })
            .find(|candidate| !self.file_repo.exists(&dir.join(candidate)))
            .ok_or_else(|| anyhow!("no free name for {original}"))
    }
}

fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    name.starts_with('.') || name.starts_with("~$") || name.ends_with(".tmp") || name.ends_with(".part")
}
