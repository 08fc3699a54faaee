use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use docnorm::{
    ChunkContent, Registry,
    backends::{Backend, DocxBackend, HtmlBackend},
    enhancers::{Enhancer, PassthroughEnhancer},
    pipeline::{
        EnrichmentOptions, Enricher, ExtractionOptions, Intake, RawDocument, TaskOutcome, Worker,
        WorkerConfig,
    },
    storage::{MemoryTaskStore, Task, TaskStatus, TaskStore},
};

const PAGE: &str = r#"<html><body>
<h1>Field Notes</h1>
<p>Collected on site.</p>
<table><caption>Counts</caption>
  <tr><th>Species</th><th>Count</th></tr>
  <tr><td>Heron</td><td>3</td></tr>
</table>
<img src="https://example.org/heron.jpg" alt="A heron">
</body></html>"#;

struct StuckBackend;

impl Backend for StuckBackend {
    fn name(&self) -> &'static str {
        "stuck"
    }

    fn convert(&self, _path: &Path) -> Result<RawDocument> {
        std::thread::sleep(Duration::from_millis(1000));
        Ok(RawDocument::new("stuck"))
    }
}

fn test_registry() -> Arc<Registry> {
    let mut builder = Registry::builder();
    builder
        .register_parser(["html"], "html", || Arc::new(HtmlBackend))
        .register_parser(["docx"], "docx", || Arc::new(DocxBackend))
        .register_parser(["slow"], "stuck", || Arc::new(StuckBackend))
        .register_enhancer(["table", "image", "formula"], "passthrough", || {
            Arc::new(PassthroughEnhancer) as Arc<dyn Enhancer>
        });
    Arc::new(builder.build())
}

fn test_worker(store: Arc<dyn TaskStore>) -> Worker {
    let registry = test_registry();
    let enricher = Enricher::new(registry.clone(), EnrichmentOptions::default());
    Worker::new(
        registry,
        store,
        enricher,
        ExtractionOptions {
            conversion_timeout: Duration::from_millis(250),
        },
        WorkerConfig {
            poll_timeout: Duration::from_millis(20),
            idle_sleep: Duration::from_millis(10),
        },
    )
}

async fn wait_for_terminal(store: &dyn TaskStore, task_id: &str) -> Result<TaskStatus> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(status) = store.get_status(task_id).await? {
            if status.is_terminal() {
                return Ok(status);
            }
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("task {task_id} did not finish");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn html_task_completes_with_result() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("notes.html");
    tokio::fs::write(&path, PAGE).await?;

    let store = Arc::new(MemoryTaskStore::default());
    let worker = test_worker(store.clone());
    let task = Task::new(&path);
    store.push_task(task.clone()).await?;
    let task = store.pop_next_task(Duration::ZERO).await?.expect("queued task");

    assert_eq!(worker.process_task(task.clone()).await, TaskOutcome::Completed);
    assert_eq!(store.get_status(&task.task_id).await?, Some(TaskStatus::Completed));

    let document = store.get_result(&task.task_id).await?.expect("result stored");
    document.validate()?;
    assert!(document.success);
    assert_eq!(document.title.as_deref(), Some("Field Notes"));
    assert_eq!(document.texts.len(), 2);
    assert_eq!(document.images.len(), 1);
    assert_eq!(document.tables.len(), 1);

    let ChunkContent::Table(table) = &document.tables[0].content else {
        panic!("table chunk expected");
    };
    assert_eq!(table.grid, [["Species", "Count"], ["Heron", "3"]]);
    assert_eq!(table.column_headers, ["Species", "Count"]);
    assert_eq!(table.caption, ["Counts"]);
    Ok(())
}

#[tokio::test]
async fn unsupported_extension_fails_task() -> Result<()> {
    let store = Arc::new(MemoryTaskStore::default());
    let worker = test_worker(store.clone());
    let task = Task::new("/in/ledger.CSV");

    assert_eq!(worker.process_task(task.clone()).await, TaskOutcome::Unsupported);
    assert_eq!(store.get_status(&task.task_id).await?, Some(TaskStatus::Failed));

    let document = store.get_result(&task.task_id).await?.expect("failure recorded");
    assert!(!document.success);
    assert_eq!(document.chunk_count(), 0);
    let message = document.error_message.unwrap_or_default();
    assert!(message.contains(".csv"), "{message}");
    Ok(())
}

#[tokio::test]
async fn unreadable_document_fails_task() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("broken.docx");
    tokio::fs::write(&path, b"not a zip archive").await?;

    let store = Arc::new(MemoryTaskStore::default());
    let worker = test_worker(store.clone());
    let task = Task::new(&path);

    assert_eq!(worker.process_task(task.clone()).await, TaskOutcome::Failed);
    assert_eq!(store.get_status(&task.task_id).await?, Some(TaskStatus::Failed));
    let document = store.get_result(&task.task_id).await?.expect("failure recorded");
    assert!(!document.success);
    assert!(document.error_message.is_some());
    Ok(())
}

#[tokio::test]
async fn conversion_timeout_fails_task() -> Result<()> {
    let store = Arc::new(MemoryTaskStore::default());
    let worker = test_worker(store.clone());
    let task = Task::new("/in/report.slow");

    assert_eq!(worker.process_task(task.clone()).await, TaskOutcome::Failed);
    let document = store.get_result(&task.task_id).await?.expect("failure recorded");
    assert!(document.error_message.unwrap_or_default().contains("timed out"));
    Ok(())
}

#[tokio::test]
async fn run_loop_drains_queue_and_stops_on_cancel() -> Result<()> {
    let dir = TempDir::new()?;
    let good = dir.path().join("good.html");
    tokio::fs::write(&good, PAGE).await?;

    let store = Arc::new(MemoryTaskStore::default());
    let worker = test_worker(store.clone());
    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    // one bad task must not stop the loop
    let bad = Task::new(dir.path().join("sheet.csv"));
    let ok = Task::new(&good);
    store.push_task(bad.clone()).await?;
    store.push_task(ok.clone()).await?;

    assert_eq!(wait_for_terminal(store.as_ref(), &bad.task_id).await?, TaskStatus::Failed);
    assert_eq!(wait_for_terminal(store.as_ref(), &ok.task_id).await?, TaskStatus::Completed);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;
    assert_eq!(store.queue_len().await?, 0);
    Ok(())
}

#[tokio::test]
async fn run_loop_picks_up_dropped_files() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input");
    let intake = Intake::new(&input).await?;

    let store = Arc::new(MemoryTaskStore::default());
    let worker = test_worker(store.clone()).with_intake(intake);
    tokio::fs::write(input.join("dropped.html"), PAGE).await?;

    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !input.join("__enqueued__").join("dropped.html").exists() {
        assert!(tokio::time::Instant::now() < deadline, "file was never claimed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let queued_or_done = tokio::time::timeout(Duration::from_secs(5), async {
        while store.queue_len().await? > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::Ok(())
    })
    .await;
    assert!(queued_or_done.is_ok());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;
    assert!(!input.join("dropped.html").exists());
    Ok(())
}
