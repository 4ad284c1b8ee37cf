//! Batch reconciliation engine
//!
//! Orchestrates per-work resolve/persist against the catalog for many IDs
//! concurrently, streaming one progress event per settlement. Per-item
//! failures are recorded in the batch outcome and never abort the run; only
//! enumeration failures are fatal to a job.
//!
//! The event channel is best-effort: a client that tears down its stream
//! stops observing, but the job keeps running to completion. Job state lives
//! only in this task — a process restart loses in-flight bookkeeping but not
//! committed catalog writes.

use crate::config::SyncConfig;
use crate::db::works::{self, WorkRecord};
use crate::queue::TaskQueue;
use crate::resolver::{LibraryScanner, ResolveError, StorefrontClient};
use futures::StreamExt;
use koe_common::events::{percent, BatchStats, FailedItem, ItemStatus, LogLevel, ProgressEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a batch run does per ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Insert new catalog entries (idempotent upsert by ID)
    Create,
    /// Re-resolve and update entries already in the catalog
    Refresh,
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchMode::Create => "create",
            BatchMode::Refresh => "refresh",
        }
    }
}

impl std::str::FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(BatchMode::Create),
            "refresh" => Ok(BatchMode::Refresh),
            other => Err(format!("unknown batch mode: {}", other)),
        }
    }
}

/// Target selection for one batch run
#[derive(Debug, Clone)]
pub enum BatchTargets {
    /// Explicit, pre-validated ID list (client input order)
    Ids(Vec<String>),
    /// Every library work not yet in the catalog
    WholeLibrary,
}

/// Fatal enumeration-phase errors; everything later is per-item
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("cannot enumerate library root: {0}")]
    Library(#[from] std::io::Error),

    #[error("cannot query catalog: {0}")]
    Catalog(#[from] anyhow::Error),
}

/// Catalog/filesystem delta report
#[derive(Debug, Clone, Serialize)]
pub struct LibraryStatus {
    /// Catalog IDs with a folder on disk
    pub stored: Vec<String>,
    /// Catalog IDs missing from the library (candidates for cleanup)
    pub orphaned: Vec<String>,
}

/// Compare the IDs physically present against the IDs in the catalog.
pub fn categorize_works(disk_ids: &[String], catalog_ids: Vec<String>) -> LibraryStatus {
    let on_disk: HashSet<&str> = disk_ids.iter().map(String::as_str).collect();
    let (stored, orphaned) = catalog_ids
        .into_iter()
        .partition(|id| on_disk.contains(id.as_str()));
    LibraryStatus { stored, orphaned }
}

/// Stored/orphaned delta between the catalog and the library filesystem.
/// Never touches the storefront, so callers pass a scanner rather than
/// constructing a full engine.
pub async fn library_status(
    db: &SqlitePool,
    scanner: &LibraryScanner,
) -> Result<LibraryStatus, EnumerationError> {
    let disk_ids = scanner.work_ids().await?;
    let catalog_ids = works::list_work_ids(db).await?;
    Ok(categorize_works(&disk_ids, catalog_ids))
}

/// Deduplicate while preserving the caller's input order.
fn dedupe_preserving_order(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Batch reconciliation engine, one instance per job
pub struct BatchEngine {
    db: SqlitePool,
    scanner: LibraryScanner,
    storefront: StorefrontClient,
    queue: TaskQueue,
}

impl BatchEngine {
    pub fn new(db: SqlitePool, config: Arc<SyncConfig>) -> anyhow::Result<Self> {
        let storefront = StorefrontClient::new(config.storefront_base.clone())
            .map_err(|e| anyhow::anyhow!("storefront client: {}", e))?;
        let queue = TaskQueue::new(config.batch_concurrency);
        let scanner = LibraryScanner::new(config);

        Ok(Self {
            db,
            scanner,
            storefront,
            queue,
        })
    }

    /// Run one batch job to completion, emitting progress on `tx`.
    ///
    /// Event contract: one `start`, one `progress` per item settlement (plus
    /// in-flight markers), exactly one terminal `end`/`error`.
    pub async fn run(
        &self,
        mode: BatchMode,
        targets: BatchTargets,
        tx: mpsc::Sender<ProgressEvent>,
    ) {
        let ids = match self.enumerate(&targets).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Batch enumeration failed");
                send(
                    &tx,
                    ProgressEvent::Error {
                        message: "batch enumeration failed".to_string(),
                        details: e.to_string(),
                    },
                )
                .await;
                return;
            }
        };

        let total = ids.len();
        info!(total, mode = mode.as_str(), "Batch run starting");
        send(
            &tx,
            ProgressEvent::Start {
                total,
                message: format!("Processing {} works ({})", total, mode.as_str()),
            },
        )
        .await;

        let settled = AtomicUsize::new(0);
        let mut success: Vec<String> = Vec::new();
        let mut failed: Vec<FailedItem> = Vec::new();

        let tasks: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let task_tx = tx.clone();
                let settled = &settled;
                async move {
                    // In-flight marker; `current` is the settle count at admission
                    let current = settled.load(Ordering::SeqCst);
                    send(
                        &task_tx,
                        ProgressEvent::Progress {
                            id: id.clone(),
                            status: ItemStatus::Processing,
                            message: None,
                            current,
                            total,
                            percent: percent(current, total),
                        },
                    )
                    .await;

                    let outcome = self.process_one(&id, mode).await;
                    (id, outcome)
                }
            })
            .collect();

        // Emission order is settlement order, not input order
        let mut stream = self.queue.run_unordered(tasks);
        while let Some((_index, (id, outcome))) = stream.next().await {
            let current = settled.fetch_add(1, Ordering::SeqCst) + 1;
            match outcome {
                Ok(title) => {
                    debug!(work_id = %id, title = %title, "Work synchronized");
                    send(
                        &tx,
                        ProgressEvent::Progress {
                            id: id.clone(),
                            status: ItemStatus::Success,
                            message: Some(title),
                            current,
                            total,
                            percent: percent(current, total),
                        },
                    )
                    .await;
                    success.push(id);
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!(work_id = %id, error = %error, "Work failed");
                    send(
                        &tx,
                        ProgressEvent::Log {
                            level: LogLevel::Error,
                            message: format!("{}: {}", id, error),
                        },
                    )
                    .await;
                    send(
                        &tx,
                        ProgressEvent::Progress {
                            id: id.clone(),
                            status: ItemStatus::Failed,
                            message: Some(error.clone()),
                            current,
                            total,
                            percent: percent(current, total),
                        },
                    )
                    .await;
                    failed.push(FailedItem { id, error });
                }
            }
        }
        drop(stream);

        let message = format!(
            "Batch complete: {} succeeded, {} failed",
            success.len(),
            failed.len()
        );
        info!(
            succeeded = success.len(),
            failed = failed.len(),
            "Batch run finished"
        );
        send(
            &tx,
            ProgressEvent::End {
                message,
                stats: Some(BatchStats { success, failed }),
            },
        )
        .await;
    }

    /// Resolve the target ID set. Explicit lists are deduplicated preserving
    /// input order; whole-library mode targets disk works absent from the
    /// catalog.
    async fn enumerate(&self, targets: &BatchTargets) -> Result<Vec<String>, EnumerationError> {
        match targets {
            BatchTargets::Ids(ids) => Ok(dedupe_preserving_order(ids)),
            BatchTargets::WholeLibrary => {
                let disk_ids = self.scanner.work_ids().await?;
                let catalog: HashSet<String> = works::list_work_ids(&self.db)
                    .await?
                    .into_iter()
                    .collect();
                Ok(disk_ids
                    .into_iter()
                    .filter(|id| !catalog.contains(id))
                    .collect())
            }
        }
    }

    /// One item's resolve → map → upsert sequence. Every error here becomes
    /// a per-item failure at the call site.
    async fn process_one(&self, id: &str, mode: BatchMode) -> anyhow::Result<String> {
        if mode == BatchMode::Refresh && works::get_work(&self.db, id).await?.is_none() {
            anyhow::bail!("work {} is not in the catalog", id);
        }

        let info = self.storefront.fetch_work_info(id).await?;

        let tracks = match self.scanner.track_tree(id).await {
            Ok(tracks) => tracks,
            // A missing library root only means there are no local tracks
            Err(ResolveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(work_id = %id, "No library folder, storing metadata only");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let title = info.title.clone();
        let record = WorkRecord {
            id: info.id,
            title: info.title,
            circle: info.circle,
            cast: info.cast,
            illustrators: info.illustrators,
            genres: info.genres,
            intro: info.intro,
            release_date: info.release_date,
            price: info.price,
            dl_count: info.dl_count,
            tracks,
        };
        works::upsert_work(&self.db, &record).await?;

        Ok(title)
    }
}

/// Best-effort emission: a dropped receiver means the client abandoned the
/// stream; the job continues unobserved.
async fn send(tx: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    if tx.send(event).await.is_err() {
        debug!("Progress receiver dropped; batch continues unobserved");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_dedupe_preserves_input_order() {
        let ids = vec![
            "RJ000002".to_string(),
            "RJ000001".to_string(),
            "RJ000002".to_string(),
            "RJ000003".to_string(),
            "RJ000001".to_string(),
        ];
        assert_eq!(
            dedupe_preserving_order(&ids),
            vec!["RJ000002", "RJ000001", "RJ000003"]
        );
    }

    #[test]
    fn test_categorize_orphaned_vs_stored() {
        let disk = vec!["RJ000001".to_string(), "RJ000002".to_string()];
        let catalog = vec!["RJ000002".to_string(), "RJ000003".to_string()];

        let status = categorize_works(&disk, catalog);
        assert_eq!(status.stored, vec!["RJ000002"]);
        assert_eq!(status.orphaned, vec!["RJ000003"]);
    }

    async fn test_engine(library_root: std::path::PathBuf) -> (tempfile::TempDir, BatchEngine) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database_pool(&dir.path().join("koe.db"))
            .await
            .unwrap();
        let engine = BatchEngine::new(pool, Arc::new(test_config(library_root))).unwrap();
        (dir, engine)
    }

    async fn collect_events(
        engine: &BatchEngine,
        mode: BatchMode,
        targets: BatchTargets,
    ) -> Vec<ProgressEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        engine.run(mode, targets, tx).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_library_status_delta() {
        let library = tempfile::tempdir().unwrap();
        std::fs::create_dir(library.path().join("RJ000001 a")).unwrap();

        let db_dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database_pool(&db_dir.path().join("koe.db"))
            .await
            .unwrap();
        for id in ["RJ000001", "RJ000002"] {
            works::upsert_work(
                &pool,
                &WorkRecord {
                    id: id.to_string(),
                    title: "t".to_string(),
                    circle: "c".to_string(),
                    cast: vec![],
                    illustrators: vec![],
                    genres: vec![],
                    intro: None,
                    release_date: None,
                    price: None,
                    dl_count: None,
                    tracks: None,
                },
            )
            .await
            .unwrap();
        }

        let scanner = LibraryScanner::new(Arc::new(test_config(library.path().to_path_buf())));
        let status = library_status(&pool, &scanner).await.unwrap();
        assert_eq!(status.stored, vec!["RJ000001"]);
        assert_eq!(status.orphaned, vec!["RJ000002"]);
    }

    #[tokio::test]
    async fn test_whole_library_enumeration_targets_uncatalogued_works() {
        let library = tempfile::tempdir().unwrap();
        std::fs::create_dir(library.path().join("RJ000001 a")).unwrap();
        std::fs::create_dir(library.path().join("RJ000002 b")).unwrap();

        let (_db_dir, engine) = test_engine(library.path().to_path_buf()).await;
        works::upsert_work(
            &engine.db,
            &WorkRecord {
                id: "RJ000002".to_string(),
                title: "t".to_string(),
                circle: "c".to_string(),
                cast: vec![],
                illustrators: vec![],
                genres: vec![],
                intro: None,
                release_date: None,
                price: None,
                dl_count: None,
                tracks: None,
            },
        )
        .await
        .unwrap();

        let ids = engine
            .enumerate(&BatchTargets::WholeLibrary)
            .await
            .unwrap();
        assert_eq!(ids, vec!["RJ000001"]);
    }

    #[tokio::test]
    async fn test_enumeration_failure_emits_terminal_error() {
        let missing = std::path::PathBuf::from("/nonexistent/koe/library");
        let (_db_dir, engine) = test_engine(missing).await;

        let events =
            collect_events(&engine, BatchMode::Create, BatchTargets::WholeLibrary).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_refresh_of_uncatalogued_work_is_item_failure() {
        let library = tempfile::tempdir().unwrap();
        let (_db_dir, engine) = test_engine(library.path().to_path_buf()).await;

        let events = collect_events(
            &engine,
            BatchMode::Refresh,
            BatchTargets::Ids(vec!["RJ000001".to_string()]),
        )
        .await;

        // start, in-flight marker, error log, failed progress, end
        assert!(matches!(events[0], ProgressEvent::Start { total: 1, .. }));

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(events.last().unwrap().is_terminal());

        match events.last().unwrap() {
            ProgressEvent::End { stats, .. } => {
                let stats = stats.as_ref().unwrap();
                assert!(stats.success.is_empty());
                assert_eq!(stats.failed.len(), 1);
                assert_eq!(stats.failed[0].id, "RJ000001");
                assert!(stats.failed[0].error.contains("not in the catalog"));
            }
            other => panic!("expected End, got {:?}", other),
        }

        let last_settlement = events
            .iter()
            .rev()
            .find_map(|e| match e {
                ProgressEvent::Progress {
                    status: ItemStatus::Failed,
                    current,
                    total,
                    percent,
                    ..
                } => Some((*current, *total, *percent)),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_settlement, (1, 1, 100));
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let library = tempfile::tempdir().unwrap();
        let (_db_dir, engine) = test_engine(library.path().to_path_buf()).await;

        let events =
            collect_events(&engine, BatchMode::Create, BatchTargets::Ids(vec![])).await;
        assert!(matches!(events[0], ProgressEvent::Start { total: 0, .. }));
        assert!(matches!(events[1], ProgressEvent::End { .. }));
        assert_eq!(events.len(), 2);
    }
}
