//! Background task draining the store journal into SQLite.

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::db::JobDb;
use crate::jobs::PersistOp;

/// Apply journal entries in order until every sender is dropped. Write
/// failures are logged and skipped; the in-memory store stays authoritative.
pub fn spawn_persistence_worker(
    db: JobDb,
    mut rx: UnboundedReceiver<PersistOp>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let res = match &op {
                PersistOp::Upsert(job) => db.upsert_job(job).await,
                PersistOp::Delete(ids) => db.delete_jobs(ids).await.map(|_| ()),
            };
            if let Err(e) = res {
                tracing::warn!(error = %e, "failed to persist job change");
            }
        }
        tracing::debug!("persistence worker stopped");
    })
}
