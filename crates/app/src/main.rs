mod api;
mod problem;
mod recorder;
mod router;
mod telemetry;

use std::net::SocketAddr;

use quickpoll_core::PollStore;
use quickpoll_storage::{LoadStatus, SnapshotStore};
use quickpoll_util::{load_env_file, AppConfig};
use tracing::{error, info, warn};

use crate::recorder::PollService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let snapshots = SnapshotStore::new(&config.data_file);
    let store = load_store(&snapshots);
    let polls = PollService::new(store, snapshots);

    let state = router::AppState::new(metrics, polls.clone(), config.admin_token.clone());

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match polls.flush() {
        Ok(true) => info!(stage = "app", "pending snapshot written before exit"),
        Ok(false) => {}
        Err(err) => error!(stage = "app", error = %err, "snapshot still dirty at exit"),
    }
    Ok(())
}

/// Rehydrates the poll store, degrading to an empty one on any failure.
fn load_store(snapshots: &SnapshotStore) -> PollStore {
    match snapshots.load() {
        Ok(loaded) => {
            let report = &loaded.report;
            info!(
                stage = "snapshot",
                path = ?snapshots.path(),
                status = report.status.as_str(),
                questions = report.questions,
                next_id = loaded.store.next_id(),
                "snapshot loaded"
            );
            if report.skipped_entries > 0 || report.skipped_votes > 0 {
                warn!(
                    stage = "snapshot",
                    skipped_entries = report.skipped_entries,
                    skipped_votes = report.skipped_votes,
                    "snapshot contained unreadable records"
                );
            }
            match (&report.quarantined, report.status) {
                (Some(moved), _) => {
                    warn!(stage = "snapshot", moved_to = ?moved, "unparseable snapshot moved aside")
                }
                (None, LoadStatus::Corrupt) => warn!(
                    stage = "snapshot",
                    "unparseable snapshot could not be moved aside and will be overwritten"
                ),
                (None, _) => {}
            }
            loaded.store
        }
        Err(err) => {
            warn!(stage = "snapshot", error = %err, "starting with an empty poll store");
            PollStore::new()
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(stage = "app", "shutdown requested"),
        Err(err) => {
            warn!(stage = "app", error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
