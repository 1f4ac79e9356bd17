use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lifeos_core::sync::SyncNotification;
use lifeos_core::{
    Connectivity, HttpTransport, OfflineSyncManager, QueryCache, RealtimeChannel, SyncState,
};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::ApiOverrides;
use crate::commands::common::{format_drain_lines, open_queue, require_config};
use crate::error::CliError;

const CONNECTIVITY_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Sync daemon: drain loop plus realtime channel until Ctrl-C.
pub async fn run_daemon(db_path: &Path, overrides: &ApiOverrides) -> Result<(), CliError> {
    let config = require_config(overrides)?;
    let cache = QueryCache::new();
    let queue = Arc::new(
        open_queue(db_path, Some(&config))
            .await?
            .with_cache(cache.clone()),
    );
    let transport = Arc::new(HttpTransport::new(&config)?);
    let connectivity = Connectivity::new(transport.probe().await);

    let manager = OfflineSyncManager::new(
        Arc::clone(&queue),
        Arc::clone(&transport),
        connectivity.clone(),
        &config,
    )
    .spawn();
    let mut notifications = manager.subscribe();

    let realtime = match RealtimeChannel::connect(&config, cache) {
        Ok(handle) => Some(handle),
        Err(lifeos_core::Error::MissingSession) => {
            tracing::warn!("LIFEOS_AUTH_TOKEN not set; realtime invalidation disabled");
            None
        }
        Err(error) => return Err(error.into()),
    };

    println!(
        "Sync daemon started ({}, {} pending)",
        manager.status().label(),
        queue.len().await
    );

    let mut probe = tokio::time::interval(CONNECTIVITY_PROBE_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = probe.tick() => {
                connectivity.set_online(transport.probe().await);
            }
            notification = notifications.recv() => match notification {
                Ok(SyncNotification::BackOnline) => println!("Back online. Syncing changes..."),
                Ok(SyncNotification::WentOffline) => {
                    println!("Offline. Changes will sync when connected.");
                }
                Ok(SyncNotification::Drained(report)) => {
                    for line in format_drain_lines(&report) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} sync notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(realtime) = realtime {
        realtime.close().await;
    }
    let final_state = manager.status();
    manager.shutdown().await;
    if final_state != SyncState::Synced {
        println!("Stopped with {} pending changes", queue.len().await);
    }
    Ok(())
}
