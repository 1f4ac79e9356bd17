use lifeos_core::{QueryCache, RealtimeChannel};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::ApiOverrides;
use crate::commands::common::require_config;
use crate::error::CliError;

pub async fn run_watch(overrides: &ApiOverrides) -> Result<(), CliError> {
    let config = require_config(overrides)?;
    let cache = QueryCache::new();
    let mut invalidations = cache.subscribe();
    let handle = RealtimeChannel::connect(&config, cache)?;
    println!("Watching {} (Ctrl-C to stop)", config.stream_url());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            key = invalidations.recv() => match key {
                Ok(key) if key.segments().is_empty() => println!("invalidate *"),
                Ok(key) => println!("invalidate {key}"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} invalidations", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.close().await;
    Ok(())
}
