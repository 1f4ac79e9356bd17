use std::path::Path;

use lifeos_core::sync::DrainPolicy;
use lifeos_core::HttpTransport;

use crate::cli::{ApiOverrides, MutationArgs};
use crate::commands::common::{
    drain_summary, format_drain_lines, format_queue_lines, mutation_request, open_queue,
    optional_config, queue_to_item, require_config, resolve_queue_id, short_id, QueueListItem,
};
use crate::error::CliError;

pub async fn run_queue_list(
    as_json: bool,
    db_path: &Path,
    overrides: &ApiOverrides,
) -> Result<(), CliError> {
    let config = optional_config(overrides)?;
    let queue = open_queue(db_path, config.as_ref()).await?;
    let items = queue.snapshot().await;

    if as_json {
        let json_items = items
            .iter()
            .map(queue_to_item)
            .collect::<Vec<QueueListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No pending changes.");
        return Ok(());
    }

    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_add(
    mutation: &MutationArgs,
    db_path: &Path,
    overrides: &ApiOverrides,
) -> Result<(), CliError> {
    let request = mutation_request(mutation)?;
    let config = optional_config(overrides)?;
    let queue = open_queue(db_path, config.as_ref()).await?;

    let queued = queue.add_to_queue(request).await?;
    queue.teardown().await?;
    println!("Queued {} ({} pending)", short_id(&queued.id), queue.len().await);
    Ok(())
}

pub async fn run_queue_drain(
    stop_on_error: bool,
    as_json: bool,
    db_path: &Path,
    overrides: &ApiOverrides,
) -> Result<(), CliError> {
    let config = require_config(overrides)?;
    let queue = open_queue(db_path, Some(&config)).await?;
    let transport = HttpTransport::new(&config)?;
    let policy = if stop_on_error {
        DrainPolicy::StopOnError
    } else {
        DrainPolicy::ContinueOnError
    };

    let report = queue.process_queue(&transport, policy).await?;
    queue.teardown().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&drain_summary(&report))?);
    } else {
        for line in format_drain_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_queue_remove(
    id: &str,
    db_path: &Path,
    overrides: &ApiOverrides,
) -> Result<(), CliError> {
    let config = optional_config(overrides)?;
    let queue = open_queue(db_path, config.as_ref()).await?;
    let items = queue.snapshot().await;
    let resolved = resolve_queue_id(&items, id)?;

    if !queue.remove_from_queue(&resolved).await? {
        return Err(CliError::QueueItemNotFound(id.to_string()));
    }
    println!("Removed {}", short_id(&resolved));
    Ok(())
}

pub async fn run_queue_clear(db_path: &Path, overrides: &ApiOverrides) -> Result<(), CliError> {
    let config = optional_config(overrides)?;
    let queue = open_queue(db_path, config.as_ref()).await?;
    let count = queue.len().await;

    queue.clear_queue().await?;
    println!("Cleared {count} pending changes");
    Ok(())
}
