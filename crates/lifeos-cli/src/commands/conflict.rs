use std::path::Path;

use lifeos_core::sync::{has_conflict, ConflictStrategy};

use crate::commands::common::read_entity;
use crate::error::CliError;

pub fn run_resolve(
    local_path: &Path,
    server_path: &Path,
    strategy: ConflictStrategy,
) -> Result<(), CliError> {
    let local = read_entity(local_path)?;
    let server = read_entity(server_path)?;

    let resolution = strategy.resolve(local, server);
    tracing::debug!("Conflict resolved in favour of {}", resolution.label());
    println!(
        "{}",
        serde_json::to_string_pretty(&resolution.into_entity())?
    );
    Ok(())
}

pub fn run_conflict(local_path: &Path, server_path: &Path) -> Result<(), CliError> {
    println!("{}", conflict_label(local_path, server_path)?);
    Ok(())
}

pub fn conflict_label(local_path: &Path, server_path: &Path) -> Result<&'static str, CliError> {
    let local = read_entity(local_path)?;
    let server = read_entity(server_path)?;
    Ok(if has_conflict(&local, &server) {
        "conflict"
    } else {
        "no conflict"
    })
}
