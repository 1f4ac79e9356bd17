use std::path::Path;
use std::sync::Arc;

use lifeos_core::{Connectivity, HttpTransport, MutationOutcome, OfflineMutation};

use crate::cli::{ApiOverrides, MutationArgs};
use crate::commands::common::{mutation_request, open_queue, require_config, short_id};
use crate::error::CliError;

pub async fn run_send(
    mutation: &MutationArgs,
    db_path: &Path,
    overrides: &ApiOverrides,
) -> Result<(), CliError> {
    let request = mutation_request(mutation)?;
    let config = require_config(overrides)?;
    let queue = Arc::new(open_queue(db_path, Some(&config)).await?);
    let transport = HttpTransport::new(&config)?;
    let connectivity = Connectivity::new(transport.probe().await);

    let outcome = OfflineMutation::new(
        Arc::clone(&queue),
        connectivity,
        request.endpoint,
        request.method,
    )
    .send_via(&transport, request.payload)
    .await?;
    queue.teardown().await?;

    match &outcome {
        MutationOutcome::Completed(_) => {
            println!("{}", serde_json::to_string_pretty(&outcome.to_json()?)?);
        }
        MutationOutcome::Queued(item) => {
            println!(
                "Offline: queued {} ({} pending)",
                short_id(&item.id),
                queue.len().await
            );
        }
    }
    Ok(())
}
