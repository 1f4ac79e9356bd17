use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use lifeos_core::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_STORAGE_KEY};
use lifeos_core::db::LibSqlKeyValueStore;
use lifeos_core::sync::DrainReport;
use lifeos_core::{MutationRequest, QueuedMutation, SyncClientConfig, SyncQueue, SyncableEntity};
use serde::Serialize;
use serde_json::Value;

use crate::cli::{ApiOverrides, MutationArgs};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueListItem {
    pub id: String,
    pub method: String,
    pub endpoint: String,
    pub payload: Value,
    pub queued_at: i64,
    pub queued_at_iso: String,
    pub retry_count: u32,
}

#[derive(Debug, Serialize)]
pub struct DrainSummary {
    pub synced: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub rejected: Vec<FailedItem>,
    pub remaining: usize,
    pub skipped: bool,
}

#[derive(Debug, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub endpoint: String,
    pub error: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("LIFEOS_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lifeos")
        .join("lifeos.db")
}

/// API configuration from `LIFEOS_*` variables and command-line overrides, when present.
///
/// Queue maintenance works without it; anything that talks to the API needs it.
pub fn optional_config(overrides: &ApiOverrides) -> Result<Option<SyncClientConfig>, CliError> {
    match load_config(overrides, |name| env::var(name).ok()) {
        Ok(config) => Ok(Some(config)),
        Err(lifeos_core::config::ConfigError::MissingVar("LIFEOS_API_URL")) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

pub fn require_config(overrides: &ApiOverrides) -> Result<SyncClientConfig, CliError> {
    Ok(load_config(overrides, |name| env::var(name).ok())?)
}

pub fn load_config(
    overrides: &ApiOverrides,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SyncClientConfig, lifeos_core::config::ConfigError> {
    let mut pinned = HashMap::new();
    if let Some(api_url) = &overrides.api_url {
        pinned.insert("LIFEOS_API_URL", api_url.clone());
    }
    if let Some(token) = &overrides.token {
        pinned.insert("LIFEOS_AUTH_TOKEN", token.clone());
    }
    SyncClientConfig::from_lookup(|name| pinned.get(name).cloned().or_else(|| lookup(name)))
}

pub async fn open_queue(
    db_path: &Path,
    config: Option<&SyncClientConfig>,
) -> Result<SyncQueue<LibSqlKeyValueStore>, CliError> {
    let store = LibSqlKeyValueStore::open(db_path).await?;
    let queue = match config {
        Some(config) => SyncQueue::from_config(store, config).await?,
        None => SyncQueue::init(store, DEFAULT_STORAGE_KEY, DEFAULT_QUEUE_CAPACITY).await?,
    };
    Ok(queue)
}

pub fn mutation_request(args: &MutationArgs) -> Result<MutationRequest, CliError> {
    let endpoint = normalize_endpoint(&args.endpoint).ok_or(CliError::EmptyEndpoint)?;
    let payload = parse_payload(args.payload.as_deref())?;
    Ok(MutationRequest::new(endpoint, args.method.into(), payload))
}

pub fn normalize_endpoint(endpoint: &str) -> Option<String> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{trimmed}"))
    }
}

pub fn parse_payload(raw: Option<&str>) -> Result<Value, CliError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Value::Null),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
        }
    }
}

pub fn read_entity(path: &Path) -> Result<SyncableEntity, CliError> {
    let invalid = |message: String| CliError::InvalidEntityFile {
        path: path.display().to_string(),
        message,
    };
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw).map_err(|error| invalid(error.to_string()))?;
    SyncableEntity::try_from(value).map_err(|error| invalid(error.to_string()))
}

/// Match a queue item by full id or unique id prefix.
pub fn resolve_queue_id(items: &[QueuedMutation], query: &str) -> Result<String, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::QueueItemNotFound(query.to_string()));
    }
    if let Some(item) = items.iter().find(|item| item.id == query) {
        return Ok(item.id.clone());
    }

    let matching = items
        .iter()
        .filter(|item| item.id.starts_with(query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::QueueItemNotFound(query.to_string())),
        [item] => Ok(item.id.clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|item| short_id(&item.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousQueueId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn queue_to_item(item: &QueuedMutation) -> QueueListItem {
    QueueListItem {
        id: item.id.clone(),
        method: item.method().to_string(),
        endpoint: item.endpoint().to_string(),
        payload: item.request.payload.clone(),
        queued_at: item.timestamp,
        queued_at_iso: format_timestamp(item.timestamp),
        retry_count: item.retry_count,
    }
}

pub fn format_queue_lines(items: &[QueuedMutation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let relative_time = format_relative_time(item.timestamp, now_ms);
            let line = format!(
                "{}  {:<6} {}  ({relative_time})",
                short_id(&item.id),
                item.method().as_str(),
                item.endpoint()
            );
            if item.retry_count > 0 {
                format!("{line}  [{} retries]", item.retry_count)
            } else {
                line
            }
        })
        .collect()
}

pub fn drain_summary(report: &DrainReport) -> DrainSummary {
    let failed_item = |failed: &lifeos_core::sync::FailedReplay| FailedItem {
        id: failed.id.clone(),
        endpoint: failed.endpoint.clone(),
        error: failed.error.to_string(),
    };
    DrainSummary {
        synced: report.synced.clone(),
        failed: report.failed.iter().map(failed_item).collect(),
        rejected: report.rejected.iter().map(failed_item).collect(),
        remaining: report.remaining,
        skipped: report.skipped,
    }
}

pub fn format_drain_lines(report: &DrainReport) -> Vec<String> {
    if report.skipped {
        return vec!["Another drain is already running.".to_string()];
    }
    if report.attempted() == 0 {
        return vec!["Queue is empty.".to_string()];
    }

    let mut lines = vec![format!(
        "Synced {} of {} queued changes.",
        report.synced.len(),
        report.attempted()
    )];
    for failed in &report.failed {
        lines.push(format!(
            "  pending  {} {}: {}",
            short_id(&failed.id),
            failed.endpoint,
            failed.error
        ));
    }
    for rejected in &report.rejected {
        lines.push(format!(
            "  dropped  {} {}: {}",
            short_id(&rejected.id),
            rejected.endpoint,
            rejected.error
        ));
    }
    if report.remaining > 0 {
        lines.push(format!("{} changes still pending.", report.remaining));
    }
    lines
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
