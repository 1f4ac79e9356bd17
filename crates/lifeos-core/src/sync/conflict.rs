//! Conflict resolution between a local and a server copy of an entity.
//!
//! Every function here is pure. Timestamps are compared after parsing, so an
//! ISO string and an epoch number denoting the same instant compare equal;
//! a timestamp that cannot be parsed never wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::SyncableEntity;

/// Strategy used to settle a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep whichever copy was written last
    #[default]
    LastWriteWins,
    /// Server copy with newer local fields overlaid
    Merge,
}

impl ConflictStrategy {
    pub fn resolve(self, local: SyncableEntity, server: SyncableEntity) -> Resolution {
        match self {
            Self::LastWriteWins => {
                if local_is_newer(&local, &server) {
                    Resolution::Local(local)
                } else {
                    Resolution::Server(server)
                }
            }
            Self::Merge => {
                if local_is_newer(&local, &server) {
                    Resolution::Merged(merge_into_server(local, server))
                } else {
                    Resolution::Server(server)
                }
            }
        }
    }
}

/// Which copy survived a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Local(SyncableEntity),
    Server(SyncableEntity),
    Merged(SyncableEntity),
}

impl Resolution {
    pub const fn entity(&self) -> &SyncableEntity {
        match self {
            Self::Local(entity) | Self::Server(entity) | Self::Merged(entity) => entity,
        }
    }

    pub fn into_entity(self) -> SyncableEntity {
        match self {
            Self::Local(entity) | Self::Server(entity) | Self::Merged(entity) => entity,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Server(_) => "server",
            Self::Merged(_) => "merged",
        }
    }
}

/// Last-write-wins: the copy with the strictly greater `updated_at`; ties go to the server.
pub fn resolve_with_lww(local: SyncableEntity, server: SyncableEntity) -> SyncableEntity {
    ConflictStrategy::LastWriteWins
        .resolve(local, server)
        .into_entity()
}

/// Server copy as baseline; when local is newer its non-null fields overwrite the server's.
pub fn resolve_with_merge(local: SyncableEntity, server: SyncableEntity) -> SyncableEntity {
    ConflictStrategy::Merge.resolve(local, server).into_entity()
}

/// Reports a conflict unless both copies carry the identical `updated_at` value.
///
/// With differing timestamps any structural difference counts, including the
/// timestamp field itself.
pub fn has_conflict(local: &SyncableEntity, server: &SyncableEntity) -> bool {
    if local.updated_at() == server.updated_at() {
        return false;
    }
    local.fields() != server.fields()
}

fn local_is_newer(local: &SyncableEntity, server: &SyncableEntity) -> bool {
    match (local.updated_at_millis(), server.updated_at_millis()) {
        (Some(local_time), Some(server_time)) => local_time > server_time,
        _ => false,
    }
}

fn merge_into_server(local: SyncableEntity, mut server: SyncableEntity) -> SyncableEntity {
    let Value::Object(local_fields) = local.into_value() else {
        return server;
    };
    let fields = server.fields_mut();
    for (key, value) in local_fields {
        if !value.is_null() {
            fields.insert(key, value);
        }
    }
    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entity(value: Value) -> SyncableEntity {
        SyncableEntity::try_from(value).unwrap()
    }

    #[test]
    fn lww_picks_local_when_newer() {
        let local = entity(json!({ "id": "1", "title": "Local", "updated_at": "2025-01-02T10:00:00Z" }));
        let server = entity(json!({ "id": "1", "title": "Server", "updated_at": "2025-01-01T10:00:00Z" }));

        let result = resolve_with_lww(local, server);
        assert_eq!(result.get("title"), Some(&json!("Local")));
    }

    #[test]
    fn lww_picks_server_when_newer() {
        let local = entity(json!({ "id": "1", "title": "Local", "updated_at": "2025-01-01T10:00:00Z" }));
        let server = entity(json!({ "id": "1", "title": "Server", "updated_at": "2025-01-02T10:00:00Z" }));

        let result = resolve_with_lww(local, server);
        assert_eq!(result.get("title"), Some(&json!("Server")));
    }

    #[test]
    fn lww_tie_goes_to_server() {
        let local = entity(json!({ "id": "1", "title": "Local", "updated_at": 1_735_725_600_000_i64 }));
        let server = entity(json!({ "id": "1", "title": "Server", "updated_at": "2025-01-01T10:00:00Z" }));

        let resolution = ConflictStrategy::LastWriteWins.resolve(local, server);
        assert_eq!(resolution.label(), "server");
        assert_eq!(resolution.entity().get("title"), Some(&json!("Server")));
    }

    #[test]
    fn lww_unparseable_timestamp_never_wins() {
        let local = entity(json!({ "id": "1", "title": "Local", "updated_at": "not a date" }));
        let server = entity(json!({ "id": "1", "title": "Server", "updated_at": "2020-01-01T00:00:00Z" }));

        assert_eq!(
            resolve_with_lww(local, server).get("title"),
            Some(&json!("Server"))
        );
    }

    #[test]
    fn lww_is_idempotent() {
        let a = entity(json!({ "id": "1", "title": "Same", "done": false, "updated_at": "2025-01-01T10:00:00Z" }));
        assert_eq!(resolve_with_lww(a.clone(), a.clone()), a);
    }

    #[test]
    fn merge_overlays_newer_local_fields() {
        let local = entity(json!({
            "id": "1",
            "title": "Updated Title",
            "status": "done",
            "updated_at": "2025-01-02T10:00:00Z"
        }));
        let server = entity(json!({
            "id": "1",
            "title": "Old Title",
            "status": "pending",
            "other": "kept",
            "updated_at": "2025-01-01T10:00:00Z"
        }));

        let resolution = ConflictStrategy::Merge.resolve(local, server);
        assert_eq!(resolution.label(), "merged");
        assert_eq!(
            resolution.into_entity().into_value(),
            json!({
                "id": "1",
                "title": "Updated Title",
                "status": "done",
                "other": "kept",
                "updated_at": "2025-01-02T10:00:00Z"
            })
        );
    }

    #[test]
    fn merge_skips_null_local_fields() {
        let local = entity(json!({ "id": "1", "note": null, "title": "New", "updated_at": "2025-01-02T10:00:00Z" }));
        let server = entity(json!({ "id": "1", "note": "keep me", "title": "Old", "updated_at": "2025-01-01T10:00:00Z" }));

        let result = resolve_with_merge(local, server);
        assert_eq!(result.get("note"), Some(&json!("keep me")));
        assert_eq!(result.get("title"), Some(&json!("New")));
    }

    #[test]
    fn merge_keeps_server_when_server_newer_or_equal() {
        let local = entity(json!({ "id": "1", "title": "Stale Title", "updated_at": "2025-01-01T10:00:00Z" }));
        let server = entity(json!({ "id": "1", "title": "Fresh Title", "updated_at": "2025-01-02T10:00:00Z" }));
        assert_eq!(resolve_with_merge(local, server.clone()), server);

        let local = entity(json!({ "id": "1", "title": "Other", "updated_at": "2025-01-02T10:00:00Z" }));
        assert_eq!(resolve_with_merge(local, server.clone()), server);
    }

    #[test]
    fn no_conflict_when_timestamps_identical() {
        let local = entity(json!({ "id": "1", "updated_at": "2025-01-01T10:00:00Z", "data": "a" }));
        let server = entity(json!({ "id": "1", "updated_at": "2025-01-01T10:00:00Z", "data": "b" }));
        assert!(!has_conflict(&local, &server));
    }

    #[test]
    fn conflict_when_data_and_timestamps_differ() {
        let local = entity(json!({ "id": "1", "updated_at": "2025-01-02T10:00:00Z", "data": "b" }));
        let server = entity(json!({ "id": "1", "updated_at": "2025-01-01T10:00:00Z", "data": "a" }));
        assert!(has_conflict(&local, &server));
    }

    #[test]
    fn conflict_when_only_timestamps_differ() {
        let local = entity(json!({ "id": "1", "updated_at": "2025-01-02T10:00:00Z", "data": "a" }));
        let server = entity(json!({ "id": "1", "updated_at": "2025-01-01T10:00:00Z", "data": "a" }));
        assert!(has_conflict(&local, &server));
    }

    #[test]
    fn strategy_deserializes_from_snake_case() {
        let strategy: ConflictStrategy = serde_json::from_value(json!("merge")).unwrap();
        assert_eq!(strategy, ConflictStrategy::Merge);
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::LastWriteWins);
    }
}
