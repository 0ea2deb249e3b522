//! Conflict resolution between local and remote record versions

use std::future::Future;

use serde_json::{Map, Value};

use crate::models::{
    value_stamp, value_timestamp, Conflict, Resolution, ResolutionStrategy,
    LAST_MODIFIED_KEY,
};

/// Collaborator that shows both versions to the user and returns a choice.
pub trait ConflictPrompt {
    /// `None` when the user dismissed the prompt without choosing
    fn choose(&self, conflict: &Conflict) -> impl Future<Output = Option<Resolution>> + Send;
}

/// Version picked for a conflict and the strategy that picked it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVersion {
    pub record: Value,
    pub strategy: ResolutionStrategy,
    /// Whether the local side must be pushed again
    pub propagate: bool,
}

/// Last-writer-wins on `_lastModified`; ties go to the remote version.
pub fn last_writer_wins(conflict: &Conflict) -> ResolvedVersion {
    let local_wins = conflict.local_timestamp() > conflict.remote_timestamp();
    tracing::debug!(
        "LWW on {}: {} wins",
        conflict.id,
        if local_wins { "local" } else { "remote" }
    );
    ResolvedVersion {
        record: if local_wins {
            conflict.local.clone()
        } else {
            conflict.remote.clone()
        },
        strategy: ResolutionStrategy::Lww,
        propagate: local_wins,
    }
}

/// Apply a user's choice.
pub fn apply_resolution(conflict: &Conflict, resolution: Resolution, now: i64) -> ResolvedVersion {
    let record = match resolution {
        Resolution::KeepLocal => conflict.local.clone(),
        Resolution::KeepRemote => conflict.remote.clone(),
        Resolution::Merge => merge(&conflict.local, &conflict.remote, now),
    };
    ResolvedVersion {
        record,
        strategy: resolution.into(),
        propagate: true,
    }
}

/// Merge with the remote record as base.
///
/// A local field that differs overlays the remote one when both values are
/// objects (shallow merge) or when both records carry a modification time
/// and the local one is newer. Local-only
/// fields are kept.
pub fn merge(local: &Value, remote: &Value, now: i64) -> Value {
    let (Value::Object(local_fields), Value::Object(remote_fields)) = (local, remote) else {
        return if local.is_object() {
            local.clone()
        } else {
            remote.clone()
        };
    };

    let local_newer = matches!(
        (value_stamp(local), value_stamp(remote)),
        (Some(local_time), Some(remote_time)) if local_time > remote_time
    );
    let mut merged = remote_fields.clone();

    for (key, local_value) in local_fields {
        if key == LAST_MODIFIED_KEY || key == "lastModified" {
            continue;
        }
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), local_value.clone());
            }
            Some(remote_value) if remote_value == local_value => {}
            Some(Value::Object(remote_object)) if local_value.is_object() => {
                let mut combined: Map<String, Value> = remote_object.clone();
                if let Value::Object(local_object) = local_value {
                    for (field, value) in local_object {
                        combined.insert(field.clone(), value.clone());
                    }
                }
                merged.insert(key.clone(), Value::Object(combined));
            }
            Some(_) if local_newer => {
                merged.insert(key.clone(), local_value.clone());
            }
            Some(_) => {}
        }
    }

    merged.insert(
        LAST_MODIFIED_KEY.to_string(),
        Value::from(value_timestamp(local).max(value_timestamp(remote))),
    );
    merged.remove("lastModified");
    merged.insert("_merged".to_string(), Value::Bool(true));
    merged.insert("_mergeTime".to_string(), Value::from(now));
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict(local: Value, remote: Value) -> Conflict {
        Conflict {
            id: "c1".to_string(),
            collection: Collection::Expertises,
            local,
            remote,
            auto_resolvable: true,
        }
    }

    #[test]
    fn test_lww_newer_local_wins() {
        let resolved = last_writer_wins(&conflict(
            json!({ "id": "e1", "_lastModified": 20, "statut": "terminee" }),
            json!({ "id": "e1", "_lastModified": 10, "statut": "en_cours" }),
        ));
        assert_eq!(resolved.record["statut"], json!("terminee"));
        assert!(resolved.propagate);
    }

    #[test]
    fn test_lww_tie_goes_to_remote() {
        let resolved = last_writer_wins(&conflict(
            json!({ "id": "e1", "_lastModified": 10, "statut": "terminee" }),
            json!({ "id": "e1", "lastModified": 10, "statut": "en_cours" }),
        ));
        assert_eq!(resolved.record["statut"], json!("en_cours"));
        assert!(!resolved.propagate);
        assert_eq!(resolved.strategy, ResolutionStrategy::Lww);
    }

    #[test]
    fn test_merge_keeps_local_only_fields_and_newer_values() {
        let merged = merge(
            &json!({
                "id": "e1", "_lastModified": 30,
                "statut": "terminee", "note": "rapport envoye",
                "honoraires": { "montant": 450 }
            }),
            &json!({
                "id": "e1", "_lastModified": 20,
                "statut": "en_cours", "tribunal": "TJ Lyon",
                "honoraires": { "montant": 400, "paye": false }
            }),
            99,
        );

        assert_eq!(merged["statut"], json!("terminee"));
        assert_eq!(merged["note"], json!("rapport envoye"));
        assert_eq!(merged["tribunal"], json!("TJ Lyon"));
        assert_eq!(merged["honoraires"], json!({ "montant": 450, "paye": false }));
        assert_eq!(merged["_lastModified"], json!(30));
        assert_eq!(merged["_merged"], json!(true));
        assert_eq!(merged["_mergeTime"], json!(99));
    }

    #[test]
    fn test_merge_prefers_remote_scalars_when_remote_is_newer() {
        let merged = merge(
            &json!({ "id": "e1", "_lastModified": 5, "statut": "terminee" }),
            &json!({ "id": "e1", "_lastModified": 50, "statut": "en_cours" }),
            1,
        );
        assert_eq!(merged["statut"], json!("en_cours"));
    }

    #[test]
    fn test_merge_needs_both_timestamps_to_prefer_local() {
        let merged = merge(
            &json!({ "id": "e1", "_lastModified": 40, "statut": "terminee" }),
            &json!({ "id": "e1", "statut": "en_cours" }),
            1,
        );
        assert_eq!(merged["statut"], json!("en_cours"));
        assert_eq!(merged["_lastModified"], json!(40));
    }

    #[test]
    fn test_apply_resolution_strategies() {
        let conflict = conflict(
            json!({ "id": "e1", "_lastModified": 1, "statut": "a" }),
            json!({ "id": "e1", "_lastModified": 2, "statut": "b" }),
        );

        let local = apply_resolution(&conflict, Resolution::KeepLocal, 0);
        assert_eq!(local.record["statut"], json!("a"));
        assert_eq!(local.strategy, ResolutionStrategy::KeepLocal);
        assert!(local.propagate);

        let remote = apply_resolution(&conflict, Resolution::KeepRemote, 0);
        assert_eq!(remote.record["statut"], json!("b"));

        let merged = apply_resolution(&conflict, Resolution::Merge, 0);
        assert_eq!(merged.strategy, ResolutionStrategy::Merge);
        assert_eq!(merged.record["_merged"], json!(true));
    }
}
