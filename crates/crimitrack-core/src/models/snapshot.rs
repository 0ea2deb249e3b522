//! Full-store snapshot model

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Collection, Record};
use crate::error::{Error, Result};

/// Full export of every collection, as exchanged with the canonical file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub agenda: Vec<Record>,
    pub waitlist: Vec<Record>,
    pub expertises: Vec<Record>,
    pub documents: Vec<Record>,
    pub metadata: Map<String, Value>,
}

/// Record counts per logical collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub agenda: usize,
    pub waitlist: usize,
    pub expertises: usize,
    pub documents: usize,
}

impl SnapshotCounts {
    pub const fn total(&self) -> usize {
        self.agenda + self.waitlist + self.expertises + self.documents
    }
}

impl Snapshot {
    pub fn records(&self, collection: Collection) -> &[Record] {
        match collection {
            Collection::Agenda => &self.agenda,
            Collection::Waitlist => &self.waitlist,
            Collection::Expertises => &self.expertises,
            Collection::Documents => &self.documents,
        }
    }

    fn records_mut(&mut self, collection: Collection) -> &mut Vec<Record> {
        match collection {
            Collection::Agenda => &mut self.agenda,
            Collection::Waitlist => &mut self.waitlist,
            Collection::Expertises => &mut self.expertises,
            Collection::Documents => &mut self.documents,
        }
    }

    /// Add a record to the list matching its collection.
    pub fn push(&mut self, record: Record) {
        self.records_mut(record.collection).push(record);
    }

    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            agenda: self.agenda.len(),
            waitlist: self.waitlist.len(),
            expertises: self.expertises.len(),
            documents: self.documents.len(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.counts().total()
    }

    /// Parse the inbound JSON snapshot format.
    ///
    /// Records failing their collection contract are dropped and reported in
    /// the returned warnings, as are sections of the wrong type. An id seen
    /// twice in the same storage (agenda and waitlist share one) keeps its
    /// first occurrence. Only a non-object document is an error.
    pub fn from_value(value: Value) -> Result<(Self, Vec<String>)> {
        let Value::Object(mut object) = value else {
            return Err(Error::InputRejected(
                "snapshot must be a JSON object".to_string(),
            ));
        };

        let mut snapshot = Self::default();
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for collection in Collection::ALL {
            let Some(section) = object.remove(collection.as_str()) else {
                continue;
            };
            let Value::Array(entries) = section else {
                let warning = format!("ignoring '{collection}': expected an array");
                tracing::warn!("{warning}");
                warnings.push(warning);
                continue;
            };

            for (index, entry) in entries.into_iter().enumerate() {
                match Record::from_value(collection, entry) {
                    Ok(record)
                        if !seen.insert((
                            record.collection.storage_name(),
                            record.id.as_str().to_string(),
                        )) =>
                    {
                        let warning = format!(
                            "dropping {collection}[{index}]: duplicate id {}",
                            record.id
                        );
                        tracing::warn!("{warning}");
                        warnings.push(warning);
                    }
                    Ok(record) => snapshot.push(record),
                    Err(error) => {
                        let warning = format!("dropping {collection}[{index}]: {error}");
                        tracing::warn!("{warning}");
                        warnings.push(warning);
                    }
                }
            }
        }

        match object.remove("metadata") {
            Some(Value::Object(metadata)) => snapshot.metadata = metadata,
            Some(Value::Null) | None => {}
            Some(_) => {
                let warning = "ignoring 'metadata': expected an object".to_string();
                tracing::warn!("{warning}");
                warnings.push(warning);
            }
        }

        Ok((snapshot, warnings))
    }

    /// Render in the inbound/outbound JSON snapshot format.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for collection in Collection::ALL {
            let records = self
                .records(collection)
                .iter()
                .map(Record::to_value)
                .collect();
            object.insert(collection.as_str().to_string(), Value::Array(records));
        }
        object.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_routes_by_collection() {
        let mut snapshot = Snapshot::default();
        snapshot.push(
            Record::from_value(
                Collection::Agenda,
                json!({ "patronyme": "A", "date_examen": "2025-01-01", "_isWaitlist": true }),
            )
            .unwrap(),
        );
        snapshot.push(
            Record::from_value(Collection::Expertises, json!({ "numero_dossier": "N" })).unwrap(),
        );

        let counts = snapshot.counts();
        assert_eq!(counts.waitlist, 1);
        assert_eq!(counts.agenda, 0);
        assert_eq!(counts.expertises, 1);
        assert_eq!(snapshot.record_count(), 2);
    }

    #[test]
    fn test_from_value_drops_invalid_records() {
        let (snapshot, warnings) = Snapshot::from_value(json!({
            "agenda": [
                { "id": "a1", "patronyme": "A", "date_examen": "2025-01-01" },
                { "id": "a2", "date_examen": "2025-01-02" }
            ],
            "expertises": "not an array",
            "metadata": { "version": "2.1" }
        }))
        .unwrap();

        assert_eq!(snapshot.agenda.len(), 1);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("agenda[1]"));
        assert_eq!(snapshot.metadata.get("version"), Some(&json!("2.1")));
    }

    #[test]
    fn test_from_value_drops_ids_shared_by_agenda_and_waitlist() {
        let (snapshot, warnings) = Snapshot::from_value(json!({
            "agenda": [{ "id": "p1", "patronyme": "A", "date_examen": "2025-01-01" }],
            "waitlist": [
                { "id": "p1", "patronyme": "A", "date_examen": "2025-02-01" },
                { "id": "p2", "patronyme": "B", "date_examen": "2025-02-02" }
            ],
            "expertises": [{ "id": "p1", "numero_dossier": "N" }]
        }))
        .unwrap();

        assert_eq!(snapshot.agenda.len(), 1);
        assert_eq!(snapshot.agenda[0].field_str("date_examen"), Some("2025-01-01"));
        assert_eq!(snapshot.waitlist.len(), 1);
        // Separate storage, so the same id is fine
        assert_eq!(snapshot.expertises.len(), 1);
        assert_eq!(snapshot.record_count(), 3);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("waitlist[0]") && warnings[0].contains("duplicate id p1"));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let error = Snapshot::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(error, Error::InputRejected(_)));
    }

    #[test]
    fn test_to_value_has_every_section() {
        let value = Snapshot::default().to_value();
        for key in ["agenda", "waitlist", "expertises", "documents", "metadata"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
