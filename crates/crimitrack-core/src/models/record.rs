//! Record model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Key holding the modification time of a record (Unix ms).
pub const LAST_MODIFIED_KEY: &str = "_lastModified";
/// Key holding the agenda/waitlist discriminator.
pub const WAITLIST_FLAG_KEY: &str = "_isWaitlist";

/// Logical collection a record belongs to.
///
/// `Agenda` and `Waitlist` share the physical `agenda` collection and differ
/// only by the `_isWaitlist` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Agenda,
    Waitlist,
    #[serde(alias = "expertise")]
    Expertises,
    #[serde(alias = "document")]
    Documents,
}

impl Collection {
    /// Every logical collection, in snapshot order.
    pub const ALL: [Self; 4] = [Self::Agenda, Self::Waitlist, Self::Expertises, Self::Documents];

    /// Name used in snapshots and events.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agenda => "agenda",
            Self::Waitlist => "waitlist",
            Self::Expertises => "expertises",
            Self::Documents => "documents",
        }
    }

    /// Name of the physical collection the records are stored in.
    pub const fn storage_name(self) -> &'static str {
        match self {
            Self::Agenda | Self::Waitlist => "agenda",
            Self::Expertises => "expertises",
            Self::Documents => "documents",
        }
    }

    pub const fn is_waitlist(self) -> bool {
        matches!(self, Self::Waitlist)
    }

    /// Fields that must be present and non-empty.
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Agenda | Self::Waitlist => &["patronyme", "date_examen"],
            Self::Expertises => &["numero_dossier"],
            Self::Documents => &["expertise_id", "nom_fichier"],
        }
    }

    /// Secondary attributes available to exact-match index lookups.
    pub const fn indexes(self) -> &'static [&'static str] {
        match self {
            Self::Agenda | Self::Waitlist => &[
                "date_examen",
                "patronyme",
                "statut",
                "type_mission",
                "tribunal",
            ],
            Self::Expertises => &["numero_dossier", "date_creation", "statut", "type_expertise"],
            Self::Documents => &["expertise_id", "type_document", "date_creation"],
        }
    }

    pub fn has_index(self, name: &str) -> bool {
        self.indexes().contains(&name)
    }

    const fn id_prefix(self) -> &'static str {
        match self {
            Self::Agenda => "agenda",
            Self::Waitlist => "waitlist",
            Self::Expertises => "expertise",
            Self::Documents => "document",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agenda" => Ok(Self::Agenda),
            "waitlist" => Ok(Self::Waitlist),
            "expertises" | "expertise" => Ok(Self::Expertises),
            "documents" | "document" => Ok(Self::Documents),
            other => Err(Error::InvalidInput(format!("unknown collection '{other}'"))),
        }
    }
}

/// Identifier of a record, unique within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh identifier with a collection prefix.
    #[must_use]
    pub fn generate(collection: Collection) -> Self {
        Self(format!("{}_{}", collection.id_prefix(), Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an identifier from a JSON value. Strings are trimmed; integers are
    /// accepted as their decimal form; anything else is treated as absent.
    fn from_json(value: Option<&Value>) -> Option<Self> {
        match value? {
            Value::String(raw) => {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
            }
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Some(Self(number.to_string()))
            }
            _ => None,
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One domain entity (agenda entry, waitlist entry, expertise, document).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub collection: Collection,
    /// Last modification time (Unix ms); zero until stamped
    pub last_modified: i64,
    /// Domain fields, without `id` and the bookkeeping keys
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with a generated identifier.
    pub fn new(collection: Collection, fields: Map<String, Value>) -> Self {
        Self {
            id: RecordId::generate(collection),
            collection,
            last_modified: 0,
            fields,
        }
    }

    /// Validate and repair a raw JSON record against its collection contract.
    ///
    /// A missing or invalid `id` is replaced by a generated one, defaults are
    /// filled in, and `_lastModified`/`lastModified` is carried over when it is
    /// a positive integer. For the agenda collection a truthy `_isWaitlist`
    /// moves the record to the waitlist view.
    pub fn from_value(collection: Collection, value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::Validation(format!(
                "{collection} record is not a JSON object"
            )));
        };

        let id = RecordId::from_json(fields.get("id")).unwrap_or_else(|| RecordId::generate(collection));
        fields.remove("id");

        let last_modified = [LAST_MODIFIED_KEY, "lastModified"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_i64))
            .filter(|millis| *millis > 0)
            .unwrap_or(0);
        fields.remove(LAST_MODIFIED_KEY);
        fields.remove("lastModified");

        let flagged = fields
            .remove(WAITLIST_FLAG_KEY)
            .is_some_and(|flag| is_truthy(&flag));
        let collection = match collection {
            Collection::Agenda | Collection::Waitlist if flagged => Collection::Waitlist,
            other => other,
        };

        for field in collection.required_fields() {
            if !fields.get(*field).is_some_and(is_present) {
                return Err(Error::Validation(format!(
                    "{collection} record {id} is missing required field '{field}'"
                )));
            }
        }

        apply_defaults(collection, &mut fields);

        Ok(Self {
            id,
            collection,
            last_modified,
            fields,
        })
    }

    /// Render the record in snapshot form.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 3);
        object.insert("id".to_string(), Value::String(self.id.to_string()));
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        object.insert(LAST_MODIFIED_KEY.to_string(), Value::from(self.last_modified));
        if matches!(self.collection, Collection::Agenda | Collection::Waitlist) {
            object.insert(
                WAITLIST_FLAG_KEY.to_string(),
                Value::Bool(self.collection.is_waitlist()),
            );
        }
        Value::Object(object)
    }

    /// Get a string field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Stamp a fresh modification time, strictly after `previous` when given.
    pub fn touch(&mut self, now: i64, previous: Option<i64>) {
        self.last_modified = previous.map_or(now, |previous| now.max(previous + 1));
    }

    /// Stamp a modification time only when none is set.
    pub const fn ensure_stamped(&mut self, now: i64) {
        if self.last_modified <= 0 {
            self.last_modified = now;
        }
    }
}

/// Read the modification time of a raw JSON record, whatever key it uses.
pub fn value_timestamp(value: &Value) -> i64 {
    value_stamp(value).unwrap_or(0)
}

/// Modification time of a raw JSON record, `None` when it carries none.
pub fn value_stamp(value: &Value) -> Option<i64> {
    [LAST_MODIFIED_KEY, "lastModified", "timestamp"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_i64))
}

/// Normalize a date to `YYYY-MM-DD` when it can be parsed.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Some(datetime.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(datetime.date().format("%Y-%m-%d").to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    None
}

fn apply_defaults(collection: Collection, fields: &mut Map<String, Value>) {
    let mut default = |key: &str, value: Value| {
        if !fields.get(key).is_some_and(is_present) {
            fields.insert(key.to_string(), value);
        }
    };

    match collection {
        Collection::Agenda | Collection::Waitlist => {
            let statut = if collection.is_waitlist() {
                "attente"
            } else {
                "programmee"
            };
            default("statut", Value::from(statut));
            default("type_mission", Value::from("instruction"));
            default("lieu_examen", Value::from("CJ"));

            if let Some(raw) = fields.get("date_examen").and_then(Value::as_str) {
                match normalize_date(raw) {
                    Some(date) => {
                        fields.insert("date_examen".to_string(), Value::String(date));
                    }
                    None => tracing::warn!("Keeping unparseable date_examen '{raw}' as-is"),
                }
            }
        }
        Collection::Expertises => {
            default("date_creation", Value::from(crate::util::now_rfc3339()));
            default("statut", Value::from("en_cours"));
        }
        Collection::Documents => {
            default("date_creation", Value::from(crate::util::now_rfc3339()));
            default("taille", Value::from(0));
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.abs() > f64::EPSILON),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_id_is_generated() {
        let record = Record::from_value(
            Collection::Expertises,
            json!({ "numero_dossier": "2024-001" }),
        )
        .unwrap();
        assert!(record.id.as_str().starts_with("expertise_"));
        assert_eq!(record.field_str("statut"), Some("en_cours"));
    }

    #[test]
    fn test_blank_id_is_replaced() {
        let record = Record::from_value(
            Collection::Documents,
            json!({ "id": "   ", "expertise_id": "e1", "nom_fichier": "rapport.pdf" }),
        )
        .unwrap();
        assert!(record.id.as_str().starts_with("document_"));
        assert_eq!(record.fields.get("taille"), Some(&json!(0)));
    }

    #[test]
    fn test_numeric_id_is_kept() {
        let record = Record::from_value(
            Collection::Expertises,
            json!({ "id": 42, "numero_dossier": "X" }),
        )
        .unwrap();
        assert_eq!(record.id.as_str(), "42");
    }

    #[test]
    fn test_agenda_requires_patronyme() {
        let error = Record::from_value(
            Collection::Agenda,
            json!({ "id": "a1", "date_examen": "2025-01-10" }),
        )
        .unwrap_err();
        assert!(matches!(error, Error::Validation(message) if message.contains("patronyme")));
    }

    #[test]
    fn test_agenda_defaults_and_date_normalization() {
        let record = Record::from_value(
            Collection::Agenda,
            json!({
                "id": "a1",
                "patronyme": "Catherine CARON",
                "date_examen": "2025-01-10T09:30:00Z"
            }),
        )
        .unwrap();
        assert_eq!(record.field_str("date_examen"), Some("2025-01-10"));
        assert_eq!(record.field_str("statut"), Some("programmee"));
        assert_eq!(record.field_str("lieu_examen"), Some("CJ"));
        assert_eq!(record.collection, Collection::Agenda);
    }

    #[test]
    fn test_waitlist_flag_moves_record() {
        let record = Record::from_value(
            Collection::Agenda,
            json!({
                "id": "w1",
                "patronyme": "Philippe ECHARD",
                "date_examen": "01/02/2025",
                "_isWaitlist": true
            }),
        )
        .unwrap();
        assert_eq!(record.collection, Collection::Waitlist);
        assert_eq!(record.field_str("statut"), Some("attente"));
        assert_eq!(record.field_str("date_examen"), Some("2025-02-01"));
    }

    #[test]
    fn test_last_modified_is_carried_over() {
        let record = Record::from_value(
            Collection::Expertises,
            json!({ "id": "e1", "numero_dossier": "N", "lastModified": 1_700_000_000_000_i64 }),
        )
        .unwrap();
        assert_eq!(record.last_modified, 1_700_000_000_000);
        assert!(!record.fields.contains_key("lastModified"));
    }

    #[test]
    fn test_to_value_round_trip() {
        let mut record = Record::from_value(
            Collection::Waitlist,
            json!({ "id": "w1", "patronyme": "P", "date_examen": "2025-02-01" }),
        )
        .unwrap();
        record.ensure_stamped(10);
        let again = Record::from_value(Collection::Agenda, record.to_value()).unwrap();
        assert_eq!(again, record);
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        let mut record = Record::new(Collection::Expertises, Map::new());
        record.touch(100, Some(500));
        assert_eq!(record.last_modified, 501);
        record.touch(900, Some(501));
        assert_eq!(record.last_modified, 900);
    }

    #[test]
    fn test_collection_parse_accepts_singular() {
        assert_eq!("expertise".parse::<Collection>().unwrap(), Collection::Expertises);
        assert_eq!("document".parse::<Collection>().unwrap(), Collection::Documents);
        assert!("billing".parse::<Collection>().is_err());
    }

    #[test]
    fn test_normalize_date_rejects_garbage() {
        assert_eq!(normalize_date("next tuesday"), None);
        assert_eq!(normalize_date("2025-03-04"), Some("2025-03-04".to_string()));
    }
}
