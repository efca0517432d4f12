//! Records and the bulk payload exchanged with the cloud store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::types::{EntityId, EntityKind};
use crate::{Error, Result};

/// Wire field carrying the record's last modification time.
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Wire field carrying the soft-delete marker.
pub const DELETED_AT_FIELD: &str = "deletedAt";

/// One synced record of any kind.
///
/// The domain payload is kept as an opaque JSON object; only the
/// identifier and the two bookkeeping timestamps are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identifier, the join key between stores.
    pub id: EntityId,
    /// Last modification time, used by the guarded merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Soft-delete marker. Deleted records still travel through sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Domain fields specific to the kind.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record with the given identifier.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            updated_at: None,
            deleted_at: None,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style modification time setter.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Read a domain field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Overwrite a domain field and bump the modification time.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>, at: DateTime<Utc>) {
        self.fields.insert(name.into(), value.into());
        self.updated_at = Some(at);
    }

    /// Mark the record as deleted. The record keeps flowing through sync
    /// so the deletion reaches other devices.
    pub fn tombstone(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.updated_at = Some(at);
    }

    /// Whether the record carries a soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Render the record in the wire shape of `kind`.
    pub fn to_wire(&self, kind: EntityKind) -> Value {
        let mut object = self.fields.clone();
        object.insert(
            kind.id_field().to_string(),
            Value::String(self.id.as_str().to_string()),
        );
        if let Some(at) = self.updated_at {
            object.insert(UPDATED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
        }
        if let Some(at) = self.deleted_at {
            object.insert(DELETED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
        }
        Value::Object(object)
    }

    /// Parse a record from the wire shape of `kind`.
    ///
    /// # Errors
    /// - Value is not an object
    /// - Identifier field missing, empty, or not a string/number
    /// - Timestamp fields present but not RFC 3339
    pub fn from_wire(kind: EntityKind, value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(Error::Serialization(format!(
                "{} record must be a JSON object",
                kind
            )));
        };

        let id = match object.remove(kind.id_field()) {
            Some(Value::String(s)) => EntityId::new(s)?,
            Some(Value::Number(n)) => EntityId::new(n.to_string())?,
            Some(other) => {
                return Err(Error::Serialization(format!(
                    "{} record has non-scalar {}: {}",
                    kind,
                    kind.id_field(),
                    other
                )))
            }
            None => {
                return Err(Error::Serialization(format!(
                    "{} record is missing {}",
                    kind,
                    kind.id_field()
                )))
            }
        };

        let updated_at = take_timestamp(&mut object, UPDATED_AT_FIELD)?;
        let deleted_at = take_timestamp(&mut object, DELETED_AT_FIELD)?;

        Ok(Self {
            id,
            updated_at,
            deleted_at,
            fields: object,
        })
    }
}

fn take_timestamp(object: &mut Map<String, Value>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match object.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Error::Serialization(format!("Invalid {} '{}': {}", field, s, e))),
        Some(other) => Err(Error::Serialization(format!(
            "Invalid {}: {}",
            field, other
        ))),
    }
}

/// Bulk unit of transfer: per kind, the records being exchanged.
///
/// A kind that is absent means "no changes for that kind", never
/// "delete everything of that kind".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPayload {
    kinds: BTreeMap<EntityKind, Vec<Record>>,
}

impl SyncPayload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the records for a kind, marking the kind as present.
    pub fn insert(&mut self, kind: EntityKind, records: Vec<Record>) {
        self.kinds.insert(kind, records);
    }

    /// Append one record to a kind.
    pub fn push(&mut self, kind: EntityKind, record: Record) {
        self.kinds.entry(kind).or_default().push(record);
    }

    /// Records for a kind, or None if the kind is absent.
    pub fn records(&self, kind: EntityKind) -> Option<&[Record]> {
        self.kinds.get(&kind).map(|v| v.as_slice())
    }

    /// Kinds present in the payload.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.kinds.keys().copied()
    }

    /// Iterate over present kinds and their records.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &[Record])> {
        self.kinds.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Total number of records across all kinds.
    pub fn record_count(&self) -> usize {
        self.kinds.values().map(Vec::len).sum()
    }

    /// True when no kind carries any record.
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Render the payload in its wire shape.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for (kind, records) in &self.kinds {
            let value = if kind.is_singleton() && records.len() <= 1 {
                records
                    .first()
                    .map(|r| r.to_wire(*kind))
                    .unwrap_or(Value::Null)
            } else {
                Value::Array(records.iter().map(|r| r.to_wire(*kind)).collect())
            };
            object.insert(kind.wire_name().to_string(), value);
        }
        Value::Object(object)
    }

    /// Parse a payload from its wire shape.
    ///
    /// Unknown keys are ignored so newer servers can add kinds without
    /// breaking older clients.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(Error::Serialization(
                "Sync payload must be a JSON object".to_string(),
            ));
        };

        let mut payload = Self::new();
        for (key, value) in object {
            let Some(kind) = EntityKind::from_wire_name(&key) else {
                continue;
            };
            let records = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| Record::from_wire(kind, item))
                    .collect::<Result<Vec<_>>>()?,
                object @ Value::Object(_) => vec![Record::from_wire(kind, object)?],
                other => {
                    return Err(Error::Serialization(format!(
                        "Invalid value for {}: {}",
                        key, other
                    )))
                }
            };
            payload.insert(kind, records);
        }
        Ok(payload)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_value()).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        Self::from_value(value)
    }
}

impl Serialize for SyncPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SyncPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}
