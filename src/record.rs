// Record model shared by every collection

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};

/// Key under which a record's id is persisted
pub const ID_FIELD: &str = "id";

/// Domain fields of a record, in insertion order, excluding the id
pub type Fields = Map<String, Value>;

/// One flat JSON object in a collection file
///
/// The store treats `fields` as opaque; only `id` carries meaning here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(deserialize_with = "positive_id")]
    pub id: u64,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Build a record, dropping any caller-supplied `id` key from the fields
    pub fn new(id: u64, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self { id, fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Overwrite every key present in `partial`, leaving the rest untouched
    ///
    /// Keys outside the record's current field set are inserted verbatim.
    /// An `id` key is ignored so ids stay unique within a collection.
    pub fn apply(&mut self, partial: &Fields) {
        for (key, value) in partial {
            if key == ID_FIELD {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

/// Ids start at 1, so a stored `0` is as bad as a missing id
fn positive_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let id = u64::deserialize(deserializer)?;
    if id == 0 {
        return Err(de::Error::custom("record id must be positive"));
    }
    Ok(id)
}

/// Next id for a collection: one past the largest id present, or 1 when empty
///
/// Stays correct after deletions, unlike `len + 1`. `None` once the largest
/// id is `u64::MAX`.
pub fn next_id(records: &[Record]) -> Option<u64> {
    match records.iter().map(|r| r.id).max() {
        Some(max) => max.checked_add(1),
        None => Some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_new_strips_id_field() {
        let record = Record::new(7, fields(json!({"id": 99, "name": "Ana"})));
        assert_eq!(record.id, 7);
        assert!(record.get("id").is_none());
        assert_eq!(record.get("name"), Some(&json!("Ana")));
    }

    #[test]
    fn test_serializes_flat_with_id_first() {
        let record = Record::new(1, fields(json!({"name": "Ana", "age": 20, "city": "Lima"})));
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text, r#"{"id":1,"name":"Ana","age":20,"city":"Lima"}"#);
    }

    #[test]
    fn test_deserialize_rejects_missing_or_negative_id() {
        assert!(serde_json::from_str::<Record>(r#"{"name":"Ana"}"#).is_err());
        assert!(serde_json::from_str::<Record>(r#"{"id":-1,"name":"Ana"}"#).is_err());
        assert!(serde_json::from_str::<Record>(r#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn test_deserialize_rejects_zero_id() {
        assert!(serde_json::from_str::<Record>(r#"{"id":0,"name":"Ana"}"#).is_err());

        let record = serde_json::from_str::<Record>(r#"{"id":1,"name":"Ana"}"#).unwrap();
        assert_eq!(record.id, 1);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut record = Record::new(1, fields(json!({"name": "Ana", "age": 20, "city": "Lima"})));
        record.apply(&fields(json!({"city": "Cusco", "id": 50, "email": "ana@example.com"})));

        assert_eq!(record.id, 1);
        assert_eq!(record.get("name"), Some(&json!("Ana")));
        assert_eq!(record.get("age"), Some(&json!(20)));
        assert_eq!(record.get("city"), Some(&json!("Cusco")));
        assert_eq!(record.get("email"), Some(&json!("ana@example.com")));
    }

    #[test]
    fn test_apply_empty_partial_is_noop() {
        let original = Record::new(3, fields(json!({"name": "Leo"})));
        let mut record = original.clone();
        record.apply(&Fields::new());
        assert_eq!(record, original);
    }

    #[test]
    fn test_next_id_uses_max_not_len() {
        assert_eq!(next_id(&[]), Some(1));

        let records = vec![
            Record::new(2, Fields::new()),
            Record::new(5, Fields::new()),
            Record::new(3, Fields::new()),
        ];
        assert_eq!(next_id(&records), Some(6));
    }

    #[test]
    fn test_next_id_exhausted() {
        let records = vec![Record::new(u64::MAX, Fields::new())];
        assert_eq!(next_id(&records), None);
    }
}
