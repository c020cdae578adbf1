// Collections hosted by the service

use crate::record::Fields;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name and required fields of one collection
///
/// The store itself is schema-free; this is only the presence check applied
/// before a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub required: &'static [&'static str],
}

/// User profiles managed through `/records`
pub const USERS: Schema = Schema {
    name: "users",
    required: &["name", "age", "city"],
};

/// One entry per chat exchange
pub const CHAT_LOG: Schema = Schema {
    name: "chat_log",
    required: &["message", "reply", "topic"],
};

impl Schema {
    /// File name of the collection inside the data directory
    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    /// Fail with `InvalidInput` naming every required key absent from `fields`
    pub fn check_required(&self, fields: &Fields) -> Result<(), StoreError> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .copied()
            .filter(|key| !fields.contains_key(*key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::InvalidInput(format!("missing fields: {}", missing.join(", "))))
        }
    }
}

/// A logged chat exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub message: String,
    pub reply: String,
    pub topic: String,
    /// RFC 3339 UTC timestamp
    pub created_at: String,
}

impl ChatExchange {
    pub fn new(message: &str, reply: &str, topic: &str) -> Self {
        Self {
            message: message.to_string(),
            reply: reply.to_string(),
            topic: topic.to_string(),
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("message".to_string(), Value::String(self.message));
        fields.insert("reply".to_string(), Value::String(self.reply));
        fields.insert("topic".to_string(), Value::String(self.topic));
        fields.insert("created_at".to_string(), Value::String(self.created_at));
        fields
    }
}
