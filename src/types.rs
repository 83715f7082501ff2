use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::LeadCaptureAgent;
use crate::reconcile::Reconciler;
use crate::store::LeadStore;

/// Speaker of a conversation turn. Serializes to the lowercase names the
/// chat-completions API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation. The same shape is used for the HTTP wire
/// contract and for the messages sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Lead fields parsed out of a model reply envelope. All fields are optional;
/// absent means "not captured this turn".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<String>,
}

impl LeadPayload {
    /// Trims every field and drops the ones that end up blank.
    pub fn normalize(&mut self) {
        for field in [&mut self.name, &mut self.email, &mut self.phone, &mut self.interests] {
            if let Some(value) = field.take() {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    *field = Some(trimmed.to_string());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none() && self.interests.is_none()
    }

    /// Copies fields from `other` into slots this payload has not filled yet.
    pub fn fill_missing_from(&mut self, other: &LeadPayload) {
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        if self.email.is_none() {
            self.email = other.email.clone();
        }
        if self.phone.is_none() {
            self.phone = other.phone.clone();
        }
        if self.interests.is_none() {
            self.interests = other.interests.clone();
        }
    }
}

/// A persisted lead row.
#[derive(Debug, Clone, Serialize)]
pub struct LeadRecord {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub interests: Option<String>,
    pub created_at: String,
    pub conversation: Option<String>,
}

/// Field set for inserting a new lead. The store assigns id and created_at.
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub interests: Option<String>,
    pub conversation: Option<String>,
}

/// Lead projection returned by the read endpoints. The stored conversation
/// snapshot stays server-side.
#[derive(Debug, Clone, Serialize)]
pub struct LeadView {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub interests: Option<String>,
    pub created_at: String,
}

impl From<&LeadRecord> for LeadView {
    fn from(record: &LeadRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            phone: record.phone.clone(),
            interests: record.interests.clone(),
            created_at: record.created_at.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponseBody {
    pub message: String,
    pub captured_lead_info: Option<LeadPayload>,
}

pub struct AppState {
    pub agent: LeadCaptureAgent,
    pub reconciler: Reconciler,
    pub store: Arc<dyn LeadStore>,
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_turn_roles_serialize_lowercase() {
        let turn = ChatTurn::user("hi");
        let json = serde_json::to_string(&turn).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn payload_normalize_drops_blank_fields() {
        let mut payload = LeadPayload {
            name: Some("  Ana  ".to_string()),
            email: Some("   ".to_string()),
            phone: None,
            interests: Some(String::new()),
        };
        payload.normalize();
        assert_eq!(payload.name.as_deref(), Some("Ana"));
        assert!(payload.email.is_none());
        assert!(payload.interests.is_none());
    }

    #[test]
    fn payload_skips_absent_fields_when_serialized() {
        let payload = LeadPayload { email: Some("a@b.co".to_string()), ..Default::default() };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"email":"a@b.co"}"#);
    }
}
