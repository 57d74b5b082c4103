use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Open,
    Contacted,
    Closed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Contacted => "contacted",
            RequestStatus::Closed => "closed",
        }
    }

    /// Strict decoding for values read back from the row store.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "open" => Some(RequestStatus::Open),
            "contacted" => Some(RequestStatus::Contacted),
            "closed" => Some(RequestStatus::Closed),
            _ => None,
        }
    }
}

/// Status selector used by the staff list; `Any` is the "all" tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Any,
    Only(RequestStatus),
}

impl StatusFilter {
    pub fn status(self) -> Option<RequestStatus> {
        match self {
            StatusFilter::Any => None,
            StatusFilter::Only(status) => Some(status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Admin,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Admin => "admin",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "user" => Some(SenderType::User),
            "admin" => Some(SenderType::Admin),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            SenderType::User => SenderType::Admin,
            SenderType::Admin => SenderType::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: String,
    pub first_message: String,
    pub page_path: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub request_id: String,
    pub sender_type: SenderType,
    pub sender_label: Option<String>,
    pub message_text: Option<String>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_mime: Option<String>,
    pub attachment_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub read_by_admin_at: Option<DateTime<Utc>>,
    pub read_by_user_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: Option<String>,
    pub mime: Option<String>,
    pub size: Option<i64>,
}

/// Identity supplied by the client-auth endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffIdentity {
    pub label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, alias = "fullName")]
    pub user_name: Option<String>,
    #[serde(default, alias = "email")]
    pub user_email: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub page_path: Option<String>,
    #[serde(default)]
    pub notify_admin: Option<bool>,
    /// The older snake_case spelling, read separately so a body may carry both.
    #[serde(default, rename = "notify_admin")]
    pub notify_admin_legacy: Option<bool>,
}

impl CreateRequestBody {
    /// Either spelling set to `false` opts out of the staff email.
    pub fn wants_notification(&self) -> bool {
        self.notify_admin != Some(false) && self.notify_admin_legacy != Some(false)
    }
}

/// Body shared by the staff and client send endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub message_text: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_mime: Option<String>,
    #[serde(default)]
    pub attachment_size: Option<Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub page_path: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThreadQuery {
    pub limit: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedRequestResponse {
    #[serde(flatten)]
    pub request: ConversationRequest,
    pub ai_mode_active: bool,
    pub ai_response_sent: bool,
    pub ai_response: Option<ChatMessage>,
    pub ai_response_error: Option<String>,
    pub email_notification_sent: bool,
    pub email_notification_error: Option<String>,
    pub message_store_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub request: Option<ConversationRequest>,
    pub messages: Vec<ChatMessage>,
    pub ai_mode_active: bool,
}

#[derive(Debug, Serialize)]
pub struct StaffSendResponse {
    pub request: ConversationRequest,
    pub message: ChatMessage,
    pub ai_mode_active: bool,
}

#[derive(Debug, Serialize)]
pub struct ClientSendResponse {
    pub request: ConversationRequest,
    pub message: ChatMessage,
    pub ai_mode_active: bool,
    pub ai_response_sent: bool,
    pub ai_response: Option<ChatMessage>,
    pub ai_response_error: Option<String>,
    pub created_request: bool,
    pub email_notification_sent: bool,
    pub email_notification_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub path: String,
    pub public_url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: usize,
}

/// Trims and truncates to `max_chars`; empty input yields an empty string.
pub fn normalize_text(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

pub fn normalize_optional_text(value: Option<&str>, max_chars: usize) -> Option<String> {
    let text = normalize_text(value.unwrap_or(""), max_chars);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_trims_and_truncates() {
        assert_eq!(normalize_text("  hello  ", 80), "hello");
        assert_eq!(normalize_text("abcdef", 3), "abc");
        assert_eq!(normalize_optional_text(Some("   "), 10), None);
        assert_eq!(normalize_optional_text(None, 10), None);
    }

    #[test]
    fn create_body_accepts_legacy_aliases() {
        let body: CreateRequestBody = serde_json::from_value(serde_json::json!({
            "email": "c@d.com",
            "fullName": "Casey",
            "firstMessage": "Hi",
            "notifyAdmin": false
        }))
        .unwrap();
        assert_eq!(body.user_email.as_deref(), Some("c@d.com"));
        assert_eq!(body.user_name.as_deref(), Some("Casey"));
        assert_eq!(body.notify_admin, Some(false));
        assert!(!body.wants_notification());
    }

    #[test]
    fn either_notify_spelling_opts_out() {
        let both: CreateRequestBody = serde_json::from_value(serde_json::json!({
            "userEmail": "c@d.com",
            "firstMessage": "Hi",
            "notifyAdmin": true,
            "notify_admin": false
        }))
        .unwrap();
        assert!(!both.wants_notification());

        let legacy: CreateRequestBody =
            serde_json::from_value(serde_json::json!({ "notify_admin": false })).unwrap();
        assert!(!legacy.wants_notification());

        let silent: CreateRequestBody = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(silent.wants_notification());
    }

    #[test]
    fn created_response_flattens_the_request_row() {
        let now = Utc::now();
        let response = CreatedRequestResponse {
            request: ConversationRequest {
                id: "r1".into(),
                user_id: None,
                user_name: None,
                user_email: "c@d.com".into(),
                first_message: "Hi".into(),
                page_path: "/".into(),
                status: RequestStatus::Open,
                created_at: now,
                updated_at: now,
            },
            ai_mode_active: true,
            ai_response_sent: false,
            ai_response: None,
            ai_response_error: None,
            email_notification_sent: false,
            email_notification_error: None,
            message_store_error: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], "r1");
        assert_eq!(value["status"], "open");
        assert_eq!(value["ai_mode_active"], true);
    }
}
