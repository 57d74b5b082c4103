//! Append-only message ledger operations on top of [`ChatStore`].

use chrono::Utc;
use reqwest::Url;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::store::ChatStore;
use crate::types::{
    normalize_optional_text, Attachment, ChatMessage, SendMessageBody, SenderType,
};

pub const MAX_MESSAGE_CHARS: usize = 8000;
pub const MAX_ATTACHMENT_NAME_CHARS: usize = 255;
pub const MAX_ATTACHMENT_MIME_CHARS: usize = 160;
pub const MAX_SENDER_LABEL_CHARS: usize = 120;

pub const DEFAULT_STORE_LIMIT: usize = 400;
pub const DEFAULT_THREAD_LIMIT: usize = 600;
pub const MAX_LIMIT: usize = 1000;

/// Validated content of a message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> ChatResult<Self> {
        Self::new(Some(text.into()), None)
    }

    pub fn new(text: Option<String>, attachment: Option<Attachment>) -> ChatResult<Self> {
        let text = normalize_optional_text(text.as_deref(), MAX_MESSAGE_CHARS);
        if text.is_none() && attachment.is_none() {
            return Err(ChatError::validation(
                "Message text or attachment is required",
            ));
        }
        Ok(Self { text, attachment })
    }

    /// Builds a draft from a send body. A non-empty `attachment_url` that is
    /// not an absolute http(s) URL is rejected outright.
    pub fn from_body(body: &SendMessageBody) -> ChatResult<Self> {
        let attachment = match normalize_optional_text(body.attachment_url.as_deref(), 2048) {
            None => None,
            Some(raw) => {
                let url = normalize_attachment_url(&raw).ok_or_else(|| {
                    ChatError::validation("attachment_url must be an absolute http(s) URL")
                })?;
                Some(Attachment {
                    url,
                    name: normalize_optional_text(
                        body.attachment_name.as_deref(),
                        MAX_ATTACHMENT_NAME_CHARS,
                    ),
                    mime: normalize_optional_text(
                        body.attachment_mime.as_deref(),
                        MAX_ATTACHMENT_MIME_CHARS,
                    ),
                    size: body.attachment_size.as_ref().and_then(normalize_attachment_size),
                })
            }
        };
        Self::new(body.message_text.clone(), attachment)
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }
}

pub fn normalize_attachment_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(parsed.to_string()),
        _ => None,
    }
}

/// Accepts a JSON number or numeric string; negatives and non-finite values are dropped.
pub fn normalize_attachment_size(value: &Value) -> Option<i64> {
    let numeric = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !numeric.is_finite() || numeric < 0.0 {
        return None;
    }
    Some(numeric.trunc() as i64)
}

/// Parses a `?limit=` value, clamped to `1..=MAX_LIMIT`.
pub fn parse_limit(raw: Option<&str>, fallback: usize) -> usize {
    let Some(numeric) = raw.and_then(|v| v.trim().parse::<f64>().ok()) else {
        return fallback;
    };
    if !numeric.is_finite() {
        return fallback;
    }
    (numeric.trunc() as i64).clamp(1, MAX_LIMIT as i64) as usize
}

/// Stores a new message. The sender's own side is stamped as read at insert time.
pub async fn append(
    store: &dyn ChatStore,
    request_id: &str,
    sender_type: SenderType,
    sender_label: Option<&str>,
    draft: MessageDraft,
) -> ChatResult<ChatMessage> {
    let now = Utc::now();
    let (attachment_url, attachment_name, attachment_mime, attachment_size) = match draft.attachment
    {
        Some(a) => (Some(a.url), a.name, a.mime, a.size),
        None => (None, None, None, None),
    };
    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        sender_type,
        sender_label: normalize_optional_text(sender_label, MAX_SENDER_LABEL_CHARS),
        message_text: draft.text,
        attachment_url,
        attachment_name,
        attachment_mime,
        attachment_size,
        created_at: now,
        read_by_admin_at: (sender_type == SenderType::Admin).then_some(now),
        read_by_user_at: (sender_type == SenderType::User).then_some(now),
    };
    store.insert_message(&message).await?;
    Ok(message)
}

/// Oldest first; `None` falls back to [`DEFAULT_STORE_LIMIT`].
pub async fn list_by_request(
    store: &dyn ChatStore,
    request_id: &str,
    limit: Option<usize>,
) -> ChatResult<Vec<ChatMessage>> {
    let limit = limit.unwrap_or(DEFAULT_STORE_LIMIT).clamp(1, MAX_LIMIT);
    store.messages_for_request(request_id, limit).await
}

/// Marks the other side's unread messages as read by `viewer`.
///
/// Only rows whose receipt is still empty are touched, so repeated or
/// concurrent calls never move an existing timestamp.
pub async fn mark_read_batch(
    store: &dyn ChatStore,
    request_id: &str,
    messages: &[ChatMessage],
    viewer: SenderType,
) -> ChatResult<u64> {
    let author = viewer.other();
    let unread_ids = messages
        .iter()
        .filter(|m| m.request_id == request_id && m.sender_type == author)
        .filter(|m| match viewer {
            SenderType::Admin => m.read_by_admin_at.is_none(),
            SenderType::User => m.read_by_user_at.is_none(),
        })
        .map(|m| m.id.clone())
        .collect::<Vec<_>>();

    if unread_ids.is_empty() {
        return Ok(0);
    }

    store
        .mark_messages_read(request_id, &unread_ids, author, Utc::now())
        .await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::store::MemoryChatStore;
    use crate::types::{ConversationRequest, RequestStatus};

    async fn store_with_request(id: &str) -> MemoryChatStore {
        let store = MemoryChatStore::new();
        let now = Utc::now();
        store
            .insert_request(&ConversationRequest {
                id: id.to_string(),
                user_id: None,
                user_name: None,
                user_email: "c@d.com".to_string(),
                first_message: "Hi".to_string(),
                page_path: "/".to_string(),
                status: RequestStatus::Open,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn draft_requires_text_or_attachment() {
        let err = MessageDraft::new(Some("   ".into()), None).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let draft = MessageDraft::text("  hello ").unwrap();
        assert_eq!(draft.text.as_deref(), Some("hello"));
    }

    #[test]
    fn draft_truncates_long_text() {
        let draft = MessageDraft::text("x".repeat(MAX_MESSAGE_CHARS + 50)).unwrap();
        assert_eq!(draft.text.unwrap().chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn attachment_url_must_be_http() {
        let body = SendMessageBody {
            attachment_url: Some("ftp://files.example.com/a.pdf".into()),
            ..Default::default()
        };
        assert!(matches!(
            MessageDraft::from_body(&body),
            Err(ChatError::Validation(_))
        ));

        let body = SendMessageBody {
            attachment_url: Some("not a url".into()),
            message_text: Some("see file".into()),
            ..Default::default()
        };
        assert!(matches!(
            MessageDraft::from_body(&body),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn attachment_only_draft_is_accepted() {
        let body = SendMessageBody {
            attachment_url: Some("https://cdn.example.com/plan.pdf".into()),
            attachment_name: Some("plan.pdf".into()),
            attachment_mime: Some("application/pdf".into()),
            attachment_size: Some(json!(2048.7)),
            ..Default::default()
        };
        let draft = MessageDraft::from_body(&body).unwrap();
        let attachment = draft.attachment.unwrap();
        assert_eq!(attachment.url, "https://cdn.example.com/plan.pdf");
        assert_eq!(attachment.size, Some(2048));
        assert!(draft.text.is_none());
    }

    #[test]
    fn attachment_size_rejects_garbage() {
        assert_eq!(normalize_attachment_size(&json!(-1)), None);
        assert_eq!(normalize_attachment_size(&json!("12")), Some(12));
        assert_eq!(normalize_attachment_size(&json!("abc")), None);
        assert_eq!(normalize_attachment_size(&json!(null)), None);
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(parse_limit(None, 600), 600);
        assert_eq!(parse_limit(Some("abc"), 600), 600);
        assert_eq!(parse_limit(Some("0"), 600), 1);
        assert_eq!(parse_limit(Some("5000"), 600), 1000);
        assert_eq!(parse_limit(Some("25.9"), 600), 25);
    }

    #[tokio::test]
    async fn append_stamps_the_senders_own_receipt() {
        let store = store_with_request("r1").await;
        let user = append(&store, "r1", SenderType::User, Some("Casey"), MessageDraft::text("hi").unwrap())
            .await
            .unwrap();
        assert!(user.read_by_user_at.is_some());
        assert!(user.read_by_admin_at.is_none());

        let admin = append(&store, "r1", SenderType::Admin, Some("alex"), MessageDraft::text("hello").unwrap())
            .await
            .unwrap();
        assert!(admin.read_by_admin_at.is_some());
        assert!(admin.read_by_user_at.is_none());
    }

    #[tokio::test]
    async fn mark_read_batch_is_idempotent() {
        let store = store_with_request("r1").await;
        append(&store, "r1", SenderType::User, None, MessageDraft::text("one").unwrap())
            .await
            .unwrap();
        append(&store, "r1", SenderType::User, None, MessageDraft::text("two").unwrap())
            .await
            .unwrap();

        let snapshot = list_by_request(&store, "r1", None).await.unwrap();
        assert_eq!(mark_read_batch(&store, "r1", &snapshot, SenderType::Admin).await.unwrap(), 2);
        let after_first = list_by_request(&store, "r1", None).await.unwrap();

        // A second poller working from the stale snapshot must not move the receipts.
        assert_eq!(mark_read_batch(&store, "r1", &snapshot, SenderType::Admin).await.unwrap(), 0);
        assert_eq!(mark_read_batch(&store, "r1", &after_first, SenderType::Admin).await.unwrap(), 0);
        let after_second = list_by_request(&store, "r1", None).await.unwrap();
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn viewer_only_marks_the_other_side() {
        let store = store_with_request("r1").await;
        append(&store, "r1", SenderType::User, None, MessageDraft::text("q").unwrap())
            .await
            .unwrap();
        let snapshot = list_by_request(&store, "r1", Some(10)).await.unwrap();
        assert_eq!(mark_read_batch(&store, "r1", &snapshot, SenderType::User).await.unwrap(), 0);
    }
}
