//! Conversation registry: one row per client conversation.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::store::ChatStore;
use crate::types::{normalize_text, ConversationRequest, RequestStatus, StatusFilter};

pub const MAX_EMAIL_CHARS: usize = 254;
pub const MAX_NAME_CHARS: usize = 160;
pub const MAX_ID_CHARS: usize = 80;
pub const MAX_PAGE_PATH_CHARS: usize = 240;
pub const CLIENT_LOOKUP_LIMIT: usize = 80;
pub const LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: String,
    pub first_message: String,
    pub page_path: String,
}

pub fn normalize_email(value: &str) -> String {
    normalize_text(value, MAX_EMAIL_CHARS).to_lowercase()
}

pub fn normalize_page_path(value: Option<&str>) -> String {
    let path = normalize_text(value.unwrap_or(""), MAX_PAGE_PATH_CHARS);
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

/// Lenient status parsing: `done` means contacted, anything unknown means open.
pub fn parse_status(value: Option<&str>) -> StatusFilter {
    let status = value.unwrap_or("open").trim().to_ascii_lowercase();
    match status.as_str() {
        "contacted" | "done" => StatusFilter::Only(RequestStatus::Contacted),
        "closed" => StatusFilter::Only(RequestStatus::Closed),
        "all" => StatusFilter::Any,
        _ => StatusFilter::Only(RequestStatus::Open),
    }
}

fn name_from_metadata(metadata: Option<&Map<String, Value>>) -> String {
    let Some(metadata) = metadata else {
        return String::new();
    };
    ["full_name", "name"]
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(|value| normalize_text(value, MAX_NAME_CHARS))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Best-effort display name: explicit, then profile metadata, then the email
/// local part, then `"Client"`.
pub fn display_name(
    explicit: Option<&str>,
    metadata: Option<&Map<String, Value>>,
    email: &str,
) -> String {
    let explicit = normalize_text(explicit.unwrap_or(""), MAX_NAME_CHARS);
    if !explicit.is_empty() {
        return explicit;
    }
    let from_metadata = name_from_metadata(metadata);
    if !from_metadata.is_empty() {
        return from_metadata;
    }
    let local_part = normalize_text(email.split('@').next().unwrap_or(""), MAX_NAME_CHARS);
    if !local_part.is_empty() {
        return local_part;
    }
    "Client".to_string()
}

pub async fn create(
    store: &dyn ChatStore,
    new: NewConversation,
) -> ChatResult<ConversationRequest> {
    let user_email = normalize_email(&new.user_email);
    let first_message = normalize_text(&new.first_message, crate::messages::MAX_MESSAGE_CHARS);
    if user_email.is_empty() || first_message.is_empty() {
        return Err(ChatError::validation(
            "userEmail and firstMessage are required",
        ));
    }

    let now = Utc::now();
    let request = ConversationRequest {
        id: Uuid::new_v4().to_string(),
        user_id: new
            .user_id
            .map(|id| normalize_text(&id, MAX_ID_CHARS))
            .filter(|id| !id.is_empty()),
        user_name: new
            .user_name
            .map(|name| normalize_text(&name, MAX_NAME_CHARS))
            .filter(|name| !name.is_empty()),
        user_email,
        first_message,
        page_path: normalize_page_path(Some(new.page_path.as_str())),
        status: RequestStatus::Open,
        created_at: now,
        updated_at: now,
    };
    store.insert_request(&request).await?;
    tracing::info!(request_id = %request.id, page = %request.page_path, "live chat request created");
    Ok(request)
}

pub async fn get_by_id(store: &dyn ChatStore, id: &str) -> ChatResult<Option<ConversationRequest>> {
    let id = normalize_text(id, MAX_ID_CHARS);
    if id.is_empty() {
        return Ok(None);
    }
    store.get_request(&id).await
}

/// Concatenates two lookups, keeps the first row seen per id and orders the
/// result newest first by `created_at`.
pub fn merge_requests(
    primary: Vec<ConversationRequest>,
    secondary: Vec<ConversationRequest>,
) -> Vec<ConversationRequest> {
    let mut seen = HashSet::new();
    let mut merged = primary
        .into_iter()
        .chain(secondary)
        .filter(|row| !row.id.trim().is_empty() && seen.insert(row.id.clone()))
        .collect::<Vec<_>>();
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

/// Picks the conversation a returning client should land in: newest open,
/// else newest contacted, else newest of any status.
pub fn select_active(requests: &[ConversationRequest]) -> Option<&ConversationRequest> {
    requests
        .iter()
        .find(|r| r.status == RequestStatus::Open)
        .or_else(|| requests.iter().find(|r| r.status == RequestStatus::Contacted))
        .or_else(|| requests.first())
}

/// All conversations matching the client's id or email, newest first.
pub async fn requests_for_client(
    store: &dyn ChatStore,
    user_id: Option<&str>,
    email: Option<&str>,
) -> ChatResult<Vec<ConversationRequest>> {
    let user_id = normalize_text(user_id.unwrap_or(""), MAX_ID_CHARS);
    let email = normalize_email(email.unwrap_or(""));

    let by_user_id = if user_id.is_empty() {
        Vec::new()
    } else {
        store
            .requests_by_user_id(&user_id, CLIENT_LOOKUP_LIMIT)
            .await?
    };
    let by_email = if email.is_empty() {
        Vec::new()
    } else {
        store.requests_by_email(&email, CLIENT_LOOKUP_LIMIT).await?
    };
    Ok(merge_requests(by_user_id, by_email))
}

pub async fn find_active_for_client(
    store: &dyn ChatStore,
    user_id: Option<&str>,
    email: Option<&str>,
) -> ChatResult<Option<ConversationRequest>> {
    let requests = requests_for_client(store, user_id, email).await?;
    Ok(select_active(&requests).cloned())
}

/// Like [`find_active_for_client`] but only an `open` conversation qualifies.
pub async fn find_open_for_client(
    store: &dyn ChatStore,
    user_id: Option<&str>,
    email: Option<&str>,
) -> ChatResult<Option<ConversationRequest>> {
    let requests = requests_for_client(store, user_id, email).await?;
    Ok(requests
        .into_iter()
        .find(|r| r.status == RequestStatus::Open))
}

/// Staff status change. Any transition is allowed; the "all" selector
/// collapses to `open`.
pub async fn update_status(
    store: &dyn ChatStore,
    id: &str,
    status: StatusFilter,
) -> ChatResult<Option<ConversationRequest>> {
    let status = status.status().unwrap_or(RequestStatus::Open);
    let updated = store
        .update_request_status(id.trim(), status, Utc::now())
        .await?;
    if let Some(request) = &updated {
        tracing::info!(request_id = %request.id, status = status.as_str(), "live chat status updated");
    }
    Ok(updated)
}

pub fn owned_by_client(
    request: &ConversationRequest,
    user_id: Option<&str>,
    email: Option<&str>,
) -> bool {
    let user_id = normalize_text(user_id.unwrap_or(""), MAX_ID_CHARS);
    let email = normalize_email(email.unwrap_or(""));

    if !user_id.is_empty() && request.user_id.as_deref().map(str::trim) == Some(user_id.as_str()) {
        return true;
    }
    !email.is_empty() && normalize_email(&request.user_email) == email
}

fn matches_query(request: &ConversationRequest, query: &str) -> bool {
    let haystack = [
        request.user_name.as_deref().unwrap_or(""),
        request.user_email.as_str(),
        request.first_message.as_str(),
        request.page_path.as_str(),
        request.status.as_str(),
    ]
    .join(" ")
    .to_lowercase();
    haystack.contains(query)
}

/// Staff list: status filter, optional case-insensitive search, newest first.
pub async fn list(
    store: &dyn ChatStore,
    filter: StatusFilter,
    query: &str,
) -> ChatResult<Vec<ConversationRequest>> {
    let rows = store.list_requests(filter.status(), LIST_LIMIT).await?;
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Ok(rows);
    }
    Ok(rows
        .into_iter()
        .filter(|row| matches_query(row, &query))
        .collect())
}

pub async fn delete(store: &dyn ChatStore, id: &str) -> ChatResult<bool> {
    let removed = store.delete_request(id.trim()).await?;
    if removed {
        tracing::info!(request_id = %id.trim(), "live chat request deleted");
    }
    Ok(removed)
}
