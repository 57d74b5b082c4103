use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::ChatStore;
use crate::error::{ChatError, ChatResult};
use crate::handoff::is_ai_sender_label;
use crate::types::{ChatMessage, ConversationRequest, RequestStatus, SenderType};

#[derive(Default)]
struct Tables {
    requests: HashMap<String, ConversationRequest>,
    // Insertion order doubles as the tie-breaker for equal timestamps.
    messages: Vec<ChatMessage>,
}

/// Process-local store used by tests and `STORE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryChatStore {
    tables: RwLock<Tables>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn any_admin_message(&self, request_id: &str, assistant: bool) -> bool {
        self.messages.iter().any(|message| {
            message.request_id == request_id
                && message.sender_type == SenderType::Admin
                && is_ai_sender_label(message.sender_label.as_deref()) == assistant
        })
    }
}

fn newest_first(mut rows: Vec<ConversationRequest>, limit: usize) -> Vec<ConversationRequest> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows.truncate(limit);
    rows
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn insert_request(&self, request: &ConversationRequest) -> ChatResult<()> {
        let mut tables = self.tables.write().await;
        if tables.requests.contains_key(&request.id) {
            return Err(ChatError::upstream(format!(
                "duplicate live chat request id {}",
                request.id
            )));
        }
        tables
            .requests
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &str) -> ChatResult<Option<ConversationRequest>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.get(id).cloned())
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>> {
        let tables = self.tables.read().await;
        let rows = tables
            .requests
            .values()
            .filter(|row| status.map(|s| row.status == s).unwrap_or(true))
            .cloned()
            .collect();
        Ok(newest_first(rows, limit))
    }

    async fn requests_by_user_id(
        &self,
        user_id: &str,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>> {
        let tables = self.tables.read().await;
        let rows = tables
            .requests
            .values()
            .filter(|row| row.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        Ok(newest_first(rows, limit))
    }

    async fn requests_by_email(
        &self,
        email: &str,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>> {
        let tables = self.tables.read().await;
        let rows = tables
            .requests
            .values()
            .filter(|row| row.user_email.eq_ignore_ascii_case(email))
            .cloned()
            .collect();
        Ok(newest_first(rows, limit))
    }

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> ChatResult<Option<ConversationRequest>> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.requests.get_mut(id) else {
            return Ok(None);
        };
        row.status = status;
        row.updated_at = updated_at;
        Ok(Some(row.clone()))
    }

    async fn delete_request(&self, id: &str) -> ChatResult<bool> {
        let mut tables = self.tables.write().await;
        let removed = tables.requests.remove(id).is_some();
        tables.messages.retain(|message| message.request_id != id);
        Ok(removed)
    }

    async fn insert_message(&self, message: &ChatMessage) -> ChatResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.requests.contains_key(&message.request_id) {
            return Err(ChatError::upstream(format!(
                "live chat request {} does not exist",
                message.request_id
            )));
        }
        tables.messages.push(message.clone());
        Ok(())
    }

    async fn messages_for_request(
        &self,
        request_id: &str,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>> {
        let tables = self.tables.read().await;
        let mut rows = tables
            .messages
            .iter()
            .filter(|message| message.request_id == request_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn has_human_admin_message(&self, request_id: &str) -> ChatResult<bool> {
        Ok(self.tables.read().await.any_admin_message(request_id, false))
    }

    async fn has_assistant_message(&self, request_id: &str) -> ChatResult<bool> {
        Ok(self.tables.read().await.any_admin_message(request_id, true))
    }

    async fn mark_messages_read(
        &self,
        request_id: &str,
        message_ids: &[String],
        author: SenderType,
        read_at: DateTime<Utc>,
    ) -> ChatResult<u64> {
        let ids = message_ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for message in tables.messages.iter_mut() {
            if message.request_id != request_id
                || message.sender_type != author
                || !ids.contains(message.id.as_str())
            {
                continue;
            }
            let receipt = match author {
                SenderType::User => &mut message.read_by_admin_at,
                SenderType::Admin => &mut message.read_by_user_at,
            };
            if receipt.is_none() {
                *receipt = Some(read_at);
                touched += 1;
            }
        }
        Ok(touched)
    }
}
