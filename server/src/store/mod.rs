//! Row store for conversation requests and their messages.
//!
//! The trait mirrors the handful of filtered select/insert/update/delete calls
//! the chat logic needs. Rows come back as typed DTOs; a backend that reads a
//! value it cannot decode reports an upstream error instead of guessing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ChatResult;
use crate::types::{ChatMessage, ConversationRequest, RequestStatus, SenderType};

mod memory;
mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_request(&self, request: &ConversationRequest) -> ChatResult<()>;

    async fn get_request(&self, id: &str) -> ChatResult<Option<ConversationRequest>>;

    /// Newest first, optionally restricted to one status.
    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>>;

    /// Newest first.
    async fn requests_by_user_id(
        &self,
        user_id: &str,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>>;

    /// Newest first, email compared case-insensitively.
    async fn requests_by_email(
        &self,
        email: &str,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>>;

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> ChatResult<Option<ConversationRequest>>;

    /// Removes the request and every message it owns.
    async fn delete_request(&self, id: &str) -> ChatResult<bool>;

    async fn insert_message(&self, message: &ChatMessage) -> ChatResult<()>;

    /// Oldest first, at most `limit` rows.
    async fn messages_for_request(
        &self,
        request_id: &str,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>>;

    /// Whether any staff message in the thread was written by a human, i.e.
    /// its label does not follow the assistant convention. Scans every row.
    async fn has_human_admin_message(&self, request_id: &str) -> ChatResult<bool>;

    /// Whether the assistant has replied anywhere in the thread.
    async fn has_assistant_message(&self, request_id: &str) -> ChatResult<bool>;

    /// Stamps the read receipt that belongs to the reader of `author`'s
    /// messages, only where it is still unset. Returns the rows touched.
    async fn mark_messages_read(
        &self,
        request_id: &str,
        message_ids: &[String],
        author: SenderType,
        read_at: DateTime<Utc>,
    ) -> ChatResult<u64>;
}
