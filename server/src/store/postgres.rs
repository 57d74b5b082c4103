use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};

use super::ChatStore;
use crate::error::{ChatError, ChatResult};
use crate::types::{ChatMessage, ConversationRequest, RequestStatus, SenderType};

const REQUEST_COLUMNS: &str =
    "id, user_id, user_name, user_email, first_message, page_path, status, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, request_id, sender_type, sender_label, message_text, \
     attachment_url, attachment_name, attachment_mime, attachment_size, created_at, \
     read_by_admin_at, read_by_user_at";

/// SQL twin of `handoff::is_ai_sender_label`.
const ASSISTANT_LABEL_SQL: &str = "(lower(coalesce(sender_label, '')) LIKE '%nemo ai%' \
     OR lower(coalesce(sender_label, '')) LIKE '%ai assistant%')";

pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies the embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> ChatResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn parse_request_row(row: &PgRow) -> ChatResult<ConversationRequest> {
    let status: String = row.try_get("status")?;
    let status = RequestStatus::from_db(&status)
        .ok_or_else(|| ChatError::upstream(format!("unexpected live chat status {status:?}")))?;
    Ok(ConversationRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        user_email: row.try_get("user_email")?,
        first_message: row.try_get("first_message")?,
        page_path: row
            .try_get::<Option<String>, _>("page_path")?
            .unwrap_or_else(|| "/".to_string()),
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_message_row(row: &PgRow) -> ChatResult<ChatMessage> {
    let sender_type: String = row.try_get("sender_type")?;
    let sender_type = SenderType::from_db(&sender_type)
        .ok_or_else(|| ChatError::upstream(format!("unexpected sender type {sender_type:?}")))?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        sender_type,
        sender_label: row.try_get("sender_label")?,
        message_text: row.try_get("message_text")?,
        attachment_url: row.try_get("attachment_url")?,
        attachment_name: row.try_get("attachment_name")?,
        attachment_mime: row.try_get("attachment_mime")?,
        attachment_size: row.try_get("attachment_size")?,
        created_at: row.try_get("created_at")?,
        read_by_admin_at: row.try_get("read_by_admin_at")?,
        read_by_user_at: row.try_get("read_by_user_at")?,
    })
}

fn parse_request_rows(rows: Vec<PgRow>) -> ChatResult<Vec<ConversationRequest>> {
    rows.iter().map(parse_request_row).collect()
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn insert_request(&self, request: &ConversationRequest) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO live_chat_requests (
                id, user_id, user_name, user_email, first_message, page_path, status,
                created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(&request.id)
        .bind(&request.user_id)
        .bind(&request.user_name)
        .bind(&request.user_email)
        .bind(&request.first_message)
        .bind(&request.page_path)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: &str) -> ChatResult<Option<ConversationRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM live_chat_requests WHERE id = $1 LIMIT 1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_request_row).transpose()
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM live_chat_requests \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(status.map(RequestStatus::as_str))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        parse_request_rows(rows)
    }

    async fn requests_by_user_id(
        &self,
        user_id: &str,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM live_chat_requests \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        parse_request_rows(rows)
    }

    async fn requests_by_email(
        &self,
        email: &str,
        limit: usize,
    ) -> ChatResult<Vec<ConversationRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM live_chat_requests \
             WHERE lower(user_email) = lower($1) ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(email)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        parse_request_rows(rows)
    }

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> ChatResult<Option<ConversationRequest>> {
        let row = sqlx::query(&format!(
            "UPDATE live_chat_requests SET status = $1, updated_at = $2 WHERE id = $3 \
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(updated_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_request_row).transpose()
    }

    async fn delete_request(&self, id: &str) -> ChatResult<bool> {
        let result = sqlx::query("DELETE FROM live_chat_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(&self, message: &ChatMessage) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO live_chat_messages (
                id, request_id, sender_type, sender_label, message_text, attachment_url,
                attachment_name, attachment_mime, attachment_size, created_at,
                read_by_admin_at, read_by_user_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(&message.id)
        .bind(&message.request_id)
        .bind(message.sender_type.as_str())
        .bind(&message.sender_label)
        .bind(&message.message_text)
        .bind(&message.attachment_url)
        .bind(&message.attachment_name)
        .bind(&message.attachment_mime)
        .bind(message.attachment_size)
        .bind(message.created_at)
        .bind(message.read_by_admin_at)
        .bind(message.read_by_user_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn messages_for_request(
        &self,
        request_id: &str,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM live_chat_messages \
             WHERE request_id = $1 ORDER BY created_at ASC, seq ASC LIMIT $2"
        ))
        .bind(request_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_message_row).collect()
    }

    async fn has_human_admin_message(&self, request_id: &str) -> ChatResult<bool> {
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM live_chat_messages \
             WHERE request_id = $1 AND sender_type = 'admin' AND NOT {ASSISTANT_LABEL_SQL})"
        ))
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn has_assistant_message(&self, request_id: &str) -> ChatResult<bool> {
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM live_chat_messages \
             WHERE request_id = $1 AND sender_type = 'admin' AND {ASSISTANT_LABEL_SQL})"
        ))
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn mark_messages_read(
        &self,
        request_id: &str,
        message_ids: &[String],
        author: SenderType,
        read_at: DateTime<Utc>,
    ) -> ChatResult<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        // Column names cannot be bound, so each reader side gets its own statement.
        let sql = match author {
            SenderType::User => {
                "UPDATE live_chat_messages SET read_by_admin_at = $1 \
                 WHERE request_id = $2 AND id = ANY($3) AND sender_type = 'user' \
                 AND read_by_admin_at IS NULL"
            }
            SenderType::Admin => {
                "UPDATE live_chat_messages SET read_by_user_at = $1 \
                 WHERE request_id = $2 AND id = ANY($3) AND sender_type = 'admin' \
                 AND read_by_user_at IS NULL"
            }
        };
        let result = sqlx::query(sql)
            .bind(read_at)
            .bind(request_id)
            .bind(message_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
