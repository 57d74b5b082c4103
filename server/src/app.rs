use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::auth::{
    authenticate_client, ClientAuthenticator, DisabledClientAuthenticator,
    HttpClientAuthenticator, StaffAuth,
};
use crate::config::{BlobBackend, Config, StoreBackend};
use crate::error::{ChatError, ChatResult};
use crate::handoff;
use crate::messages::{self, MessageDraft, DEFAULT_THREAD_LIMIT};
use crate::notify::{build_notifier, NewConversationNotice, Notifier};
use crate::registry::{self, NewConversation, MAX_ID_CHARS};
use crate::storage::{self, BlobStore, HttpBlobStore, LocalBlobStore, UploadedFile, UPLOAD_LIMIT_BYTES};
use crate::store::{ChatStore, MemoryChatStore, PgChatStore};
use crate::types::{
    normalize_text, ChatMessage, ClientSendResponse, ClientUser, ConversationRequest,
    CreateRequestBody, CreatedRequestResponse, ListRequestsQuery, RequestStatus, SendMessageBody,
    SenderType, StaffSendResponse, ThreadQuery, ThreadResponse, UploadResponse,
};

/// Multipart framing on top of the file itself.
const UPLOAD_BODY_LIMIT: usize = UPLOAD_LIMIT_BYTES + 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub client_auth: Arc<dyn ClientAuthenticator>,
    pub staff_auth: StaffAuth,
    /// Set when uploads land on local disk and are served from `/api/media`.
    pub media_storage_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
        client_auth: Arc<dyn ClientAuthenticator>,
        staff_auth: StaffAuth,
    ) -> Self {
        Self {
            store,
            blobs,
            notifier,
            client_auth,
            staff_auth,
            media_storage_dir: None,
        }
    }

    pub fn with_media_storage_dir(mut self, dir: PathBuf) -> Self {
        self.media_storage_dir = Some(dir);
        self
    }

    pub async fn from_config(config: &Config) -> ChatResult<Self> {
        let http = reqwest::Client::new();

        let store: Arc<dyn ChatStore> = match &config.store {
            StoreBackend::Postgres { database_url } => {
                Arc::new(PgChatStore::connect(database_url, 10).await?)
            }
            StoreBackend::Memory => {
                tracing::warn!("using the in-memory store; conversations are lost on restart");
                Arc::new(MemoryChatStore::new())
            }
        };

        let (blobs, media_storage_dir): (Arc<dyn BlobStore>, Option<PathBuf>) = match &config.blobs
        {
            BlobBackend::Local {
                media_dir,
                public_base_url,
            } => {
                let local = LocalBlobStore::new(media_dir.clone(), public_base_url.clone()).await?;
                (Arc::new(local), Some(media_dir.clone()))
            }
            BlobBackend::Http {
                storage_url,
                service_key,
                bucket,
            } => (
                Arc::new(HttpBlobStore::new(
                    http.clone(),
                    storage_url.clone(),
                    service_key.clone(),
                    bucket.clone(),
                )),
                None,
            ),
        };

        let client_auth: Arc<dyn ClientAuthenticator> = match &config.auth_url {
            Some(url) => Arc::new(HttpClientAuthenticator::new(
                http,
                url.clone(),
                config.auth_api_key.clone(),
            )),
            None => {
                tracing::warn!("AUTH_URL is not configured; client endpoints will reject every token");
                Arc::new(DisabledClientAuthenticator)
            }
        };

        Ok(Self {
            store,
            blobs,
            notifier: build_notifier(config)?,
            client_auth,
            staff_auth: StaffAuth::new(config.admin_token.clone(), config.admin_username.clone()),
            media_storage_dir,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/media/{file_name}", get(serve_stored_media))
        .route(
            "/live-chat/requests",
            get(list_requests).post(create_request),
        )
        .route(
            "/live-chat/requests/{id}",
            patch(update_request_status).delete(delete_request),
        )
        .route(
            "/live-chat/requests/{id}/messages",
            get(get_request_messages).post(send_staff_message),
        )
        .route(
            "/live-chat/admin/upload",
            post(upload_staff_attachment).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/live-chat/me/request", get(get_my_request))
        .route(
            "/live-chat/me/messages",
            get(get_my_messages).post(send_my_message),
        )
        .route(
            "/live-chat/me/upload",
            post(upload_my_attachment).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn request_not_found() -> ChatError {
    ChatError::not_found("Live chat request not found")
}

/// Assistant side of a user turn, reduced to the fields the API reports.
struct AssistantTurn {
    ai_mode_active: bool,
    ai_response: Option<ChatMessage>,
    ai_response_error: Option<String>,
}

/// Falls back to `false` when the history cannot be read.
async fn derived_ai_mode(store: &dyn ChatStore, request_id: &str) -> bool {
    handoff::current_ai_mode(store, request_id)
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(request_id, error = %err, "failed to derive ai mode");
            false
        })
}

async fn run_assistant_turn(
    store: &dyn ChatStore,
    request_id: &str,
    user_text: Option<&str>,
    has_attachment: bool,
) -> AssistantTurn {
    match handoff::synthesize_reply(store, request_id, user_text, has_attachment).await {
        Ok(outcome) => AssistantTurn {
            ai_mode_active: outcome.ai_mode_active,
            ai_response: outcome.ai_message,
            ai_response_error: None,
        },
        Err(err) => {
            tracing::warn!(request_id, error = %err, "assistant reply failed");
            AssistantTurn {
                ai_mode_active: derived_ai_mode(store, request_id).await,
                ai_response: None,
                ai_response_error: Some(err.to_string()),
            }
        }
    }
}

async fn notify_staff(notifier: &dyn Notifier, request: &ConversationRequest) -> (bool, Option<String>) {
    match notifier
        .notify_new_conversation(&NewConversationNotice::from(request))
        .await
    {
        Ok(()) => (true, None),
        Err(err) => {
            tracing::warn!(request_id = %request.id, error = %err, "live chat notification failed");
            (false, Some(err.to_string()))
        }
    }
}

/// Loads a thread for `viewer` and marks the other side's messages read.
/// The returned messages are the snapshot taken before marking.
async fn load_thread(
    store: &dyn ChatStore,
    request: ConversationRequest,
    limit: usize,
    viewer: SenderType,
) -> ChatResult<ThreadResponse> {
    let messages = messages::list_by_request(store, &request.id, Some(limit)).await?;
    if let Err(err) = messages::mark_read_batch(store, &request.id, &messages, viewer).await {
        tracing::warn!(request_id = %request.id, error = %err, "failed to mark messages read");
    }
    let ai_mode_active = if messages.len() < limit {
        handoff::ai_mode_active(&messages)
    } else {
        derived_ai_mode(store, &request.id).await
    };
    Ok(ThreadResponse {
        request: Some(request),
        messages,
        ai_mode_active,
    })
}

fn client_email(user: &ClientUser) -> String {
    registry::normalize_email(user.email.as_deref().unwrap_or(""))
}

async fn read_upload_form(mut multipart: Multipart) -> ChatResult<(Option<UploadedFile>, Option<String>)> {
    let mut file = None;
    let mut request_id = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ChatError::validation(err.body_text()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ChatError::validation(err.body_text()))?;
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            "request_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ChatError::validation(err.body_text()))?;
                let value = normalize_text(&value, MAX_ID_CHARS);
                if !value.is_empty() {
                    request_id = Some(value);
                }
            }
            _ => {}
        }
    }
    Ok((file, request_id))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": Utc::now().to_rfc3339() }))
}

async fn serve_stored_media(
    Path(file_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ChatError> {
    let Some(dir) = state.media_storage_dir.as_deref() else {
        return Err(ChatError::not_found("media file not found"));
    };
    let (content_type, bytes) = storage::read_media(dir, &file_name).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    )
        .into_response())
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<CreatedRequestResponse>), ChatError> {
    let store = state.store.as_ref();
    let user_email = body.user_email.clone().unwrap_or_default();
    let user_name = registry::display_name(body.user_name.as_deref(), None, &user_email);

    let request = registry::create(
        store,
        NewConversation {
            user_id: body.user_id.clone(),
            user_name: Some(user_name),
            user_email,
            first_message: body.first_message.clone().unwrap_or_default(),
            page_path: body.page_path.clone().unwrap_or_default(),
        },
    )
    .await?;

    let first = MessageDraft::text(request.first_message.clone())?;
    let (turn, message_store_error) = match messages::append(
        store,
        &request.id,
        SenderType::User,
        request.user_name.as_deref(),
        first,
    )
    .await
    {
        Ok(message) => (
            run_assistant_turn(store, &request.id, message.message_text.as_deref(), false).await,
            None,
        ),
        Err(err) => {
            tracing::warn!(request_id = %request.id, error = %err, "failed to store first live chat message");
            let turn = AssistantTurn {
                ai_mode_active: derived_ai_mode(store, &request.id).await,
                ai_response: None,
                ai_response_error: None,
            };
            (turn, Some(err.to_string()))
        }
    };

    let (email_notification_sent, email_notification_error) = if body.wants_notification() {
        notify_staff(state.notifier.as_ref(), &request).await
    } else {
        (false, None)
    };

    Ok((
        StatusCode::CREATED,
        Json(CreatedRequestResponse {
            request,
            ai_mode_active: turn.ai_mode_active,
            ai_response_sent: turn.ai_response.is_some(),
            ai_response: turn.ai_response,
            ai_response_error: turn.ai_response_error,
            email_notification_sent,
            email_notification_error,
            message_store_error,
        }),
    ))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<ConversationRequest>>, ChatError> {
    state.staff_auth.authenticate(&headers)?;
    let filter = registry::parse_status(query.status.as_deref());
    let rows = registry::list(
        state.store.as_ref(),
        filter,
        query.q.as_deref().unwrap_or(""),
    )
    .await?;
    Ok(Json(rows))
}

async fn get_request_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<ThreadResponse>, ChatError> {
    state.staff_auth.authenticate(&headers)?;
    let store = state.store.as_ref();
    let request = registry::get_by_id(store, &id)
        .await?
        .ok_or_else(request_not_found)?;
    let limit = messages::parse_limit(query.limit.as_deref(), DEFAULT_THREAD_LIMIT);
    Ok(Json(load_thread(store, request, limit, SenderType::Admin).await?))
}

async fn send_staff_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<StaffSendResponse>), ChatError> {
    let staff = state.staff_auth.authenticate(&headers)?;
    let store = state.store.as_ref();
    let request = registry::get_by_id(store, &id)
        .await?
        .ok_or_else(request_not_found)?;
    if request.status == RequestStatus::Closed {
        return Err(ChatError::Conflict(
            "This live chat is closed. Re-open it before sending messages.".into(),
        ));
    }
    let draft = MessageDraft::from_body(&body)?;

    let label = if staff.label.trim().is_empty() {
        "admin".to_string()
    } else {
        staff.label
    };
    let message = messages::append(store, &request.id, SenderType::Admin, Some(label.as_str()), draft).await?;
    let ai_mode_active = if handoff::is_ai_sender_label(Some(label.as_str())) {
        derived_ai_mode(store, &request.id).await
    } else {
        false
    };

    Ok((
        StatusCode::CREATED,
        Json(StaffSendResponse {
            request,
            message,
            ai_mode_active,
        }),
    ))
}

async fn update_request_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<ConversationRequest>, ChatError> {
    state.staff_auth.authenticate(&headers)?;
    let Some(status) = body.get("status").and_then(Value::as_str) else {
        return Err(ChatError::validation("No patch data provided"));
    };
    let updated = registry::update_status(
        state.store.as_ref(),
        &id,
        registry::parse_status(Some(status)),
    )
    .await?
    .ok_or_else(request_not_found)?;
    Ok(Json(updated))
}

async fn delete_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state.staff_auth.authenticate(&headers)?;
    registry::delete(state.store.as_ref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_staff_attachment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ChatError> {
    state.staff_auth.authenticate(&headers)?;
    let (file, request_id) = read_upload_form(multipart).await?;
    let file = file.ok_or_else(|| ChatError::validation("file is required"))?;
    let prefix = format!(
        "live-chat/admin/{}",
        request_id.as_deref().unwrap_or("general")
    );
    let uploaded = storage::store_attachment(state.blobs.as_ref(), &prefix, file).await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

async fn get_my_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<ThreadResponse>, ChatError> {
    let user = authenticate_client(state.client_auth.as_ref(), &headers).await?;
    let limit = messages::parse_limit(query.limit.as_deref(), DEFAULT_THREAD_LIMIT);
    active_client_thread(state.store.as_ref(), &user, limit).await
}

async fn active_client_thread(
    store: &dyn ChatStore,
    user: &ClientUser,
    limit: usize,
) -> Result<Json<ThreadResponse>, ChatError> {
    let email = client_email(user);
    let request = registry::find_active_for_client(store, Some(user.id.as_str()), Some(email.as_str())).await?;
    let Some(request) = request else {
        return Ok(Json(ThreadResponse {
            request: None,
            messages: Vec::new(),
            ai_mode_active: true,
        }));
    };
    Ok(Json(load_thread(store, request, limit, SenderType::User).await?))
}

async fn get_my_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<ThreadResponse>, ChatError> {
    let user = authenticate_client(state.client_auth.as_ref(), &headers).await?;
    let store = state.store.as_ref();
    let limit = messages::parse_limit(query.limit.as_deref(), DEFAULT_THREAD_LIMIT);

    let explicit = normalize_text(query.request_id.as_deref().unwrap_or(""), MAX_ID_CHARS);
    if explicit.is_empty() {
        return active_client_thread(store, &user, limit).await;
    }

    let email = client_email(&user);
    let request = registry::get_by_id(store, &explicit)
        .await?
        .filter(|r| registry::owned_by_client(r, Some(user.id.as_str()), Some(email.as_str())))
        .ok_or_else(request_not_found)?;
    Ok(Json(load_thread(store, request, limit, SenderType::User).await?))
}

async fn send_my_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<ClientSendResponse>), ChatError> {
    let user = authenticate_client(state.client_auth.as_ref(), &headers).await?;
    let store = state.store.as_ref();
    let draft = MessageDraft::from_body(&body)?;
    let email = client_email(&user);
    let user_name = registry::display_name(
        body.user_name.as_deref(),
        user.user_metadata.as_ref(),
        &email,
    );

    let explicit = normalize_text(body.request_id.as_deref().unwrap_or(""), MAX_ID_CHARS);
    let explicit = if explicit.is_empty() {
        None
    } else {
        registry::get_by_id(store, &explicit).await?.filter(|r| {
            r.status == RequestStatus::Open
                && registry::owned_by_client(r, Some(user.id.as_str()), Some(email.as_str()))
        })
    };
    let existing = match explicit {
        Some(request) => Some(request),
        None => registry::find_open_for_client(store, Some(user.id.as_str()), Some(email.as_str())).await?,
    };

    let (request, created_request) = match existing {
        Some(request) => (request, false),
        None => {
            let first_message = match (&draft.text, &draft.attachment) {
                (Some(text), _) => text.clone(),
                (None, Some(attachment)) => format!(
                    "Attachment: {}",
                    attachment.name.as_deref().unwrap_or("file")
                ),
                (None, None) => String::new(),
            };
            let request = registry::create(
                store,
                NewConversation {
                    user_id: Some(user.id.clone()),
                    user_name: Some(user_name.clone()),
                    user_email: email.clone(),
                    first_message,
                    page_path: body.page_path.clone().unwrap_or_default(),
                },
            )
            .await?;
            (request, true)
        }
    };

    let has_attachment = draft.has_attachment();
    let label = request.user_name.clone().unwrap_or(user_name);
    let message = messages::append(store, &request.id, SenderType::User, Some(label.as_str()), draft).await?;
    let turn = run_assistant_turn(
        store,
        &request.id,
        message.message_text.as_deref(),
        has_attachment,
    )
    .await;

    let (email_notification_sent, email_notification_error) = if created_request {
        notify_staff(state.notifier.as_ref(), &request).await
    } else {
        (false, None)
    };

    Ok((
        StatusCode::CREATED,
        Json(ClientSendResponse {
            request,
            message,
            ai_mode_active: turn.ai_mode_active,
            ai_response_sent: turn.ai_response.is_some(),
            ai_response: turn.ai_response,
            ai_response_error: turn.ai_response_error,
            created_request,
            email_notification_sent,
            email_notification_error,
        }),
    ))
}

async fn upload_my_attachment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ChatError> {
    let user = authenticate_client(state.client_auth.as_ref(), &headers).await?;
    let (file, request_id) = read_upload_form(multipart).await?;
    let file = file.ok_or_else(|| ChatError::validation("file is required"))?;

    let scope = match request_id {
        Some(id) => {
            let email = client_email(&user);
            registry::get_by_id(state.store.as_ref(), &id)
                .await?
                .filter(|r| registry::owned_by_client(r, Some(user.id.as_str()), Some(email.as_str())))
                .ok_or_else(request_not_found)?
                .id
        }
        None => "draft".to_string(),
    };
    let prefix = format!("live-chat/user/{}/{scope}", user.id.trim());
    let uploaded = storage::store_attachment(state.blobs.as_ref(), &prefix, file).await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

pub async fn run() -> ChatResult<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let state = Arc::new(AppState::from_config(&config).await?);
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("live chat server running at http://localhost:{}", config.port);
    axum::serve(listener, app).await?;
    Ok(())
}
