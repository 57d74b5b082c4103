//! Process configuration read from the environment (a `.env` file is loaded
//! first by `run`).

use std::path::PathBuf;

use crate::error::{ChatError, ChatResult};

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_BUCKET: &str = "cms-uploads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    Local {
        media_dir: PathBuf,
        public_base_url: String,
    },
    Http {
        storage_url: String,
        service_key: String,
        bucket: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when set, STARTTLS otherwise.
    pub secure: bool,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub notify_to: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub blobs: BlobBackend,
    pub auth_url: Option<String>,
    /// Sent as `apikey` to the client-auth endpoint.
    pub auth_api_key: Option<String>,
    pub admin_username: String,
    pub admin_token: Option<String>,
    /// `None` unless every SMTP setting is present.
    pub smtp: Option<SmtpConfig>,
    pub logo_url: String,
}

impl Config {
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ChatResult<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ChatError::Config(format!("PORT is not a valid port: {raw}")))?,
            None => DEFAULT_PORT,
        };

        let store = match get("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: resolve_database_url(&get),
            },
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ChatError::Config(format!(
                    "unknown STORE_BACKEND {other:?} (expected postgres or memory)"
                )))
            }
        };

        let storage_url = get("STORAGE_URL").map(|url| url.trim_end_matches('/').to_string());
        let blobs = match get("BLOB_BACKEND").as_deref().unwrap_or("local") {
            "local" => BlobBackend::Local {
                media_dir: get("MEDIA_STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./media_uploads")),
                public_base_url: get("API_PUBLIC_URL")
                    .unwrap_or_else(|| format!("http://localhost:{port}"))
                    .trim_end_matches('/')
                    .to_string(),
            },
            "http" => BlobBackend::Http {
                storage_url: storage_url.clone().ok_or_else(|| {
                    ChatError::Config("STORAGE_URL is required when BLOB_BACKEND=http".into())
                })?,
                service_key: get("STORAGE_SERVICE_KEY").ok_or_else(|| {
                    ChatError::Config(
                        "STORAGE_SERVICE_KEY is required when BLOB_BACKEND=http".into(),
                    )
                })?,
                bucket: get("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            },
            other => {
                return Err(ChatError::Config(format!(
                    "unknown BLOB_BACKEND {other:?} (expected local or http)"
                )))
            }
        };

        let auth_url = get("AUTH_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .or(storage_url);

        let site_base_url = get("SITE_BASE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let logo_url = get("BRAND_LOGO_URL")
            .unwrap_or_else(|| format!("{site_base_url}/images/logo.png"));

        Ok(Self {
            port,
            store,
            blobs,
            auth_url,
            auth_api_key: get("AUTH_API_KEY").or_else(|| get("STORAGE_SERVICE_KEY")),
            admin_username: get("ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
            admin_token: get("ADMIN_TOKEN"),
            smtp: resolve_smtp(&get),
            logo_url,
        })
    }
}

fn resolve_database_url(get: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(url) = get("DATABASE_URL") {
        return url;
    }
    let either = |primary: &str, fallback: &str, default: &str| {
        get(primary)
            .or_else(|| get(fallback))
            .unwrap_or_else(|| default.to_string())
    };
    let host = either("POSTGRES_HOST", "PGHOST", "localhost");
    let port = either("POSTGRES_PORT", "PGPORT", "5432");
    let user = either("POSTGRES_USER", "PGUSER", "postgres");
    let password = either("POSTGRES_PASSWORD", "PGPASSWORD", "postgres");
    let db = either("POSTGRES_DB", "PGDATABASE", "live_chat");
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn resolve_smtp(get: &impl Fn(&str) -> Option<String>) -> Option<SmtpConfig> {
    let port = get("SMTP_PORT")
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_SMTP_PORT);
    Some(SmtpConfig {
        host: get("SMTP_HOST")?,
        port,
        secure: get("SMTP_SECURE").map(|v| parse_bool(&v)).unwrap_or(false),
        user: get("SMTP_USER")?,
        pass: get("SMTP_PASS")?,
        from: get("SMTP_FROM")?,
        notify_to: get("LIVE_CHAT_NOTIFICATION_EMAIL")?,
    })
}
