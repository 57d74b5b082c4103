//! Attachment ingestion: allow-list, object naming and the blob backends.

use std::path::PathBuf;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::types::UploadResponse;

pub const UPLOAD_LIMIT_BYTES: usize = 15 * 1024 * 1024;
const MAX_SAFE_NAME_CHARS: usize = 120;

const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];

const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "xlsx", "xls", "docx", "jpg", "jpeg", "png", "webp", "gif",
];

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, object_path: &str, content_type: &str, bytes: Bytes)
        -> ChatResult<StoredObject>;
}

pub fn extract_file_extension(name: &str) -> Option<String> {
    let (_, ext) = name.trim().rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// Either an allowed MIME type or an allowed extension is enough.
pub fn is_allowed_attachment(file_name: &str, content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return true;
    }
    extract_file_extension(file_name)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn build_safe_file_name(name: &str) -> String {
    let dashed = name.split_whitespace().collect::<Vec<_>>().join("-");
    let safe = dashed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(MAX_SAFE_NAME_CHARS)
        .collect::<String>();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        safe
    }
}

fn sanitize_path_segment(segment: &str) -> String {
    segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Keeps each segment to `[A-Za-z0-9._-]` so the path can go into a URL
/// as-is, and drops empty, `.` and `..` segments so callers cannot escape
/// their prefix.
pub fn normalize_object_path(path: &str) -> String {
    path.split('/')
        .map(sanitize_path_segment)
        .filter(|segment| !segment.is_empty() && segment != "." && segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Validates an upload and writes it under `prefix`.
pub async fn store_attachment(
    blobs: &dyn BlobStore,
    prefix: &str,
    file: UploadedFile,
) -> ChatResult<UploadResponse> {
    if file.bytes.is_empty() {
        return Err(ChatError::validation("file is required"));
    }
    if file.bytes.len() > UPLOAD_LIMIT_BYTES {
        return Err(ChatError::validation(
            "File is too large. Maximum size is 15MB.",
        ));
    }
    if !is_allowed_attachment(&file.file_name, &file.content_type) {
        return Err(ChatError::validation(
            "Unsupported file type. Only PDF, image, XLSX/XLS, and DOCX files are allowed.",
        ));
    }

    let safe_name = build_safe_file_name(&file.file_name);
    let object_path = normalize_object_path(&format!(
        "{prefix}/{}-{safe_name}",
        Utc::now().timestamp_millis()
    ));
    let size = file.bytes.len();
    let stored = blobs
        .put(&object_path, &file.content_type, file.bytes)
        .await?;
    tracing::info!(path = %stored.path, size, "live chat attachment stored");

    let file_name = if file.file_name.trim().is_empty() {
        safe_name
    } else {
        file.file_name.trim().to_string()
    };
    Ok(UploadResponse {
        path: stored.path,
        public_url: stored.public_url,
        file_name,
        mime_type: file.content_type,
        size,
    })
}

/// Supabase-compatible object storage.
pub struct HttpBlobStore {
    client: reqwest::Client,
    storage_url: String,
    service_key: String,
    bucket: String,
}

impl HttpBlobStore {
    pub fn new(
        client: reqwest::Client,
        storage_url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            storage_url: storage_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(
        &self,
        object_path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> ChatResult<StoredObject> {
        let url = format!(
            "{}/storage/v1/object/{}/{object_path}",
            self.storage_url, self.bucket
        );
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("x-upsert", "false")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::upstream(format!(
                "storage upload failed ({status}): {}",
                body.trim()
            )));
        }

        Ok(StoredObject {
            path: object_path.to_string(),
            public_url: format!(
                "{}/storage/v1/object/public/{}/{object_path}",
                self.storage_url, self.bucket
            ),
        })
    }
}

/// Writes uploads to a local directory served at `/api/media/{file_name}`.
pub struct LocalBlobStore {
    media_dir: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub async fn new(media_dir: PathBuf, public_base_url: impl Into<String>) -> ChatResult<Self> {
        tokio::fs::create_dir_all(&media_dir).await.map_err(|err| {
            ChatError::Config(format!(
                "failed to create media storage directory {}: {err}",
                media_dir.display()
            ))
        })?;
        Ok(Self {
            media_dir,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn media_dir(&self) -> &PathBuf {
        &self.media_dir
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(
        &self,
        object_path: &str,
        _content_type: &str,
        bytes: Bytes,
    ) -> ChatResult<StoredObject> {
        let ext = extract_file_extension(object_path).unwrap_or_else(|| "bin".to_string());
        let file_name = format!("{}.{ext}", Uuid::new_v4());
        tokio::fs::write(self.media_dir.join(&file_name), &bytes).await?;
        Ok(StoredObject {
            path: object_path.to_string(),
            public_url: format!("{}/api/media/{file_name}", self.public_base_url),
        })
    }
}

pub fn is_safe_media_file_name(value: &str) -> bool {
    !value.is_empty()
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

pub fn media_content_type_from_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Reads a stored media file back; returns its content type and bytes.
pub async fn read_media(media_dir: &std::path::Path, file_name: &str) -> ChatResult<(&'static str, Vec<u8>)> {
    if !is_safe_media_file_name(file_name) {
        return Err(ChatError::validation("invalid media file name"));
    }
    let bytes = tokio::fs::read(media_dir.join(file_name))
        .await
        .map_err(|_| ChatError::not_found("media file not found"))?;
    let ext = extract_file_extension(file_name).unwrap_or_default();
    Ok((media_content_type_from_extension(&ext), bytes))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn pdf(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: "application/pdf".to_string(),
            bytes: Bytes::from_static(b"%PDF-1.7"),
        }
    }

    #[test]
    fn allow_list_accepts_mime_or_extension() {
        assert!(is_allowed_attachment("scan.bin", "application/pdf"));
        assert!(is_allowed_attachment("sheet.XLSX", "application/octet-stream"));
        assert!(is_allowed_attachment("photo", "image/png; charset=binary"));
        assert!(!is_allowed_attachment("script.exe", "application/x-msdownload"));
        assert!(!is_allowed_attachment("archive.zip", ""));
    }

    #[test]
    fn safe_file_names() {
        assert_eq!(build_safe_file_name("My Plan (v2).pdf"), "My-Plan-v2.pdf");
        assert_eq!(build_safe_file_name("   "), "file");
        assert_eq!(build_safe_file_name("данные"), "file");
        assert_eq!(build_safe_file_name(&"a".repeat(300)).len(), 120);
    }

    #[test]
    fn object_paths_cannot_escape() {
        assert_eq!(
            normalize_object_path("/live-chat//user/../u1/./draft/"),
            "live-chat/user/u1/draft"
        );
    }

    #[test]
    fn object_path_segments_are_url_safe() {
        assert_eq!(
            normalize_object_path("live-chat/admin/a?b#c d/1-x.pdf"),
            "live-chat/admin/a-b-c-d/1-x.pdf"
        );
        assert_eq!(normalize_object_path("live-chat/%2e%2e/ü"), "live-chat/-2e-2e/-");
    }

    #[test]
    fn media_names_are_checked() {
        assert!(is_safe_media_file_name("0b5c.pdf"));
        assert!(!is_safe_media_file_name("../etc/passwd"));
        assert!(!is_safe_media_file_name("a/b.png"));
        assert!(!is_safe_media_file_name(""));
    }

    #[tokio::test]
    async fn local_store_round_trips_through_media_reader() {
        let dir = tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path().to_path_buf(), "http://localhost:4000/")
            .await
            .unwrap();

        let uploaded = store_attachment(&blobs, "live-chat/admin/general", pdf("brief.pdf"))
            .await
            .unwrap();
        assert!(uploaded.path.starts_with("live-chat/admin/general/"));
        assert!(uploaded.path.ends_with("-brief.pdf"));
        assert_eq!(uploaded.file_name, "brief.pdf");
        assert_eq!(uploaded.size, 8);

        let stored_name = uploaded
            .public_url
            .strip_prefix("http://localhost:4000/api/media/")
            .unwrap();
        let (content_type, bytes) = read_media(blobs.media_dir(), stored_name).await.unwrap();
        assert_eq!(content_type, "application/pdf");
        assert_eq!(bytes, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn rejects_disallowed_and_oversized_files() {
        let dir = tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path().to_path_buf(), "http://localhost")
            .await
            .unwrap();

        let exe = UploadedFile {
            file_name: "setup.exe".into(),
            content_type: "application/x-msdownload".into(),
            bytes: Bytes::from_static(b"MZ"),
        };
        let err = store_attachment(&blobs, "p", exe).await.unwrap_err();
        assert!(err.to_string().starts_with("Unsupported file type"));

        let mut big = pdf("big.pdf");
        big.bytes = Bytes::from(vec![0u8; UPLOAD_LIMIT_BYTES + 1]);
        assert!(matches!(
            store_attachment(&blobs, "p", big).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn http_store_posts_to_the_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/cms-uploads/live-chat/admin/general/a.pdf"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("x-upsert", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Key": "cms-uploads/live-chat/admin/general/a.pdf"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let blobs = HttpBlobStore::new(reqwest::Client::new(), server.uri(), "service-key", "cms-uploads");
        let stored = blobs
            .put("live-chat/admin/general/a.pdf", "application/pdf", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(stored.path, "live-chat/admin/general/a.pdf");
        assert_eq!(
            stored.public_url,
            format!(
                "{}/storage/v1/object/public/cms-uploads/live-chat/admin/general/a.pdf",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn http_store_surfaces_storage_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bucket not found"))
            .mount(&server)
            .await;

        let blobs = HttpBlobStore::new(reqwest::Client::new(), server.uri(), "k", "missing");
        let err = blobs
            .put("a.pdf", "application/pdf", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Upstream(_)));
        assert!(err.to_string().contains("bucket not found"));
    }
}
