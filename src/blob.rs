// src/blob.rs
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("blob store lock poisoned")]
    Poisoned,
}

/// Key/value object storage for paint images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError>;
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Picks the object extension from the uploaded file name, falling back to
/// the content type.
pub fn extension_for(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return format!(".{}", ext.to_ascii_lowercase());
    }
    match content_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        _ => ".bin",
    }
    .to_string()
}

pub fn paint_image_key(paint_id: i64, file_name: Option<&str>, content_type: &str) -> String {
    format!("paint_{}{}", paint_id, extension_for(file_name, content_type))
}

/// Object gateway reachable over plain HTTP: `PUT`/`DELETE {endpoint}/{bucket}/{key}`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, bucket: &str, token: Option<String>) -> Self {
        HttpBlobStore {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        tracing::info!("Uploading blob {} ({} bytes)", key, bytes.len());
        self.authorize(self.client.put(self.url(key)))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        tracing::info!("Deleting blob {}", key);
        let response = self
            .authorize(self.client.delete(self.url(key)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!("Blob {} already gone", key);
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }
}

/// Blob store kept in process memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        let mut objects = self.objects.lock().map_err(|_| BlobError::Poisoned)?;
        objects.insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let mut objects = self.objects.lock().map_err(|_| BlobError::Poisoned)?;
        objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_prefers_file_name() {
        assert_eq!(extension_for(Some("wall.PNG"), "image/jpeg"), ".png");
        assert_eq!(extension_for(Some("photo.jpeg"), "application/octet-stream"), ".jpeg");
    }

    #[test]
    fn extension_falls_back_to_content_type() {
        assert_eq!(extension_for(None, "image/jpeg"), ".jpg");
        assert_eq!(extension_for(Some("noext"), "image/png"), ".png");
        assert_eq!(extension_for(Some("trailing."), "image/gif"), ".gif");
        assert_eq!(extension_for(None, "text/plain"), ".bin");
        assert_eq!(extension_for(Some("evil.p/ng"), "image/png"), ".png");
    }

    #[test]
    fn image_key_is_derived_from_paint_id() {
        assert_eq!(paint_image_key(42, Some("a.webp"), "image/webp"), "paint_42.webp");
        assert_eq!(paint_image_key(7, None, "image/png"), "paint_7.png");
    }

    #[test]
    fn http_store_builds_bucket_urls() {
        let store = HttpBlobStore::new("http://minio:9000/", "paints", None);
        assert_eq!(store.url("paint_1.png"), "http://minio:9000/paints/paint_1.png");
    }

    /// Serves one request with a canned status line and returns the base url.
    async fn answer_once(status: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn http_delete_of_missing_object_succeeds() {
        let store = HttpBlobStore::new(&answer_once("404 Not Found").await, "paints", None);
        store.delete("paint_1.png").await.unwrap();
    }

    #[tokio::test]
    async fn http_delete_surfaces_gateway_errors() {
        let store = HttpBlobStore::new(
            &answer_once("500 Internal Server Error").await,
            "paints",
            None,
        );
        assert!(matches!(store.delete("paint_1.png").await, Err(BlobError::Http(_))));
    }

    #[tokio::test]
    async fn memory_store_puts_and_deletes() {
        let store = MemoryBlobStore::new();
        store.put("paint_1.png", vec![1, 2, 3], "image/png").await.unwrap();
        assert_eq!(store.get("paint_1.png"), Some((vec![1, 2, 3], "image/png".to_string())));
        store.delete("paint_1.png").await.unwrap();
        assert!(store.is_empty());
    }
}
