//! Character configuration API client.
//!
//! The server owns character records and image assets.  The client only
//! reads whole configurations and turns asset ids into image URLs:
//!
//! | Call                     | Endpoint                                   |
//! |--------------------------|--------------------------------------------|
//! | [`CharacterSource::active`]     | `GET /api/avatar-characters/active`   |
//! | [`CharacterSource::get`]        | `GET /api/avatar-characters/{id}`     |
//! | [`asset_url`]            | `{base}/api/assets/{id}/file`              |

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use super::character::{CharacterConfig, CharacterRecord};

// ---------------------------------------------------------------------------
// CharacterApiError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CharacterApiError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("character request timed out")]
    Timeout,

    /// Non-2xx answer; `detail` is the server's message when it sent one.
    #[error("server answered {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("failed to parse character response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for CharacterApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CharacterApiError::Timeout
        } else {
            CharacterApiError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// CharacterSource trait
// ---------------------------------------------------------------------------

/// Where character configurations come from.
///
/// Implementors must be `Send + Sync` so the window can hold an
/// `Arc<dyn CharacterSource>` and load from a background task.
#[async_trait]
pub trait CharacterSource: Send + Sync {
    /// The character the server currently has selected.
    async fn active(&self) -> Result<CharacterRecord, CharacterApiError>;

    async fn get(&self, character_id: &str) -> Result<CharacterRecord, CharacterApiError>;

    /// Retrievable image URL for an asset id.
    fn asset_url(&self, asset_id: &str) -> String;
}

/// `{base}/api/assets/{id}/file`.
pub fn asset_url(base_url: &str, asset_id: &str) -> String {
    format!("{}/api/assets/{}/file", base_url.trim_end_matches('/'), asset_id)
}

/// Load `character_id` (or the active character) and return its
/// configuration, falling back to the stock configuration on any error.
pub async fn load_config_or_default(
    source: &dyn CharacterSource,
    character_id: Option<&str>,
) -> CharacterConfig {
    let result = match character_id {
        Some(id) => source.get(id).await,
        None => source.active().await,
    };
    match result {
        Ok(record) => {
            log::info!(
                "avatar: loaded character {:?} ({} parts)",
                record.name,
                record.config.parts.len()
            );
            record.config
        }
        Err(e) => {
            log::warn!("avatar: character load failed ({e}), using stock character");
            CharacterConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// HttpCharacterSource
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ActiveResponse {
    character: CharacterRecord,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Talks to the call server's REST API.
pub struct HttpCharacterSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCharacterSource {
    /// A default (no-timeout) client is used if the builder fails.
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/avatar-characters/{}", self.base_url, path)
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CharacterApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.detail)
                .unwrap_or(body);
            return Err(CharacterApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CharacterApiError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CharacterSource for HttpCharacterSource {
    async fn active(&self) -> Result<CharacterRecord, CharacterApiError> {
        let response = self.client.get(self.url("active")).send().await?;
        let body: ActiveResponse = Self::read(response).await?;
        Ok(body.character)
    }

    async fn get(&self, character_id: &str) -> Result<CharacterRecord, CharacterApiError> {
        let response = self.client.get(self.url(character_id)).send().await?;
        Self::read(response).await
    }

    fn asset_url(&self, asset_id: &str) -> String {
        asset_url(&self.base_url, asset_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::avatar::Emotion;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    struct AlwaysFails;

    #[async_trait]
    impl CharacterSource for AlwaysFails {
        async fn active(&self) -> Result<CharacterRecord, CharacterApiError> {
            Err(CharacterApiError::Timeout)
        }

        async fn get(&self, _id: &str) -> Result<CharacterRecord, CharacterApiError> {
            Err(CharacterApiError::Request("connection refused".into()))
        }

        fn asset_url(&self, asset_id: &str) -> String {
            asset_url("http://nowhere", asset_id)
        }
    }

    /// Serve one canned HTTP response and hand back the request head.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = tcp.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            tcp.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (base, task)
    }

    #[test]
    fn asset_urls() {
        assert_eq!(asset_url("http://h:1/", "abc"), "http://h:1/api/assets/abc/file");
        let source = HttpCharacterSource::new("http://h:1///", 5);
        assert_eq!(source.asset_url("x"), "http://h:1/api/assets/x/file");
    }

    #[test]
    fn source_is_object_safe() {
        let source: Box<dyn CharacterSource> = Box::new(HttpCharacterSource::new("http://h", 5));
        assert!(source.asset_url("a").ends_with("/a/file"));
    }

    #[tokio::test]
    async fn failed_load_falls_back_to_stock_character() {
        let config = load_config_or_default(&AlwaysFails, None).await;
        assert_eq!(config, CharacterConfig::default());
        let config = load_config_or_default(&AlwaysFails, Some("c1")).await;
        assert_eq!(config, CharacterConfig::default());
    }

    #[tokio::test]
    async fn fetches_active_character() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"active_character_id":"c1","character":{"character_id":"c1","name":"Mika",
                "config":{"fullMap":{"happy":"a-happy"},"parts":[{"slot":"mouth_open","asset_id":"m"}]}}}"#,
        )
        .await;

        let source = HttpCharacterSource::new(&base, 5);
        let record = source.active().await.unwrap();
        assert_eq!(record.character_id, "c1");
        assert_eq!(record.name, "Mika");
        assert_eq!(record.config.full_map.get(&Emotion::Happy).map(String::as_str), Some("a-happy"));
        assert_eq!(record.config.parts.len(), 1);
        assert_eq!(record.config.hit_areas.len(), 4);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/avatar-characters/active "));
    }

    #[tokio::test]
    async fn not_found_maps_to_status_error() {
        let (base, server) = serve_once("404 Not Found", r#"{"detail":"Character not found"}"#).await;

        let source = HttpCharacterSource::new(&base, 5);
        match source.get("missing").await {
            Err(CharacterApiError::Status { status, detail }) => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Character not found");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/avatar-characters/missing "));
    }
}
