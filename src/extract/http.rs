//! HTTP Extraction Client
//!
//! Resolves content through a remote extraction service:
//! `GET {base_url}/extract/{platform}/{content_id}` returning a JSON
//! stream descriptor.

use crate::cache::entry::{CacheKey, StreamDescriptor};
use crate::domain::ports::ExtractionClient;
use crate::error::{Error, ExtractionError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Longest error body kept in an extraction error
const MAX_ERROR_BODY: usize = 256;

const DEFAULT_USER_AGENT: &str = concat!("stream-resolver/", env!("CARGO_PKG_VERSION"));

/// Remote extraction service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub base_url: String,
    /// Whole-request timeout
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_ms: 30_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Configuration(format!(
                "extraction base url must be http(s): {}",
                self.base_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Configuration(
                "extraction timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Extraction client backed by a remote HTTP service
#[derive(Debug, Clone)]
pub struct HttpExtractionClient {
    client: Client,
    base_url: String,
}

impl HttpExtractionClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL resolving one content item
    pub fn endpoint(&self, platform: &str, content_id: &str) -> String {
        format!(
            "{}/extract/{}/{}",
            self.base_url,
            urlencoding::encode(platform),
            urlencoding::encode(content_id)
        )
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    async fn resolve(
        &self,
        platform: &str,
        content_id: &str,
    ) -> std::result::Result<StreamDescriptor, ExtractionError> {
        let url = self.endpoint(platform, content_id);
        debug!(url = %url, "Requesting extraction");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExtractionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(ExtractionError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let descriptor: StreamDescriptor = response
            .json()
            .await
            .map_err(|e| ExtractionError::Rejected(format!("invalid descriptor: {}", e)))?;

        if let Some(reason) = descriptor.error {
            return Err(ExtractionError::Rejected(reason));
        }
        if !descriptor.is_playable() {
            return Err(ExtractionError::NoStream {
                key: CacheKey::new(platform, content_id).to_storage_key(),
            });
        }

        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn extract(Path((platform, id)): Path<(String, String)>) -> axum::response::Response {
        match id.as_str() {
            "missing" => (StatusCode::NOT_FOUND, "no such video").into_response(),
            "geo" => Json(serde_json::json!({ "error": "geo blocked" })).into_response(),
            "empty" => Json(serde_json::json!({ "quality": "720p" })).into_response(),
            _ => Json(serde_json::json!({
                "streamUrl": format!("https://cdn.test/{}/{}", platform, id),
                "audioUrl": "https://cdn.test/audio",
                "quality": "1080p",
            }))
            .into_response(),
        }
    }

    async fn spawn_backend() -> String {
        let app = Router::new().route("/extract/:platform/:id", get(extract));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn client(base_url: String) -> HttpExtractionClient {
        HttpExtractionClient::new(&ExtractionConfig {
            base_url,
            timeout_ms: 2_000,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ExtractionConfig::default().validate().is_ok());

        let config = ExtractionConfig {
            base_url: "ftp://host".into(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_endpoint_encoding() {
        let client = client("https://extract.test/".into());
        assert_eq!(
            client.endpoint("youtube", "a/b?c"),
            "https://extract.test/extract/youtube/a%2Fb%3Fc"
        );
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let client = client(spawn_backend().await);
        let descriptor = client.resolve("youtube", "abc").await.unwrap();
        assert_eq!(
            descriptor.stream_url.as_deref(),
            Some("https://cdn.test/youtube/abc")
        );
        assert!(descriptor.is_split());
        assert_eq!(descriptor.quality.as_deref(), Some("1080p"));
    }

    #[tokio::test]
    async fn test_resolve_failures() {
        let client = client(spawn_backend().await);

        assert_matches!(
            client.resolve("youtube", "missing").await,
            Err(ExtractionError::Remote { status: 404, ref message }) if message == "no such video"
        );
        assert_matches!(
            client.resolve("youtube", "geo").await,
            Err(ExtractionError::Rejected(ref reason)) if reason == "geo blocked"
        );
        assert_matches!(
            client.resolve("youtube", "empty").await,
            Err(ExtractionError::NoStream { ref key }) if key == "youtube:empty"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let client = client("http://127.0.0.1:9".into());
        assert_matches!(
            client.resolve("youtube", "abc").await,
            Err(ExtractionError::Unreachable(_))
        );
    }
}
