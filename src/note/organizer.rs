//! Optional AI reorganization of the rendered note.

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AiConfig;
use crate::utils::error_chain;

#[derive(Debug, thiserror::Error)]
pub enum OrganizeError {
    #[error("could not reach the organizer endpoint: {0}")]
    Network(String),

    #[error("organizer endpoint replied with HTTP {status}")]
    Rejected { status: u16 },

    #[error("organizer reply was not valid JSON: {0}")]
    BadReply(String),
}

impl OrganizeError {
    pub fn code(&self) -> &'static str {
        match self {
            OrganizeError::Network(_) => "NETWORK_ERROR",
            OrganizeError::Rejected { .. } => "ORGANIZER_REJECTED",
            OrganizeError::BadReply(_) => "INVALID_RESPONSE",
        }
    }
}

/// Client for the configured note-organizer service.
pub struct Organizer {
    http: Client,
    cfg: AiConfig,
}

impl Organizer {
    pub fn new(http: Client, cfg: AiConfig) -> Self {
        Self { http, cfg }
    }

    pub fn is_configured(&self) -> bool {
        !self.cfg.endpoint.trim().is_empty()
    }

    /// Send the rendered markdown out for reorganization. An empty reply means
    /// the service had nothing to offer and the caller keeps the original.
    pub async fn organize(&self, markdown: &str) -> Result<String, OrganizeError> {
        info!("Sending note to organizer at {}", self.cfg.endpoint);
        let response = self
            .http
            .post(&self.cfg.endpoint)
            .bearer_auth(&self.cfg.api_key)
            .json(&serde_json::json!({
                "markdown": markdown,
                "prompt": self.cfg.prompt,
            }))
            .send()
            .await
            .map_err(|err| OrganizeError::Network(error_chain(&err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrganizeError::Rejected {
                status: status.as_u16(),
            });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|err| OrganizeError::BadReply(error_chain(&err)))?;
        let organized = extract_content(&reply);
        if organized.is_empty() {
            debug!("Organizer reply carried no usable content");
        }
        Ok(organized)
    }
}

/// Pull the document out of a loosely shaped reply: the first populated
/// string among `organizedNotes`, `content` and `result`.
pub fn extract_content(reply: &Value) -> String {
    for key in ["organizedNotes", "content", "result"] {
        if let Some(text) = reply.get(key).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return text.to_string();
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_content_prefers_organized_notes() {
        let reply = json!({"organizedNotes": "A", "content": "B", "result": "C"});
        assert_eq!(extract_content(&reply), "A");
    }

    #[test]
    fn extract_content_falls_through_missing_keys() {
        let reply = json!({"content": "B", "result": "C"});
        assert_eq!(extract_content(&reply), "B");
        assert_eq!(extract_content(&json!({"result": "C"})), "C");
    }

    #[test]
    fn extract_content_skips_non_string_values() {
        let reply = json!({"organizedNotes": 42, "content": ["x"], "result": "fallback"});
        assert_eq!(extract_content(&reply), "fallback");
    }

    #[test]
    fn extract_content_yields_empty_for_unusable_replies() {
        assert_eq!(extract_content(&json!({"other": 1})), "");
        assert_eq!(extract_content(&json!({"organizedNotes": "   "})), "");
    }

    #[tokio::test]
    async fn organize_posts_note_with_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/organize")
            .match_header("authorization", "Bearer test-ai-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "markdown": "# Draft\n",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r##"{"organizedNotes": "# Organized\n"}"##)
            .create_async()
            .await;

        let organizer = Organizer::new(
            Client::new(),
            AiConfig {
                endpoint: format!("{}/v1/organize", server.url()),
                api_key: "test-ai-key".to_string(),
                prompt: "tidy this".to_string(),
            },
        );
        let organized = organizer.organize("# Draft\n").await.unwrap();
        assert_eq!(organized, "# Organized\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn organize_surfaces_rejections() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/organize")
            .with_status(500)
            .create_async()
            .await;

        let organizer = Organizer::new(
            Client::new(),
            AiConfig {
                endpoint: format!("{}/v1/organize", server.url()),
                api_key: String::new(),
                prompt: String::new(),
            },
        );
        let err = organizer.organize("# Draft\n").await.unwrap_err();
        assert_eq!(err.code(), "ORGANIZER_REJECTED");
        assert!(err.to_string().contains("500"));
    }
}
