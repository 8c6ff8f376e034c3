use serde::Deserialize;
use std::time::Duration;

/// Health/listing calls fail fast; prompt dispatch gets its deadline from the
/// invocation engine.
pub const HEALTH_TIMEOUT_SECS: u64 = 5;

#[derive(Debug)]
pub enum SdkError {
    Unreachable(String),
    Protocol(String),
}

impl std::fmt::Display for SdkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdkError::Unreachable(e) => write!(f, "server unreachable: {e}"),
            SdkError::Protocol(e) => write!(f, "unexpected response: {e}"),
        }
    }
}

/// A session as reported by an external agent runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct SdkSession {
    pub id: String,
    /// Working directory of the session; used for auto-discovery matching.
    #[serde(default, alias = "cwd")]
    pub directory: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One part of a prompt response. Only `text` parts that are not marked
/// ignored contribute to the message posted back into the channel.
#[derive(Debug, Clone, Deserialize)]
pub struct SdkPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ignored: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    #[serde(default)]
    parts: Vec<SdkPart>,
}

/// Thin client for OpenCode-style session servers.
#[derive(Clone)]
pub struct SdkClient {
    http: reqwest::Client,
}

impl Default for SdkClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SdkClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        SdkClient { http }
    }

    pub async fn list_sessions(&self, base_url: &str) -> Result<Vec<SdkSession>, SdkError> {
        let url = format!("{}/session", base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| SdkError::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SdkError::Protocol(format!("HTTP {}", resp.status())));
        }
        resp.json().await.map_err(|e| SdkError::Protocol(e.to_string()))
    }

    pub async fn create_session(&self, base_url: &str) -> Result<SdkSession, SdkError> {
        let url = format!("{}/session", base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| SdkError::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SdkError::Protocol(format!("HTTP {}", resp.status())));
        }
        resp.json().await.map_err(|e| SdkError::Protocol(e.to_string()))
    }

    /// Dispatch a prompt and wait for the completed response. The caller
    /// wraps this in its own deadline.
    pub async fn prompt_session(
        &self,
        base_url: &str,
        session_id: &str,
        prompt: &str,
    ) -> Result<Vec<SdkPart>, SdkError> {
        let url = format!(
            "{}/session/{}/message",
            base_url.trim_end_matches('/'),
            session_id
        );
        let body = serde_json::json!({
            "parts": [{"type": "text", "text": prompt}],
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SdkError::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SdkError::Protocol(format!("HTTP {}", resp.status())));
        }
        let parsed: PromptResponse = resp
            .json()
            .await
            .map_err(|e| SdkError::Protocol(e.to_string()))?;
        Ok(parsed.parts)
    }
}

/// Keep `text` parts with `ignored != true`, concatenate in order, trim.
pub fn extract_text(parts: &[SdkPart]) -> String {
    parts
        .iter()
        .filter(|p| p.kind == "text" && !p.ignored.unwrap_or(false))
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
