//! HTTP implementation of `StoryboardClient`

use super::{
    BackendError, DiscussionRequest, ExportRequest, RefineRequest, StoryboardClient,
    StoryboardRequest, CHAPTER_STORYBOARD_PATH, COMMENT_DISCUSSION_PATH, EXPORT_DOCX_PATH,
    INCREMENTAL_STORYBOARD_PATH,
};
use crate::book::ChapterSummaries;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            BackendError::Unavailable(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Storyboard client talking JSON over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and return the raw response text.
    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "POST");

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "backend request failed");
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn post_summaries<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ChapterSummaries, BackendError> {
        let text = self.post(path, body).await?;
        parse_summaries(&text)
    }
}

/// Decode a storyboard reply. Both `<field>` and the backend's
/// `<field>_summaries` naming are accepted.
fn parse_summaries(body: &str) -> Result<ChapterSummaries, BackendError> {
    let value: Value = serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))?;
    let field = |names: &[&str]| -> String {
        names
            .iter()
            .find_map(|n| value.get(*n).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };
    if !value.is_object() {
        return Err(BackendError::Decode(format!(
            "expected a JSON object, got: {}",
            value
        )));
    }
    Ok(ChapterSummaries {
        character_summary: field(&["character_summary", "character_summaries"]),
        location_summary: field(&["location_summary", "location_summaries"]),
        character_relationship_graph: field(&["character_relationship_graph"]),
        timeline_summary: field(&["timeline_summary", "timeline_summaries"]),
        plotpoint_summary: field(&["plotpoint_summary", "plotpoints_summaries"]),
    })
}

/// Accept a bare string, a JSON string, or `{"response": ...}`.
fn parse_discussion_reply(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => map
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Ok(Value::Null) => String::new(),
        _ => body.to_string(),
    }
}

/// The export endpoint answers with base64, optionally JSON-quoted.
fn decode_document(body: &str) -> Result<Vec<u8>, BackendError> {
    let encoded = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        _ => body.trim().to_string(),
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| BackendError::Decode(format!("invalid base64 document: {}", e)))
}

#[async_trait]
impl StoryboardClient for HttpBackend {
    async fn storyboard_chapter(
        &self,
        request: &StoryboardRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        self.post_summaries(CHAPTER_STORYBOARD_PATH, request).await
    }

    async fn refine_chapter(
        &self,
        request: &RefineRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        self.post_summaries(INCREMENTAL_STORYBOARD_PATH, request).await
    }

    async fn discuss(&self, request: &DiscussionRequest) -> Result<String, BackendError> {
        let text = self.post(COMMENT_DISCUSSION_PATH, request).await?;
        Ok(parse_discussion_reply(&text))
    }

    async fn export_docx(&self, request: &ExportRequest) -> Result<Vec<u8>, BackendError> {
        let text = self.post(EXPORT_DOCX_PATH, request).await?;
        decode_document(&text)
    }
}
