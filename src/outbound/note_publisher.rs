//! Best-effort downstream note-service publisher (spec §4.9 step 5).
//!
//! Grounded in the same reqwest-adapter shape as
//! [`crate::outbound::gateway`]; unlike the gateway and model adapters
//! this one has no retry loop — the caller already treats publish
//! failures as non-fatal, so one attempt is enough.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::domain::ports::{NotePublishError, NotePublisher};

pub struct NoteServiceHttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

/// Reqwest-backed [`NotePublisher`] posting to a downstream note service.
pub struct HttpNotePublisher {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpNotePublisher {
    /// # Errors
    /// Returns [`NotePublishError::Failed`] if the reqwest client cannot
    /// be constructed.
    pub fn new(config: NoteServiceHttpConfig) -> Result<Self, NotePublishError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| NotePublishError::failed(error.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
        })
    }
}

#[derive(Serialize)]
struct NoteRequest<'a> {
    title: &'a str,
    content: &'a str,
}

#[async_trait]
impl NotePublisher for HttpNotePublisher {
    async fn publish(&self, title: &str, body_markdown: &str) -> Result<(), NotePublishError> {
        let url = format!("{base}/notes", base = self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&NoteRequest {
                title,
                content: body_markdown,
            })
            .send()
            .await
            .map_err(|error| NotePublishError::failed(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotePublishError::failed(format!(
                "note service returned HTTP {status}",
                status = response.status()
            )))
        }
    }
}

/// No-op publisher used when the note service is disabled in config.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotePublisher;

#[async_trait]
impl NotePublisher for NoopNotePublisher {
    async fn publish(&self, _title: &str, _body_markdown: &str) -> Result<(), NotePublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn noop_publisher_always_succeeds() {
        let publisher = NoopNotePublisher;
        assert!(publisher.publish("title", "body").await.is_ok());
    }
}
