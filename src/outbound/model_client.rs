//! Reqwest-backed OpenAI-compatible chat-completions adapter (spec §4.3).
//!
//! Grounded in `original_source/src/llm_client.py`'s `_make_request` /
//! `call_vlm`: a streaming `POST /chat/completions` request whose
//! `delta.content` chunks are concatenated, tolerating individual
//! malformed chunks rather than aborting the whole call. Retry and
//! abort-on-400 semantics are delegated to [`crate::domain::backoff`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::domain::backoff::{retry_with_backoff, RetryPolicy, Sleeper, TokioSleeper};
use crate::domain::ports::{ImageAttachment, ModelClient, ModelClientError, ModelResponse};

/// HTTP client configuration for the model-serving endpoint.
pub struct ModelHttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

/// Reqwest-backed [`ModelClient`] speaking the OpenAI chat-completions
/// streaming wire format.
pub struct HttpModelClient {
    client: Client,
    base_url: String,
    api_key: String,
    sleeper: TokioSleeper,
}

impl HttpModelClient {
    /// # Errors
    /// Returns [`ModelClientError::Transport`] if the reqwest client
    /// cannot be constructed.
    pub fn new(config: ModelHttpConfig) -> Result<Self, ModelClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ModelClientError::transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
            sleeper: TokioSleeper,
        })
    }

    async fn call_once(
        &self,
        content: MessageContent,
        model_id: &str,
        temperature: f32,
    ) -> Result<ModelResponse, ModelClientError> {
        let url = format!(
            "{base}/chat/completions",
            base = self.base_url.trim_end_matches('/')
        );

        let request_body = ChatCompletionRequest {
            model: model_id.to_owned(),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|error| ModelClientError::transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST || body.contains("bad image format") {
                return Err(ModelClientError::bad_request(body));
            }
            return Err(ModelClientError::transport(format!(
                "model endpoint returned HTTP {status}: {body}"
            )));
        }

        let full_content = collect_stream(response).await?;
        if full_content.trim().is_empty() {
            return Err(ModelClientError::EmptyResponse);
        }

        Ok(ModelResponse {
            content: full_content.trim().to_owned(),
            provider: "openai_compatible".to_owned(),
            model: model_id.to_owned(),
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn text_chat(
        &self,
        prompt: &str,
        model_id: &str,
        temperature: f32,
        max_retries: u32,
    ) -> Result<ModelResponse, ModelClientError> {
        let abort_predicate = |error: &ModelClientError| error.is_terminal();
        let outcome = retry_with_backoff(
            RetryPolicy {
                max_attempts: max_retries,
                base_delay: Duration::from_secs(2),
                abort_predicate: &abort_predicate,
            },
            &self.sleeper as &dyn Sleeper,
            || self.call_once(MessageContent::Text(prompt.to_owned()), model_id, temperature),
        )
        .await;
        outcome.result
    }

    async fn vision_chat(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        model_id: &str,
        temperature: f32,
        max_retries: u32,
    ) -> Result<ModelResponse, ModelClientError> {
        // spec §4.3: at most 10 images per call.
        let capped: Vec<ContentPart> = images
            .iter()
            .take(10)
            .map(|attachment| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: match attachment {
                        ImageAttachment::Url(url) => url.clone(),
                        ImageAttachment::InlineBase64(data) => data_uri(data),
                    },
                },
            })
            .collect();

        let mut parts = vec![ContentPart::Text {
            text: prompt.to_owned(),
        }];
        parts.extend(capped);

        let abort_predicate = |error: &ModelClientError| error.is_terminal();
        let outcome = retry_with_backoff(
            RetryPolicy {
                max_attempts: max_retries,
                base_delay: Duration::from_secs(2),
                abort_predicate: &abort_predicate,
            },
            &self.sleeper as &dyn Sleeper,
            || self.call_once(MessageContent::Parts(parts.clone()), model_id, temperature),
        )
        .await;
        outcome.result
    }
}

fn data_uri(base64_data: &str) -> String {
    if base64_data.starts_with("data:") {
        base64_data.to_owned()
    } else {
        format!("data:image/png;base64,{base64_data}")
    }
}

async fn collect_stream(response: reqwest::Response) -> Result<String, ModelClientError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut full_content = String::new();

    while let Some(chunk) = stream.next().await {
        let Ok(bytes) = chunk else {
            continue;
        };
        let Ok(text) = std::str::from_utf8(&bytes) else {
            continue;
        };
        buffer.push_str(text);

        while let Some(newline_pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline_pos).collect();
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() || payload == "[DONE]" {
                continue;
            }
            let Ok(parsed) = serde_json::from_str::<StreamChunk>(payload) else {
                continue;
            };
            if let Some(choice) = parsed.choices.first() {
                if let Some(content) = &choice.delta.content {
                    full_content.push_str(content);
                }
            }
        }
    }

    Ok(full_content)
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Clone)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Clone)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
