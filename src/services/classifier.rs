use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::models::{ActivityRecord, AnalysisRow, ClassifiedAction, Settings};

/// The external model behind the capture and analysis paths. Endpoint,
/// model, prompts and credential all come from the settings snapshot passed
/// in, never from the implementation.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one capture: page markup (may be empty) plus a screenshot
    /// data URL.
    async fn classify(
        &self,
        settings: &Settings,
        markup: &str,
        screenshot: &str,
    ) -> Result<ClassifiedAction, CaptureError>;

    /// Ask for an analyst's read of every recorded action on one site.
    async fn analyze(
        &self,
        settings: &Settings,
        site: &str,
        records: &[ActivityRecord],
    ) -> Result<Vec<AnalysisRow>, CaptureError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

impl ResponseFormat {
    fn json_object() -> Self {
        Self {
            format_type: "json_object".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisOutput {
    #[serde(default)]
    analysis: Vec<AnalysisRow>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone, Default)]
pub struct ChatCompletionClassifier {
    client: reqwest::Client,
}

impl ChatCompletionClassifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST one request and return the first choice's message content.
    async fn complete(&self, settings: &Settings, request: &ChatRequest) -> Result<String, CaptureError> {
        let response = self
            .client
            .post(&settings.api_endpoint)
            .header("Authorization", format!("Bearer {}", settings.api_token.trim()))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CaptureError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| CaptureError::Parse(format!("envelope: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CaptureError::Parse("response has no message content".to_string()))
    }
}

#[async_trait]
impl Classifier for ChatCompletionClassifier {
    async fn classify(
        &self,
        settings: &Settings,
        markup: &str,
        screenshot: &str,
    ) -> Result<ClassifiedAction, CaptureError> {
        let mut text = settings.capture_prompt.clone();
        if !markup.is_empty() {
            text.push_str("\n\nDOM:\n");
            text.push_str(markup);
        }

        let request = ChatRequest {
            model: settings.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: screenshot.to_string(),
                        },
                    },
                ]),
            }],
            response_format: ResponseFormat::json_object(),
        };

        let content = self.complete(settings, &request).await?;
        parse_json_content(&content)
    }

    async fn analyze(
        &self,
        settings: &Settings,
        site: &str,
        records: &[ActivityRecord],
    ) -> Result<Vec<AnalysisRow>, CaptureError> {
        let serialized =
            serde_json::to_string(records).map_err(|e| CaptureError::Parse(format!("records: {}", e)))?;

        let request = ChatRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: MessageContent::Text(settings.analysis_prompt.clone()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Text(format!(
                        "Site: {}\nRecorded activity:\n{}",
                        site, serialized
                    )),
                },
            ],
            response_format: ResponseFormat::json_object(),
        };

        let content = self.complete(settings, &request).await?;
        let output: AnalysisOutput = parse_json_content(&content)?;
        Ok(output.analysis)
    }
}

fn parse_json_content<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, CaptureError> {
    let clean = strip_code_fences(content);
    serde_json::from_str(clean).map_err(|e| CaptureError::Parse(format!("{} - content: {}", e, clean)))
}

/// Models sometimes wrap JSON in a markdown fence despite being told not to.
fn strip_code_fences(content: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("fence pattern is valid")
    });
    match fence.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    }
}
