//! OpenAI Responses API client

use super::{GeneratedText, GenerationRequest, GenerativeClient, TextCitation, Tool};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for `POST /responses`
pub struct OpenAiResponsesClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ToolSpec<'a> {
    #[serde(rename = "web_search_preview")]
    WebSearch,
    #[serde(rename = "file_search")]
    FileSearch { vector_store_ids: Vec<&'a str> },
}

#[derive(Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "output_text")]
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Annotation {
    #[serde(rename = "url_citation")]
    UrlCitation {
        url: String,
        #[serde(default)]
        title: Option<String>,
        start_index: usize,
        end_index: usize,
    },
    #[serde(other)]
    Other,
}

impl OpenAiResponsesClient {
    /// Create a new client
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout_secs,
        })
    }
}

#[async_trait]
impl GenerativeClient for OpenAiResponsesClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText> {
        let url = format!("{}/responses", self.base_url.trim_end_matches('/'));

        let tools = request
            .tools
            .iter()
            .map(|tool| match tool {
                Tool::WebSearch => ToolSpec::WebSearch,
                Tool::DocumentSearch { index_id } => ToolSpec::FileSearch {
                    vector_store_ids: vec![index_id.as_str()],
                },
            })
            .collect();

        let body = ResponsesRequest {
            model: &self.model,
            instructions: &request.instructions,
            input: &request.prompt,
            max_output_tokens: request.max_tokens,
            tools,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::LlmTimeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    AppError::LlmError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let parsed: ResponsesResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse response: {}", e),
        })?;

        extract_generated_text(parsed)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Flatten every `output_text` part into one string, shifting citation
/// offsets to stay aligned with the joined text.
fn extract_generated_text(response: ResponsesResponse) -> Result<GeneratedText> {
    if let Some(err) = response.error {
        return Err(AppError::LlmError { message: err.message });
    }
    if response.status.as_deref() == Some("failed") {
        return Err(AppError::LlmError {
            message: "Response finished with status failed".to_string(),
        });
    }

    let mut generated = GeneratedText::default();
    let mut offset = 0usize;

    let parts = response.output.into_iter().flat_map(|item| match item {
        OutputItem::Message { content } => content,
        OutputItem::Other => Vec::new(),
    });

    for part in parts {
        let ContentPart::OutputText { text, annotations } = part else {
            continue;
        };

        if !generated.text.is_empty() {
            generated.text.push_str("\n\n");
            offset += 2;
        }

        for annotation in annotations {
            if let Annotation::UrlCitation { url, title, start_index, end_index } = annotation {
                generated.citations.push(TextCitation {
                    title: title.unwrap_or_else(|| url.clone()),
                    url,
                    start: offset + start_index,
                    end: offset + end_index,
                });
            }
        }

        offset += text.chars().count();
        generated.text.push_str(&text);
    }

    if generated.text.trim().is_empty() {
        return Err(AppError::LlmError {
            message: "Empty response from generative service".to_string(),
        });
    }

    if response.status.as_deref() == Some("incomplete") {
        tracing::warn!("Generative response incomplete, keeping partial text");
    }

    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> ResponsesResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_extracts_text_and_url_citations() {
        let response = parse(serde_json::json!({
            "status": "completed",
            "output": [
                { "type": "web_search_call", "id": "ws_1", "status": "completed" },
                {
                    "type": "message",
                    "content": [{
                        "type": "output_text",
                        "text": "Revenue grew 40% last year.",
                        "annotations": [
                            { "type": "url_citation", "url": "https://news.example/acme",
                              "title": "Acme raises", "start_index": 0, "end_index": 26 },
                            { "type": "file_citation", "file_id": "file_1", "index": 3 }
                        ]
                    }]
                }
            ]
        }));

        let generated = extract_generated_text(response).unwrap();

        assert_eq!(generated.text, "Revenue grew 40% last year.");
        assert_eq!(generated.citations.len(), 1);
        assert_eq!(generated.citations[0].title, "Acme raises");
        assert_eq!(generated.citations[0].end, 26);
    }

    #[test]
    fn test_offsets_shift_across_parts() {
        let response = parse(serde_json::json!({
            "output": [{
                "type": "message",
                "content": [
                    { "type": "output_text", "text": "First.", "annotations": [] },
                    { "type": "output_text", "text": "Second.", "annotations": [
                        { "type": "url_citation", "url": "https://a.example", "start_index": 0, "end_index": 7 }
                    ]}
                ]
            }]
        }));

        let generated = extract_generated_text(response).unwrap();

        assert_eq!(generated.text, "First.\n\nSecond.");
        assert_eq!(generated.citations[0].start, 8);
        assert_eq!(generated.citations[0].end, 15);
        // missing title falls back to the url
        assert_eq!(generated.citations[0].title, "https://a.example");
    }

    #[test]
    fn test_error_payload_is_failure() {
        let response = parse(serde_json::json!({
            "status": "failed",
            "error": { "message": "rate limited" },
            "output": []
        }));

        match extract_generated_text(response) {
            Err(AppError::LlmError { message }) => assert_eq!(message, "rate limited"),
            other => panic!("unexpected: {:?}", other.map(|g| g.text)),
        }
    }

    #[test]
    fn test_empty_output_is_failure() {
        let response = parse(serde_json::json!({ "status": "completed", "output": [] }));
        assert!(extract_generated_text(response).is_err());
    }

    #[test]
    fn test_tool_specs_serialize() {
        let body = ResponsesRequest {
            model: "gpt-4.1",
            instructions: "sys",
            input: "prompt",
            max_output_tokens: 100,
            tools: vec![
                ToolSpec::WebSearch,
                ToolSpec::FileSearch { vector_store_ids: vec!["vs_123"] },
            ],
        };

        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["tools"][0]["type"], "web_search_preview");
        assert_eq!(value["tools"][1]["type"], "file_search");
        assert_eq!(value["tools"][1]["vector_store_ids"][0], "vs_123");
    }
}
