//! HTTP client for a Gemini-style `generateContent` classification endpoint.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::parse::parse_verdict;
use super::prompt::{text_prompt, FRAME_PROMPT};
use super::{Classifier, ClassifierInput};
use crate::error::ClassifierError;
use crate::models::Verdict;
use crate::settings::ClassifierSettings;
use crate::{log_debug, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "classifier";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Inline { inline_data: InlineData },
    Text { text: String },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PromptFeedback {
    block_reason: Option<String>,
}

pub struct GeminiClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClassifier {
    pub fn new(settings: &ClassifierSettings) -> Result<Self, ClassifierError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ClassifierError::Unreachable("no classifier API key configured".into())
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, input: ClassifierInput) -> Result<Verdict, ClassifierError> {
        let kind = input.kind();
        let request = build_request(input);

        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ClassifierError::Unreachable(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|err| ClassifierError::MalformedResponse(err.to_string()))?;
        let text = response_text(body)?;
        log_debug!("classifier answered {} bytes", text.len());

        parse_verdict(&text, kind)
    }
}

fn build_request(input: ClassifierInput) -> GenerateRequest {
    let parts = match input {
        ClassifierInput::Image { png } => vec![
            Part::Inline {
                inline_data: InlineData {
                    mime_type: "image/png",
                    data: STANDARD.encode(png),
                },
            },
            Part::Text {
                text: FRAME_PROMPT.to_string(),
            },
        ],
        ClassifierInput::Text { sender, body } => vec![Part::Text {
            text: text_prompt(&sender, &body),
        }],
    };
    GenerateRequest {
        contents: vec![Content { parts }],
    }
}

/// Error for a non-2xx reply.
fn status_error(status: StatusCode, body: &str) -> ClassifierError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        log_warn!("classifier rate limited");
        return ClassifierError::RateLimited;
    }
    ClassifierError::Unreachable(format!("server returned {}: {}", status.as_u16(), body))
}

fn response_text(body: GenerateResponse) -> Result<String, ClassifierError> {
    if let Some(reason) = body.prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Err(ClassifierError::SafetyBlocked(reason));
    }

    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ClassifierError::MalformedResponse("no candidates in response".into()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ClassifierError::SafetyBlocked("SAFETY".into()));
    }

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ClassifierError::MalformedResponse("empty response text".into()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn image_request_carries_inline_png_and_prompt() {
        let request = build_request(ClassifierInput::Image {
            png: vec![1, 2, 3],
        });
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[0]["inline_data"]["data"], "AQID");
        assert_eq!(parts[1]["text"], FRAME_PROMPT);
    }

    #[test]
    fn joins_candidate_text_parts() {
        let body = decode(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"isSafe\":"},{"text":"false}"}]},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(response_text(body).unwrap(), "{\"isSafe\":false}");
    }

    #[test]
    fn blocked_prompts_are_safety_blocked() {
        let body = decode(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        assert!(matches!(
            response_text(body),
            Err(ClassifierError::SafetyBlocked(_))
        ));

        let body = decode(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        assert!(matches!(
            response_text(body),
            Err(ClassifierError::SafetyBlocked(_))
        ));
    }

    #[test]
    fn empty_responses_are_malformed() {
        assert!(matches!(
            response_text(decode("{}")),
            Err(ClassifierError::MalformedResponse(_))
        ));
        assert!(matches!(
            response_text(decode(r#"{"candidates":[{"content":{"parts":[]}}]}"#)),
            Err(ClassifierError::MalformedResponse(_))
        ));
    }

    #[test]
    fn status_codes_map_to_classifier_errors() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            ClassifierError::RateLimited
        ));
        match status_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded") {
            ClassifierError::Unreachable(message) => {
                assert_eq!(message, "server returned 503: overloaded")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, ""),
            ClassifierError::Unreachable(_)
        ));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let settings = ClassifierSettings::default();
        assert!(GeminiClassifier::new(&settings).is_err());
    }
}
