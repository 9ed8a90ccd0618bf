use crate::config::Settings;
use crate::domain::attack::DuplicateVerdict;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{JudgeInput, LlmClient, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
        })
    }

    async fn chat_completion(&self, req: ChatCompletionRequest) -> anyhow::Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read OpenAI response body")?;
        if !status.is_success() {
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
            }
            .into());
        }

        let parsed = serde_json::from_str::<ChatCompletionResponse>(&text).map_err(|err| {
            LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage: "parse",
                detail: format!("failed to decode response envelope: {err}"),
                raw_output: Some(text.clone()),
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage: "parse",
                detail: "response contained no message content".to_string(),
                raw_output: Some(text),
            }
            .into());
        }
        Ok(content)
    }

    fn system_prompt() -> String {
        // Keep strict: JSON only, no prose.
        [
            "You are a deduplication judge for a crypto attack tracker.",
            "Given a candidate attack record and a list of existing records, decide whether",
            "the candidate describes the SAME real-world incident as one of the existing records.",
            "Protocol names may differ in spelling or casing; dates may be off by a day or two;",
            "loss amounts may be rounded differently. Different incidents against the same",
            "protocol on clearly different dates are NOT duplicates.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{",
            "  \"is_duplicate\": boolean,",
            "  \"rationale\": string (one short sentence),",
            "  \"matched_protocol\": string or null (protocol_name of the matched existing record),",
            "  \"matched_attack_date\": string or null (attack_date of the matched existing record)",
            "}",
        ]
        .join("\n")
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn judge_duplicate(&self, input: &JudgeInput) -> anyhow::Result<DuplicateVerdict> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Self::system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: input.context_json().to_string(),
                },
            ],
        };

        let content = self.chat_completion(req).await?;
        json::parse_verdict(&content).map_err(|err| {
            LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage: "parse",
                detail: format!("{err:#}"),
                raw_output: Some(content),
            }
            .into()
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
