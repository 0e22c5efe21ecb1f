use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error_codes::{
    CodedError, EMPTY_FILTER_TOPIC, EMPTY_TRANSCRIPT, MISSING_CREDENTIAL, SERVICE_EMPTY_RESPONSE,
};
use crate::services::{
    request_failed, status_failed, strip_markdown_code_fences, CleanupMode, TextCleanupService,
};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
const SERVICE: &str = "gemini";

const FILTER_RULES: &[&str] = &[
    "Return only the relevant lines.",
    "Do not change the text content of the lines.",
    "Do not add any conversational filler.",
    "Maintain original formatting.",
];
const SUMMARY_RULES: &[&str] = &[
    "Use past tense.",
    "Focus on the key actions and dialogue.",
    "Keep it under 200 words.",
    "Do not use bullet points, write it as a story paragraph.",
    "Write the summary in the same language as the chatlog content.",
];
const CLEAN_RULES: &[&str] = &[
    "Keep the remaining lines in their original order.",
    "Do not rewrite or translate the lines you keep.",
    "Do not add any conversational filler.",
];

#[derive(Debug, Clone)]
pub struct GeminiCleanup {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiCleanup {
    pub fn new(http: Client, api_key: Option<String>, model: Option<String>) -> Self {
        let model = model
            .and_then(|value| (!value.trim().is_empty()).then_some(value))
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_owned());
        Self {
            http,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: DEFAULT_GEMINI_BASE_URL.to_owned(),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    async fn generate(&self, api_key: &str, prompt: String) -> Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
        });
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| request_failed(SERVICE, error))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_message(&text)
                .unwrap_or_else(|| format!("request failed with HTTP {}", status.as_u16()));
            return Err(status_failed(SERVICE, status.as_u16(), message));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|error| request_failed(SERVICE, error))?;
        let text = normalize_response(&payload)
            .map(|text| strip_markdown_code_fences(&text))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                anyhow!(CodedError::external(
                    SERVICE_EMPTY_RESPONSE,
                    "gemini returned no text",
                ))
            })?;
        Ok(text)
    }
}

impl TextCleanupService for GeminiCleanup {
    async fn cleanup(&self, transcript: &str, instruction: &str, mode: CleanupMode) -> Result<String> {
        let prompt = build_prompt(transcript, instruction, mode)?;
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            anyhow!(CodedError::external(
                MISSING_CREDENTIAL,
                format!("no Gemini API key configured (set {GEMINI_API_KEY_ENV} or save one in settings)"),
            ))
        })?;
        debug!(mode = mode.keyword(), model = %self.model, "requesting transcript cleanup");
        let text = self
            .generate(api_key, prompt)
            .await
            .with_context(|| format!("{} cleanup failed", mode.keyword()))?;
        info!(
            mode = mode.keyword(),
            input_chars = transcript.len(),
            output_chars = text.len(),
            "transcript cleanup finished"
        );
        Ok(text)
    }
}

/// Full prompt text: system instruction, task, rules, then the transcript.
pub fn build_prompt(transcript: &str, instruction: &str, mode: CleanupMode) -> Result<String> {
    if transcript.trim().is_empty() {
        return Err(anyhow!(CodedError::validation(
            EMPTY_TRANSCRIPT,
            "there is no text to send",
        )));
    }
    let instruction = instruction.trim();
    let (system, task, rules): (&str, String, &[&str]) = match mode {
        CleanupMode::TopicFilter => {
            if instruction.is_empty() {
                return Err(anyhow!(CodedError::validation(
                    EMPTY_FILTER_TOPIC,
                    "enter a topic or keyword to filter by",
                )));
            }
            (
                "You are a precise chatlog filter.",
                format!(
                    "Filter this chatlog to strictly retain ONLY the lines that are relevant to the following topic/keyword: \"{instruction}\"."
                ),
                FILTER_RULES,
            )
        }
        CleanupMode::NarrativeSummary => (
            "You are a creative storyteller.",
            "Write a compelling, short narrative summary of the events in this chatlog.".to_owned(),
            SUMMARY_RULES,
        ),
        CleanupMode::GeneralClean => {
            let mut task = "Remove server messages, timestamps and out-of-character chatter from this chatlog, keeping every roleplay line.".to_owned();
            if !instruction.is_empty() {
                task.push_str(&format!(" Additionally: {instruction}"));
            }
            (
                "You are a helpful assistant for Roleplay chatlogs.",
                task,
                CLEAN_RULES,
            )
        }
    };

    let mut prompt = format!("{system}\nI will provide a roleplay chatlog.\nTASK: {task}\n\nRULES:\n");
    for (index, rule) in rules.iter().enumerate() {
        prompt.push_str(&format!("{}. {rule}\n", index + 1));
    }
    prompt.push_str("\nCHATLOG:\n");
    prompt.push_str(transcript.trim_end());
    Ok(prompt)
}

/// First candidate's text parts joined, or a top-level `text` string.
pub fn normalize_response(payload: &Value) -> Option<String> {
    let from_candidate = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .filter(|text| !text.trim().is_empty());
    from_candidate.or_else(|| {
        payload
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_owned)
    })
}

fn error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;

    fn code_of(result: Result<String>) -> &'static str {
        find_coded_error(&result.unwrap_err()).expect("coded").code
    }

    #[test]
    fn filter_prompt_quotes_the_topic_and_ends_with_the_log() {
        let prompt = build_prompt("Jane: hi\n", "car chase", CleanupMode::TopicFilter).expect("prompt");
        assert!(prompt.starts_with("You are a precise chatlog filter.\n"));
        assert!(prompt.contains("topic/keyword: \"car chase\"."));
        assert!(prompt.contains("4. Maintain original formatting."));
        assert!(prompt.ends_with("CHATLOG:\nJane: hi"));
    }

    #[test]
    fn summary_prompt_has_the_word_limit() {
        let prompt = build_prompt("x", "", CleanupMode::NarrativeSummary).expect("prompt");
        assert!(prompt.contains("Keep it under 200 words."));
    }

    #[test]
    fn empty_inputs_are_validation_errors() {
        assert_eq!(
            code_of(build_prompt("  \n", "x", CleanupMode::GeneralClean)),
            EMPTY_TRANSCRIPT
        );
        assert_eq!(
            code_of(build_prompt("Jane: hi", " ", CleanupMode::TopicFilter)),
            EMPTY_FILTER_TOPIC
        );
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let service = GeminiCleanup::new(Client::new(), Some("  ".to_owned()), None)
            .with_base_url("http://127.0.0.1:9");
        let result = service
            .cleanup("Jane: hi", "", CleanupMode::GeneralClean)
            .await;
        assert_eq!(code_of(result), MISSING_CREDENTIAL);
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let service = GeminiCleanup::new(Client::new(), None, Some("m1".to_owned()))
            .with_base_url("http://localhost:1/v1beta/");
        assert_eq!(
            service.endpoint(),
            "http://localhost:1/v1beta/models/m1:generateContent"
        );
    }

    #[test]
    fn responses_are_normalized_once() {
        let candidate = json!({
            "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }]
        });
        assert_eq!(normalize_response(&candidate).as_deref(), Some("ab"));
        let flat = json!({ "text": "flat" });
        assert_eq!(normalize_response(&flat).as_deref(), Some("flat"));
        assert_eq!(normalize_response(&json!({ "candidates": [] })), None);
    }
}
