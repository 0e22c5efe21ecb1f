//! Adapters for the two remote services: transcript cleanup (Gemini-shaped)
//! and image hosting (ImgBB-shaped). Response shapes are normalized here so
//! callers only ever see `String` or [`UploadedImage`].

pub mod cleanup;
pub mod upload;

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, SERVICE_REQUEST_FAILED};

pub use cleanup::GeminiCleanup;
pub use upload::ImgBbHost;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupMode {
    /// Keep only lines about a topic given as the instruction.
    TopicFilter,
    /// Short past-tense story paragraph.
    NarrativeSummary,
    GeneralClean,
}

impl CleanupMode {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::TopicFilter => "topic-filter",
            Self::NarrativeSummary => "narrative-summary",
            Self::GeneralClean => "general-clean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub id: String,
    pub url: String,
    pub delete_url: String,
}

pub trait TextCleanupService {
    fn cleanup(
        &self,
        transcript: &str,
        instruction: &str,
        mode: CleanupMode,
    ) -> impl Future<Output = Result<String>> + Send;
}

pub trait ImageHost {
    fn upload(
        &self,
        encoded: &[u8],
        credential: Option<&str>,
    ) -> impl Future<Output = Result<UploadedImage>> + Send;
}

pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to create HTTP client")
}

pub(crate) fn request_failed(service: &str, error: reqwest::Error) -> anyhow::Error {
    let reason = if error.is_timeout() {
        "request timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_decode() {
        "response could not be decoded"
    } else {
        "network error"
    };
    anyhow!(CodedError::external(
        SERVICE_REQUEST_FAILED,
        format!("{service}: {reason}: {error}"),
    ))
}

pub(crate) fn status_failed(service: &str, status: u16, message: String) -> anyhow::Error {
    anyhow!(
        CodedError::external(SERVICE_REQUEST_FAILED, format!("{service}: {message}"))
            .with_details(json!({ "status": status }))
    )
}

/// Removes one surrounding markdown fence, with or without a language tag.
pub(crate) fn strip_markdown_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map_or("", |(_, body)| body).trim_end();
        return body.trim_end_matches("```").trim().to_owned();
    }
    trimmed.to_owned()
}
