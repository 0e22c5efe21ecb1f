use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error_codes::{CodedError, MISSING_CREDENTIAL, SERVICE_EMPTY_RESPONSE};
use crate::services::{request_failed, status_failed, ImageHost, UploadedImage};

pub const DEFAULT_IMGBB_ENDPOINT: &str = "https://api.imgbb.com/1/upload";
pub const IMGBB_API_KEY_ENV: &str = "IMGBB_API_KEY";
const SERVICE: &str = "imgbb";

#[derive(Debug, Clone)]
pub struct ImgBbHost {
    http: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ImgBbResponse {
    #[serde(default)]
    success: bool,
    data: Option<ImgBbData>,
}

#[derive(Debug, Deserialize)]
struct ImgBbData {
    id: String,
    url: String,
    #[serde(default)]
    delete_url: String,
}

impl ImgBbHost {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            endpoint: DEFAULT_IMGBB_ENDPOINT.to_owned(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn upload_url(&self, key: &str) -> Result<Url> {
        Url::parse_with_params(&self.endpoint, &[("key", key)])
            .with_context(|| format!("invalid upload endpoint '{}'", self.endpoint))
    }
}

impl ImageHost for ImgBbHost {
    async fn upload(&self, encoded: &[u8], credential: Option<&str>) -> Result<UploadedImage> {
        let key = credential
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow!(CodedError::external(
                    MISSING_CREDENTIAL,
                    format!("an ImgBB API key is required (set {IMGBB_API_KEY_ENV} or save one in settings)"),
                ))
            })?;
        let url = self.upload_url(key)?;
        debug!(bytes = encoded.len(), "uploading image");

        let response = self
            .http
            .post(url)
            .form(&[("image", STANDARD.encode(encoded))])
            .send()
            .await
            .map_err(|error| request_failed(SERVICE, error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| request_failed(SERVICE, error))?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|payload| {
                    payload
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| format!("upload failed: HTTP {}", status.as_u16()));
            return Err(status_failed(SERVICE, status.as_u16(), message));
        }

        let parsed: ImgBbResponse = serde_json::from_str(&body).map_err(|error| {
            anyhow!(CodedError::external(
                SERVICE_EMPTY_RESPONSE,
                format!("unexpected upload response: {error}"),
            ))
        })?;
        match parsed.data {
            Some(data) if parsed.success => Ok(UploadedImage {
                id: data.id,
                url: data.url,
                delete_url: data.delete_url,
            }),
            _ => Err(anyhow!(CodedError::external(
                SERVICE_EMPTY_RESPONSE,
                "upload was not accepted by the host",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;

    #[test]
    fn key_is_passed_as_query_parameter() {
        let host = ImgBbHost::new(Client::new()).with_endpoint("http://127.0.0.1:1/1/upload");
        let url = host.upload_url("a b&c").expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:1/1/upload?key=a+b%26c");
    }

    #[tokio::test]
    async fn missing_key_is_rejected_locally() {
        let host = ImgBbHost::new(Client::new()).with_endpoint("http://127.0.0.1:9/1/upload");
        let error = host.upload(b"png", None).await.unwrap_err();
        assert_eq!(find_coded_error(&error).expect("coded").code, MISSING_CREDENTIAL);
    }
}
