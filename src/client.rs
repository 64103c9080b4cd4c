//! Client for the external watermark-removal service.
//!
//! Removal is delegated to a multimodal generation model: the source image
//! and a fixed instruction go out in one `generateContent` request, and the
//! first inline image in the reply is taken as the result. Nothing is
//! retried or cached; every failure goes back to the caller as-is.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data_url::{strip_transport_prefix, DataUrl, OUTPUT_MIME};
use crate::error::{Error, Result};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// REST root of the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Instruction sent alongside every image.
pub const DEFAULT_INSTRUCTION: &str = "Identify and remove every watermark in this image \
    (usually in a corner or along an edge, such as platform logos or 'AI generated' labels). \
    Fill the removed area from the surrounding texture and background so the image looks \
    natural and untouched. Output only the edited image data, with no text explanation.";

/// Environment variables searched for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Something that can remove watermarks from an encoded image.
///
/// The batch processor is generic over this trait so the real service can be
/// swapped for a test double.
pub trait WatermarkRemover {
    /// Remove watermarks from `image_data`.
    ///
    /// `image_data` is base64, optionally behind a `data:` URL header, which
    /// is stripped. The returned image is always labelled as PNG.
    fn remove_watermark(
        &self,
        image_data: &str,
        mime_type: &str,
    ) -> impl Future<Output = Result<DataUrl>> + Send;
}

/// Settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key. A missing key fails each call, not construction.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// REST root, without trailing slash.
    pub base_url: String,
    /// Instruction text sent with each image.
    pub instruction: String,
    /// Per-request timeout. `None` waits for as long as the service takes.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Defaults, with the API key read from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = API_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|key| !key.trim().is_empty());
        Self {
            api_key,
            ..Self::default()
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [RequestPart<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    InlineData(InlineData<'a>),
    Text(&'a str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(data: &'a str, mime_type: &'a str, instruction: &'a str) -> Self {
        Self {
            contents: [Content {
                parts: [
                    RequestPart::InlineData(InlineData { mime_type, data }),
                    RequestPart::Text(instruction),
                ],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default, alias = "inline_data")]
    inline_data: Option<ResponseBlob>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlob {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Take the first inline image of the first candidate.
fn extract_image(response: &GenerateContentResponse) -> Result<DataUrl> {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .and_then(|content| content.parts.iter().find_map(|p| p.inline_data.as_ref()))
        .map(|blob| DataUrl::from_base64(blob.data.as_str(), OUTPUT_MIME))
        .ok_or(Error::NoImageReturned)
}

/// Build the error for a non-success response, keeping the service's wording.
fn api_error(status: StatusCode, body: &str) -> Error {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("request rejected")
            .to_string(),
    };
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

/// [`WatermarkRemover`] backed by the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl GeminiClient {
    /// Build a client from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be initialised.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    /// The settings this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl WatermarkRemover for GeminiClient {
    async fn remove_watermark(&self, image_data: &str, mime_type: &str) -> Result<DataUrl> {
        let api_key = self.config.api_key.as_deref().ok_or(Error::MissingApiKey)?;
        let data = strip_transport_prefix(image_data);
        let body = GenerateContentRequest::new(data, mime_type, &self.config.instruction);

        debug!(
            model = %self.config.model,
            mime_type,
            encoded_len = data.len(),
            "Sending generateContent request"
        );

        let response = self
            .http
            .post(self.config.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let err = api_error(status, &text);
            warn!("Service rejected request ({status}): {err}");
            return Err(err);
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
        let result = extract_image(&parsed);
        match &result {
            Ok(image) => debug!("Received {} base64 chars of image data", image.payload().len()),
            Err(e) => warn!("{e}"),
        }
        result
    }
}
