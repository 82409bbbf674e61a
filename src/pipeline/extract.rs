//! Text extraction: the OCR collaborator boundary.
//!
//! The orchestrator only depends on the [`TextExtractor`] trait. Size bounds
//! are enforced here, before any network call, so an oversized page never
//! costs an API request. [`ClovaOcr`] is the production implementation.

use crate::config::{ClovaOcrConfig, IngestConfig};
use crate::error::IngestError;
use crate::model::RectifiedPage;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Service name used in [`IngestError::ExternalService`].
pub const OCR_SERVICE: &str = "ocr";

/// Recognises text in a single page image.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Return the recognised fragments in reading order.
    ///
    /// Transport failures, timeouts and non-2xx responses must surface as
    /// [`IngestError::ExternalService`]. Implementations must not retry.
    async fn extract(
        &self,
        image: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<Vec<String>, IngestError>;
}

/// Reject images outside `[min, max]` bytes.
pub fn check_image_size(len: usize, min: usize, max: usize) -> Result<(), IngestError> {
    if len < min || len > max {
        return Err(IngestError::Validation(format!(
            "image is {len} bytes; allowed range is {min} to {max} bytes ({} MiB max)",
            max / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Bounds-check a rectified page, then hand it to the extractor.
pub async fn extract_page(
    extractor: &dyn TextExtractor,
    page: &RectifiedPage,
    filename: &str,
    config: &IngestConfig,
) -> Result<Vec<String>, IngestError> {
    check_image_size(page.bytes.len(), config.min_image_bytes, config.max_image_bytes)?;
    extractor
        .extract(&page.bytes, page.content_type(), filename)
        .await
}

// ── CLOVA OCR ────────────────────────────────────────────────────────────

/// HTTP client for the CLOVA general OCR endpoint.
#[derive(Debug, Clone)]
pub struct ClovaOcr {
    client: reqwest::Client,
    config: ClovaOcrConfig,
}

impl ClovaOcr {
    pub fn new(config: ClovaOcrConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("failed to build OCR client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TextExtractor for ClovaOcr {
    async fn extract(
        &self,
        image: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<Vec<String>, IngestError> {
        let format = content_type.split('/').nth(1).unwrap_or("jpg");
        let body = serde_json::json!({
            "version": "V2",
            "requestId": uuid::Uuid::new_v4().to_string(),
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "images": [{
                "format": format,
                "name": filename,
                "data": STANDARD.encode(image),
            }],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("X-OCR-SECRET", &self.config.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(OCR_SERVICE, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(OCR_SERVICE, e))?;
        if !status.is_success() {
            return Err(IngestError::external(
                OCR_SERVICE,
                Some(status.as_u16()),
                text,
            ));
        }

        let fragments = parse_ocr_response(&text)?;
        debug!("OCR '{}': {} fragments", filename, fragments.len());
        Ok(fragments)
    }
}

/// Map a `reqwest` failure onto [`IngestError::ExternalService`].
pub(crate) fn transport_error(service: &str, e: reqwest::Error) -> IngestError {
    let message = if e.is_timeout() {
        format!("request timed out: {e}")
    } else {
        e.to_string()
    };
    IngestError::external(service, e.status().map(|s| s.as_u16()), message)
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    images: Vec<OcrImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcrImage {
    #[serde(default)]
    infer_result: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    fields: Vec<OcrField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcrField {
    #[serde(default)]
    infer_text: String,
}

/// Collect `images[].fields[].inferText` in response order.
fn parse_ocr_response(body: &str) -> Result<Vec<String>, IngestError> {
    let parsed: OcrResponse = serde_json::from_str(body).map_err(|e| {
        IngestError::external(OCR_SERVICE, None, format!("unreadable OCR response: {e}"))
    })?;

    let mut fragments = Vec::new();
    for image in parsed.images {
        if image.infer_result.as_deref() == Some("ERROR") {
            return Err(IngestError::external(
                OCR_SERVICE,
                None,
                image.message.unwrap_or_else(|| "inference failed".into()),
            ));
        }
        fragments.extend(image.fields.into_iter().map(|f| f.infer_text));
    }
    Ok(fragments)
}
