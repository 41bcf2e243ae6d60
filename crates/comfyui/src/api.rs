//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission (`POST /prompt`) and artifact download
//! (`GET /view`) using [`reqwest`].

use comfyui_core::json_format;
use comfyui_core::workflow::Workflow;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::messages::ImageRef;

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Request body for `POST /prompt`.
#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a Workflow,
    client_id: &'a str,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI answered with an unexpected status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The request body could not be encoded.
    #[error("Failed to encode request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:9712`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with `{"prompt": <workflow>, "client_id": <id>}`.
    /// Floats are written in plain decimal form (see
    /// [`json_format`]). Only `200 OK` counts as accepted; any other
    /// status is returned as [`ComfyUIApiError::ApiError`] carrying the
    /// response body.
    pub async fn submit_workflow(
        &self,
        workflow: &Workflow,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = json_format::to_vec(&PromptRequest {
            prompt: workflow,
            client_id,
        })?;

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Self::api_error(status, response).await);
        }

        Ok(response.json::<SubmitResponse>().await?)
    }

    /// Download one output artifact.
    ///
    /// Sends `GET /view?filename=..&type=..&subfolder=..` and returns the
    /// raw response body.
    pub async fn view(
        &self,
        filename: &str,
        kind: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        tracing::debug!(filename, kind, subfolder, "Downloading artifact");

        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[("filename", filename), ("type", kind), ("subfolder", subfolder)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(status, response).await);
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Download the artifact described by an `executed` image entry.
    pub async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view(&image.filename, &image.kind, &image.subfolder)
            .await
    }

    // ---- private helpers ----

    /// Build an [`ComfyUIApiError::ApiError`] from a failed response.
    async fn api_error(status: StatusCode, response: reqwest::Response) -> ComfyUIApiError {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        ComfyUIApiError::ApiError {
            status: status.as_u16(),
            body,
        }
    }
}
