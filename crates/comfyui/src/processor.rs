//! WebSocket message processing.
//!
//! [`MessageProcessor`] decodes each complete text message into a
//! [`ComfyUIMessage`], looks up the prompt's [`GenerationHandler`] in the
//! [`JobRegistry`] and drives the matching callback. For `executed`
//! messages it downloads every listed image through an
//! [`ArtifactFetcher`] before reporting completion.
//!
//! A failure while handling one message (bad JSON, a panicking callback)
//! is reported to the [`SessionHandler`] and never stops the channel.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::handler::SessionHandler;
use crate::messages::{
    parse_message, ComfyUIMessage, ExecutedData, ExecutingData, ImageRef, ProgressData,
    StatusData,
};
use crate::registry::JobRegistry;
use crate::session::SessionError;

/// Source of artifact bytes referenced by `executed` messages.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch_artifact(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError>;
}

#[async_trait]
impl ArtifactFetcher for ComfyUIApi {
    async fn fetch_artifact(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.fetch_image(image).await
    }
}

/// Routes decoded server messages to session and job callbacks.
pub struct MessageProcessor {
    jobs: Arc<JobRegistry>,
    session_handler: Arc<dyn SessionHandler>,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl MessageProcessor {
    pub fn new(
        jobs: Arc<JobRegistry>,
        session_handler: Arc<dyn SessionHandler>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            jobs,
            session_handler,
            fetcher,
        }
    }

    /// Handle one complete text message.
    ///
    /// Errors and panics raised while decoding or dispatching are caught
    /// here and reported through [`SessionHandler::on_error`].
    pub async fn handle_text(&self, text: &str) {
        let outcome = AssertUnwindSafe(self.dispatch(text)).catch_unwind().await;

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => SessionError::HandlerPanicked(panic_message(&panic)),
        };

        tracing::warn!(
            error = %error,
            raw_message = %text,
            "Failed to handle ComfyUI message",
        );
        self.session_handler.on_error(&error);
    }

    /// Binary frames carry preview images with an undocumented header;
    /// they are logged and dropped.
    pub fn handle_binary(&self, data: &[u8]) {
        tracing::debug!(bytes = data.len(), "Ignoring binary message");
    }

    async fn dispatch(&self, text: &str) -> Result<(), SessionError> {
        let msg = parse_message(text).map_err(SessionError::Decode)?;

        match msg {
            ComfyUIMessage::Status(data) => self.handle_status(&data),
            ComfyUIMessage::ExecutionStart(data) => {
                let Some(prompt_id) = data.prompt_id else {
                    return Ok(());
                };
                tracing::info!(prompt_id = %prompt_id, "Execution started");
                if let Some(handler) = self.jobs.get(&prompt_id).await {
                    handler.on_start();
                }
            }
            ComfyUIMessage::Executing(data) => self.handle_executing(data).await,
            ComfyUIMessage::Progress(data) => self.handle_progress(data).await,
            ComfyUIMessage::Executed(data) => self.handle_executed(data).await,
            ComfyUIMessage::ExecutionSuccess(data) => {
                if let Some(prompt_id) = data.prompt_id {
                    if self.jobs.release(&prompt_id).await.is_some() {
                        tracing::info!(prompt_id = %prompt_id, "Execution succeeded, handler released");
                    }
                }
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(
                    prompt_id = ?data.prompt_id,
                    cached_nodes = data.nodes.len(),
                    "Execution used cache",
                );
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::warn!(
                    prompt_id = ?data.prompt_id,
                    node_id = ?data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error reported by server",
                );
            }
            ComfyUIMessage::Unknown(kind) => {
                tracing::trace!(kind = %kind, "Ignoring message");
            }
        }

        Ok(())
    }

    // ---- individual message handlers ----

    fn handle_status(&self, data: &StatusData) {
        if let Some(sid) = &data.sid {
            tracing::debug!(sid = %sid, "Session id assigned");
            self.session_handler.on_sid(sid);
        }
        if let Some(remaining) = data.queue_remaining.filter(|n| *n >= 0) {
            tracing::debug!(queue_remaining = remaining, "ComfyUI queue status");
            self.session_handler.on_queue_status(remaining);
        }
    }

    async fn handle_executing(&self, data: ExecutingData) {
        let (Some(node), Some(prompt_id)) = (data.node, data.prompt_id) else {
            return;
        };
        tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
        if let Some(handler) = self.jobs.get(&prompt_id).await {
            handler.on_node(&node);
        }
    }

    async fn handle_progress(&self, data: ProgressData) {
        let Some(prompt_id) = data.prompt_id else {
            return;
        };
        tracing::debug!(
            prompt_id = %prompt_id,
            value = data.value,
            max = data.max,
            "Generation progress",
        );
        if let Some(handler) = self.jobs.get(&prompt_id).await {
            handler.on_progress(data.value, data.max);
        }
    }

    /// Download each image in order, then report completion.
    ///
    /// A failed download goes to the job's own `on_error` and the loop
    /// moves on to the next image. Messages without images, or for
    /// prompts this session did not submit, produce no callbacks.
    async fn handle_executed(&self, data: ExecutedData) {
        let images = data.images();
        let Some(prompt_id) = data.prompt_id else {
            return;
        };
        tracing::debug!(
            prompt_id = %prompt_id,
            node = ?data.node,
            images = images.len(),
            "Node executed with output",
        );
        if images.is_empty() {
            return;
        }
        let Some(handler) = self.jobs.get(&prompt_id).await else {
            return;
        };

        for image in &images {
            match self.fetcher.fetch_artifact(image).await {
                Ok(bytes) => handler.on_artifact(image, bytes),
                Err(e) => {
                    tracing::warn!(
                        prompt_id = %prompt_id,
                        filename = %image.filename,
                        error = %e,
                        "Failed to download artifact",
                    );
                    handler.on_error(&e);
                }
            }
        }
        handler.on_completed();
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
