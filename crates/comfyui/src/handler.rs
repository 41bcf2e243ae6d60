//! Callback traits driven by a [`ComfyUISession`](crate::session::ComfyUISession).
//!
//! Two capability sets: [`SessionHandler`] receives channel-level events
//! (open, close, server session id, queue depth, errors that belong to no
//! job), and [`GenerationHandler`] receives the lifecycle of one submitted
//! prompt.
//!
//! Callbacks run on the session's reader task, one message at a time.
//! They should return quickly; long work belongs on another task.

use crate::api::ComfyUIApiError;
use crate::messages::ImageRef;
use crate::session::SessionError;

/// Channel-level callbacks. Every method defaults to a no-op.
pub trait SessionHandler: Send + Sync {
    /// The WebSocket handshake completed.
    fn on_open(&self) {}

    /// The server announced its session id.
    fn on_sid(&self, _sid: &str) {}

    /// The server reported how many prompts are still queued.
    fn on_queue_status(&self, _remaining: i64) {}

    /// The server closed the channel.
    fn on_close(&self, _code: u16, _reason: &str) {}

    /// Connection failure, transport failure, or a message that could not
    /// be decoded or dispatched.
    fn on_error(&self, _error: &SessionError) {}
}

/// Per-prompt lifecycle callbacks.
pub trait GenerationHandler: Send + Sync {
    /// The server started executing the prompt.
    fn on_start(&self);

    /// A node of the prompt started executing.
    fn on_node(&self, node_id: &str);

    /// Step progress of the running node.
    fn on_progress(&self, value: i64, max: i64);

    /// One output artifact was downloaded.
    fn on_artifact(&self, image: &ImageRef, data: Vec<u8>);

    /// All artifacts of an `executed` notification were handled.
    fn on_completed(&self);

    /// Downloading an artifact failed. Processing of the remaining
    /// artifacts continues.
    fn on_error(&self, error: &ComfyUIApiError);
}

/// A [`SessionHandler`] that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionHandler;

impl SessionHandler for NoopSessionHandler {}
