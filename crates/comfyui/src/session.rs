//! Session with a ComfyUI server.
//!
//! A [`ComfyUISession`] owns one WebSocket channel identified by a
//! client id, submits workflows tagged with that id, and routes the
//! server's progress notifications back to the [`GenerationHandler`]
//! registered for each prompt.
//!
//! The channel runs on a spawned reader task. [`ComfyUISession::connect`]
//! waits on a one-shot signal that the task fires exactly once, when the
//! handshake either completes or fails.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use comfyui_core::workflow::Workflow;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::config::ComfyUIConfig;
use crate::handler::{GenerationHandler, NoopSessionHandler, SessionHandler};
use crate::processor::{ArtifactFetcher, MessageProcessor};
use crate::registry::JobRegistry;

/// Close code reported when the server's close frame carries none.
const NO_STATUS_CODE: u16 = 1005;

/// Lifecycle of the session's WebSocket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Channel open; notifications are being dispatched.
    Open,
    /// Channel closed by either side, or the handshake failed.
    Closed,
}

/// Errors surfaced by a [`ComfyUISession`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The established connection failed while sending or receiving.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A text message was not valid JSON.
    #[error("Malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    /// A callback panicked while a message was being dispatched.
    #[error("Message handler panicked: {0}")]
    HandlerPanicked(String),

    /// The workflow submission HTTP call failed.
    #[error("Failed to submit workflow: {0}")]
    Submit(#[from] ComfyUIApiError),
}

/// One client session against a ComfyUI server.
pub struct ComfyUISession {
    client_id: String,
    ws_url: String,
    api: Arc<ComfyUIApi>,
    jobs: Arc<JobRegistry>,
    handler: Arc<dyn SessionHandler>,
    processor: Arc<MessageProcessor>,
    state: Arc<RwLock<SessionState>>,
    /// Frames queued for the reader task to write (close only, today).
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ComfyUISession {
    /// Create a session for the server described by `config`.
    pub fn new(config: &ComfyUIConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self::with_urls(config.api_url(), config.ws_url(), handler)
    }

    /// Create a session that ignores channel-level events.
    pub fn without_handler(config: &ComfyUIConfig) -> Self {
        Self::new(config, Arc::new(NoopSessionHandler))
    }

    /// Create a session from explicit base URLs.
    ///
    /// * `api_url` - HTTP base URL, e.g. `http://host:9712`.
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:9712`.
    pub fn with_urls(api_url: String, ws_url: String, handler: Arc<dyn SessionHandler>) -> Self {
        let api = Arc::new(ComfyUIApi::new(api_url));
        let jobs = Arc::new(JobRegistry::new());
        let fetcher: Arc<dyn ArtifactFetcher> = api.clone();
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&jobs),
            Arc::clone(&handler),
            fetcher,
        ));

        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            ws_url,
            api,
            jobs,
            handler,
            processor,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Client id sent on the WebSocket handshake and with every prompt.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Number of submitted prompts that have not reported success yet.
    pub async fn pending_jobs(&self) -> usize {
        self.jobs.len().await
    }

    /// Open the WebSocket channel and wait until it is open or has failed.
    ///
    /// On success the state becomes [`SessionState::Open`] and
    /// [`SessionHandler::on_open`] has run. On failure the state becomes
    /// [`SessionState::Closed`], [`SessionHandler::on_error`] has run, and
    /// the same error is returned. Calling this on an open session is a
    /// no-op.
    pub async fn connect(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            match *state {
                SessionState::Open => return Ok(()),
                SessionState::Connecting => {
                    return Err(SessionError::Connection(
                        "connect already in progress".to_string(),
                    ))
                }
                SessionState::Disconnected | SessionState::Closed => {
                    *state = SessionState::Connecting;
                }
            }
        }

        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);
        let (open_tx, open_rx) = oneshot::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_channel(
            url,
            open_tx,
            outbound_rx,
            Arc::clone(&self.processor),
            Arc::clone(&self.handler),
            Arc::clone(&self.state),
        ));

        *self.outbound.lock().await = Some(outbound_tx);
        if let Some(previous) = self.reader.lock().await.replace(task) {
            previous.abort();
        }

        match open_rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Connection(
                "channel task exited before the handshake finished".to_string(),
            )),
        }
    }

    /// Ask the server to close the channel with a normal-closure frame.
    ///
    /// Returns immediately; the close handshake finishes on the reader
    /// task, which then reports [`SessionHandler::on_close`]. A no-op
    /// unless the channel is open.
    pub async fn disconnect(&self) {
        if self.state().await != SessionState::Open {
            tracing::debug!(client_id = %self.client_id, "Disconnect ignored, channel not open");
            return;
        }

        if let Some(tx) = self.outbound.lock().await.as_ref() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "Disconnecting".into(),
            };
            if tx.send(Message::Close(Some(frame))).is_err() {
                tracing::debug!(client_id = %self.client_id, "Channel task already gone");
            }
        }
    }

    /// Queue a workflow and bind `handler` to the resulting prompt id.
    ///
    /// Waits for the HTTP round trip only. A non-200 answer is returned
    /// as [`SessionError::Submit`] and nothing is bound.
    pub async fn submit(
        &self,
        workflow: &Workflow,
        handler: Arc<dyn GenerationHandler>,
    ) -> Result<String, SessionError> {
        let response = self.api.submit_workflow(workflow, &self.client_id).await?;

        self.jobs.bind(response.prompt_id.clone(), handler).await;

        tracing::info!(
            client_id = %self.client_id,
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            "Workflow submitted to ComfyUI",
        );

        Ok(response.prompt_id)
    }
}

impl Drop for ComfyUISession {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
    }
}

/// Connect, report the outcome through `open_tx`, then pump frames until
/// the channel closes.
async fn run_channel(
    url: String,
    open_tx: oneshot::Sender<Result<(), SessionError>>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    processor: Arc<MessageProcessor>,
    handler: Arc<dyn SessionHandler>,
    state: Arc<RwLock<SessionState>>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            let error =
                SessionError::Connection(format!("Failed to connect to ComfyUI at {url}: {e}"));
            tracing::error!(error = %error, "WebSocket connection failed");
            *state.write().await = SessionState::Closed;
            handler.on_error(&error);
            let _ = open_tx.send(Err(error));
            return;
        }
    };

    *state.write().await = SessionState::Open;
    tracing::info!(url = %url, "Connected to ComfyUI");
    handler.on_open();
    let _ = open_tx.send(Ok(()));

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    tracing::error!(error = %e, "WebSocket send error");
                    handler.on_error(&SessionError::Transport(e.to_string()));
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        processor.handle_text(&text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        processor.handle_binary(&data);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS_CODE, String::new()));
                        tracing::info!(code, reason = %reason, "ComfyUI WebSocket closed");
                        *state.write().await = SessionState::Closed;
                        handler.on_close(code, &reason);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket receive error");
                        *state.write().await = SessionState::Closed;
                        handler.on_error(&SessionError::Transport(e.to_string()));
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream exhausted");
                        break;
                    }
                }
            }
        }
    }

    *state.write().await = SessionState::Closed;
}
