#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use comfyui_client::processor::ArtifactFetcher;
use comfyui_client::{ComfyUIApiError, GenerationHandler, ImageRef, SessionError, SessionHandler};

/// One observed [`GenerationHandler`] callback.
#[derive(Debug, Clone, PartialEq)]
pub enum JobCall {
    Start,
    Node(String),
    Progress(i64, i64),
    Artifact(String, Vec<u8>),
    Completed,
    Error(String),
}

/// One observed [`SessionHandler`] callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Open,
    Sid(String),
    Queue(i64),
    Close(u16),
    Error(String),
}

/// Records every job callback in order and mirrors it onto a channel.
pub struct RecordingJob {
    calls: Mutex<Vec<JobCall>>,
    tx: mpsc::UnboundedSender<JobCall>,
}

impl RecordingJob {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<JobCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let job = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            tx,
        });
        (job, rx)
    }

    pub fn calls(&self) -> Vec<JobCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: JobCall) {
        self.calls.lock().unwrap().push(call.clone());
        let _ = self.tx.send(call);
    }
}

impl GenerationHandler for RecordingJob {
    fn on_start(&self) {
        self.record(JobCall::Start);
    }

    fn on_node(&self, node_id: &str) {
        self.record(JobCall::Node(node_id.to_string()));
    }

    fn on_progress(&self, value: i64, max: i64) {
        self.record(JobCall::Progress(value, max));
    }

    fn on_artifact(&self, image: &ImageRef, data: Vec<u8>) {
        self.record(JobCall::Artifact(image.filename.clone(), data));
    }

    fn on_completed(&self) {
        self.record(JobCall::Completed);
    }

    fn on_error(&self, error: &ComfyUIApiError) {
        self.record(JobCall::Error(error.to_string()));
    }
}

/// Records every session callback in order and mirrors it onto a channel.
pub struct RecordingSession {
    calls: Mutex<Vec<SessionCall>>,
    tx: mpsc::UnboundedSender<SessionCall>,
}

impl RecordingSession {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            tx,
        });
        (session, rx)
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SessionCall::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().unwrap().push(call.clone());
        let _ = self.tx.send(call);
    }
}

impl SessionHandler for RecordingSession {
    fn on_open(&self) {
        self.record(SessionCall::Open);
    }

    fn on_sid(&self, sid: &str) {
        self.record(SessionCall::Sid(sid.to_string()));
    }

    fn on_queue_status(&self, remaining: i64) {
        self.record(SessionCall::Queue(remaining));
    }

    fn on_close(&self, code: u16, _reason: &str) {
        self.record(SessionCall::Close(code));
    }

    fn on_error(&self, error: &SessionError) {
        self.record(SessionCall::Error(error.to_string()));
    }
}

/// Serves artifacts from memory; unknown filenames answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    files: HashMap<String, Vec<u8>>,
    requested: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_file(mut self, filename: &str, data: &[u8]) -> Self {
        self.files.insert(filename.to_string(), data.to_vec());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch_artifact(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.requested.lock().unwrap().push(image.filename.clone());
        self.files
            .get(&image.filename)
            .cloned()
            .ok_or_else(|| ComfyUIApiError::ApiError {
                status: 404,
                body: format!("{} not found", image.filename),
            })
    }
}

/// A job whose `on_start` panics.
pub struct PanickingJob;

impl GenerationHandler for PanickingJob {
    fn on_start(&self) {
        panic!("handler exploded");
    }

    fn on_node(&self, _node_id: &str) {}
    fn on_progress(&self, _value: i64, _max: i64) {}
    fn on_artifact(&self, _image: &ImageRef, _data: Vec<u8>) {}
    fn on_completed(&self) {}
    fn on_error(&self, _error: &ComfyUIApiError) {}
}
