//! Table of in-flight prompts and their callback handlers.
//!
//! Shared between [`submit`](crate::session::ComfyUISession::submit), which
//! inserts, and the reader task, which looks up and removes. A binding
//! lives until the prompt's `execution_success` arrives; a prompt that
//! never succeeds stays bound for the life of the session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::handler::GenerationHandler;

/// Maps `prompt_id` to the handler that receives its callbacks.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<dyn GenerationHandler>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `prompt_id`, returning any handler it replaces.
    pub async fn bind(
        &self,
        prompt_id: String,
        handler: Arc<dyn GenerationHandler>,
    ) -> Option<Arc<dyn GenerationHandler>> {
        let previous = self.jobs.write().await.insert(prompt_id.clone(), handler);
        if previous.is_some() {
            tracing::warn!(prompt_id = %prompt_id, "Replaced existing handler binding");
        }
        previous
    }

    /// Handler bound to `prompt_id`, if any.
    pub async fn get(&self, prompt_id: &str) -> Option<Arc<dyn GenerationHandler>> {
        self.jobs.read().await.get(prompt_id).cloned()
    }

    /// Remove and return the binding for `prompt_id`.
    pub async fn release(&self, prompt_id: &str) -> Option<Arc<dyn GenerationHandler>> {
        self.jobs.write().await.remove(prompt_id)
    }

    pub async fn contains(&self, prompt_id: &str) -> bool {
        self.jobs.read().await.contains_key(prompt_id)
    }

    /// Number of prompts still bound.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
