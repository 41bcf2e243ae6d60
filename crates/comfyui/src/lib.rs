//! ComfyUI WebSocket and REST client library.
//!
//! Provides workflow submission, typed message parsing, a per-session
//! WebSocket channel and callback dispatch for integrating with a ComfyUI
//! image-generation server.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use comfyui_client::{ComfyUIConfig, ComfyUISession, GenerationHandler};
//! # use comfyui_core::workflow::Workflow;
//! # async fn run(job: Arc<dyn GenerationHandler>) -> anyhow::Result<()> {
//! let session = ComfyUISession::without_handler(&ComfyUIConfig::from_env());
//! session.connect().await?;
//!
//! let mut workflow = Workflow::load("workflow_api.json")?;
//! if let Some(id) = workflow.find_node_id_by_title("KSampler").map(str::to_string) {
//!     workflow.update_node_input(&id, "seed", 42);
//! }
//! let prompt_id = session.submit(&workflow, job).await?;
//! # let _ = prompt_id;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod handler;
pub mod messages;
pub mod processor;
pub mod registry;
pub mod session;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use config::ComfyUIConfig;
pub use handler::{GenerationHandler, NoopSessionHandler, SessionHandler};
pub use messages::ImageRef;
pub use session::{ComfyUISession, SessionError, SessionState};
