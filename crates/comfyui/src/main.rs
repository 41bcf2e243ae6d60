//! `comfyui-run` -- submit one workflow and save the images it produces.
//!
//! Loads a workflow in API format, optionally randomizes a seed input,
//! submits it over a fresh session, writes every downloaded image into
//! the output directory and disconnects once the first output node
//! completes.
//!
//! # Environment variables
//!
//! | Variable         | Required | Default     | Description                |
//! |------------------|----------|-------------|----------------------------|
//! | `COMFYUI_HOST`   | no       | `localhost` | ComfyUI host               |
//! | `COMFYUI_PORT`   | no       | `9712`      | ComfyUI port               |
//! | `COMFYUI_SECURE` | no       | `false`     | Use `https`/`wss`          |
//! | `RUST_LOG`       | no       | `comfyui_client=info,comfyui_run=info` | Log filter |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfyui_client::{
    ComfyUIApiError, ComfyUIConfig, ComfyUISession, GenerationHandler, ImageRef, SessionError,
    SessionHandler,
};
use comfyui_core::seed::SeedGenerator;
use comfyui_core::workflow::Workflow;

#[derive(Debug, Parser)]
#[command(name = "comfyui-run", about = "Submit a ComfyUI workflow and save its images")]
struct Args {
    /// Workflow file in ComfyUI API format.
    workflow: PathBuf,

    /// Override `COMFYUI_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Override `COMFYUI_PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Use `https`/`wss` regardless of `COMFYUI_SECURE`.
    #[arg(long)]
    secure: bool,

    /// Node id whose seed input is randomized.
    #[arg(long, conflicts_with = "seed_title")]
    seed_node: Option<String>,

    /// Title of the node whose seed input is randomized.
    #[arg(long)]
    seed_title: Option<String>,

    /// Name of the input that receives the seed.
    #[arg(long, default_value = "seed")]
    seed_input: String,

    /// Seed the random generator for a reproducible seed value.
    #[arg(long)]
    rng_seed: Option<u64>,

    /// Directory the downloaded images are written to.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Give up waiting for the result after this many seconds.
    #[arg(long, default_value_t = 300)]
    wait_secs: u64,
}

/// What the job handler forwards to the main task.
enum JobEvent {
    Artifact(ImageRef, Vec<u8>),
    Completed,
}

/// Forwards job callbacks over a channel so files are written off the
/// reader task.
struct ForwardingJob {
    events: mpsc::UnboundedSender<JobEvent>,
}

impl GenerationHandler for ForwardingJob {
    fn on_start(&self) {
        tracing::info!("Execution started");
    }

    fn on_node(&self, node_id: &str) {
        tracing::info!(node = %node_id, "Executing node");
    }

    fn on_progress(&self, value: i64, max: i64) {
        tracing::info!("Progress {value}/{max}");
    }

    fn on_artifact(&self, image: &ImageRef, data: Vec<u8>) {
        let _ = self.events.send(JobEvent::Artifact(image.clone(), data));
    }

    fn on_completed(&self) {
        let _ = self.events.send(JobEvent::Completed);
    }

    fn on_error(&self, error: &ComfyUIApiError) {
        tracing::error!(error = %error, "Artifact download failed");
    }
}

struct LoggingSession;

impl SessionHandler for LoggingSession {
    fn on_open(&self) {
        tracing::info!("Channel open");
    }

    fn on_sid(&self, sid: &str) {
        tracing::debug!(sid = %sid, "Server session id");
    }

    fn on_queue_status(&self, remaining: i64) {
        tracing::info!(queue_remaining = remaining, "Queue status");
    }

    fn on_close(&self, code: u16, reason: &str) {
        tracing::info!(code, reason = %reason, "Channel closed");
    }

    fn on_error(&self, error: &SessionError) {
        tracing::error!(error = %error, "Session error");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyui_client=info,comfyui_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ComfyUIConfig::from_env();
    if let Some(host) = args.host.clone() {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.secure |= args.secure;

    let mut workflow = Workflow::load(&args.workflow)
        .with_context(|| format!("failed to load workflow {}", args.workflow.display()))?;
    randomize_seed(&mut workflow, &args)?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let session = ComfyUISession::new(&config, Arc::new(LoggingSession));
    tracing::info!(
        api_url = %config.api_url(),
        client_id = %session.client_id(),
        "Starting comfyui-run",
    );
    session.connect().await?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let prompt_id = session
        .submit(&workflow, Arc::new(ForwardingJob { events: events_tx }))
        .await?;
    tracing::info!(prompt_id = %prompt_id, "Prompt submitted");

    let outcome = tokio::time::timeout(
        Duration::from_secs(args.wait_secs),
        collect_artifacts(&mut events_rx, &args.out_dir),
    )
    .await;

    session.disconnect().await;

    match outcome {
        Ok(result) => {
            let saved = result?;
            tracing::info!(prompt_id = %prompt_id, saved, "Workflow completed");
            Ok(())
        }
        Err(_) => bail!("timed out after {}s waiting for prompt {prompt_id}", args.wait_secs),
    }
}

/// Apply `--seed-node`/`--seed-title`, if either was given.
fn randomize_seed(workflow: &mut Workflow, args: &Args) -> anyhow::Result<()> {
    let node_id = match (&args.seed_node, &args.seed_title) {
        (Some(id), _) => id.clone(),
        (None, Some(title)) => workflow
            .find_node_id_by_title(title)
            .map(str::to_string)
            .with_context(|| format!("no node titled {title:?}"))?,
        (None, None) => return Ok(()),
    };

    let mut seeds = match args.rng_seed {
        Some(seed) => SeedGenerator::from_seed(seed),
        None => SeedGenerator::from_entropy(),
    };
    let seed = seeds.next_seed();

    if !workflow.update_node_input(&node_id, &args.seed_input, seed) {
        bail!("workflow has no node {node_id:?}");
    }
    tracing::info!(node = %node_id, input = %args.seed_input, seed, "Seed randomized");
    Ok(())
}

/// Write artifacts until the job reports completion. Returns the number
/// of files written.
async fn collect_artifacts(
    events: &mut mpsc::UnboundedReceiver<JobEvent>,
    out_dir: &Path,
) -> anyhow::Result<usize> {
    let mut saved = 0;
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Artifact(image, data) => {
                let name = Path::new(&image.filename)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(format!("artifact_{saved}.png")));
                let path = out_dir.join(name);
                tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), bytes = data.len(), "Saved artifact");
                saved += 1;
            }
            JobEvent::Completed => return Ok(saved),
        }
    }
    bail!("session dropped the job before it completed")
}
