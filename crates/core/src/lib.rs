//! Pure, synchronous helpers for ComfyUI workflow documents.
//!
//! Nothing in this crate touches the network. The session client in
//! `comfyui-client` depends on it for graph editing, seed generation and
//! the outbound JSON number format.

pub mod error;
pub mod json_format;
pub mod seed;
pub mod workflow;
