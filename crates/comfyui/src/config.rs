//! Connection settings for a ComfyUI server.

/// Default ComfyUI host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default ComfyUI port.
pub const DEFAULT_PORT: u16 = 9712;

/// Where the ComfyUI server lives.
///
/// The HTTP and WebSocket base URLs are derived from the same host and
/// port; `secure` switches both to `https`/`wss`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComfyUIConfig {
    /// Server host name or address (default: `localhost`).
    pub host: String,
    /// Server port (default: `9712`).
    pub port: u16,
    /// Use TLS for both HTTP and WebSocket (default: `false`).
    pub secure: bool,
}

impl Default for ComfyUIConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secure: false,
        }
    }
}

impl ComfyUIConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var          | Default     |
    /// |------------------|-------------|
    /// | `COMFYUI_HOST`   | `localhost` |
    /// | `COMFYUI_PORT`   | `9712`      |
    /// | `COMFYUI_SECURE` | `false`     |
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_env() -> Self {
        let host = std::env::var("COMFYUI_HOST").unwrap_or_else(|_| DEFAULT_HOST.into());

        let port = match std::env::var("COMFYUI_PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "COMFYUI_PORT is not a valid port, using default");
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };

        let secure = match std::env::var("COMFYUI_SECURE") {
            Ok(raw) => parse_bool(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "COMFYUI_SECURE is not a boolean, using default");
                false
            }),
            Err(_) => false,
        };

        Self { host, port, secure }
    }

    /// HTTP base URL, e.g. `http://localhost:9712`.
    pub fn api_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// WebSocket base URL, e.g. `ws://localhost:9712`.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
