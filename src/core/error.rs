use thiserror::Error;

use crate::infra::runtime::channel::TransportError;

/// Gateway-wide error model for uniform HTTP/JSON mapping.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller input rejected before any downstream work.
    #[error("{0}")]
    Validation(String),

    #[error("provider '{provider}' could not be attached: {source}")]
    Bridge {
        provider: String,
        #[source]
        source: Box<GatewayError>,
    },

    #[error("tool {0} not found")]
    UnknownTool(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream status {0}")]
    UpstreamStatus(u16),

    #[error("completion api: {0}")]
    Completion(String),

    #[error("{what} timed out after {ms}ms")]
    Timeout { what: String, ms: u64 },

    #[error("caller disconnected")]
    Disconnected,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Message(String),
}

impl GatewayError {
    /// Network and service-side failures worth another attempt. Schema and
    /// consistency failures are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http(e) => e.is_connect() || e.is_timeout(),
            GatewayError::UpstreamStatus(s) => *s >= 500 || *s == 429,
            GatewayError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, GatewayError::Validation(_))
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Message(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Completion(format!("malformed payload: {e}"))
    }
}
