use serde::Serialize;

/// Shared error type used across the fleet control plane crates.
///
/// Variants map onto the error kinds of the wire protocols (agent frames,
/// JSON-RPC, HTTP) at the outermost boundary; nothing below that boundary
/// deals in strings.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("stale state transition on {entity} {id}: expected {expected}, found {found}")]
    StaleState {
        entity: &'static str,
        id: String,
        expected: String,
        found: String,
    },

    #[error("duplicate agent for (customerId={customer_id}, machineId={machine_id})")]
    DuplicateAgent {
        customer_id: String,
        machine_id: String,
    },

    #[error("duplicate license {license_uuid}")]
    DuplicateLicense { license_uuid: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("agent offline")]
    AgentOffline,

    #[error("agent not activated")]
    AgentNotActivated,

    #[error("agent busy")]
    AgentBusy,

    #[error("screen locked")]
    ScreenLocked,

    #[error("gateway timeout")]
    GatewayTimeout,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A machine-readable error code, stable across releases, used on every
/// outward-facing surface (agent `error` frames, JSON-RPC `error.code`,
/// HTTP problem bodies). Kept separate from [`Error`]'s `Display` text so
/// that log messages can change without breaking clients that match on
/// `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRegistration,
    LicenseInvalid,
    Duplicate,
    InvalidRequest,
    Unauthorized,
    Forbidden,
    AgentOffline,
    AgentNotActivated,
    ScreenLocked,
    AgentBusy,
    GatewayTimeout,
    RateLimited,
    Internal,
}

impl Error {
    /// The stable wire code reported on agent `error` frames and HTTP
    /// problem bodies.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::StaleState { .. } | Error::DuplicateAgent { .. } | Error::DuplicateLicense { .. } => {
                ErrorCode::Duplicate
            }
            Error::NotFound(_) => ErrorCode::InvalidRequest,
            Error::Auth(_) | Error::InvalidGrant(_) => ErrorCode::Unauthorized,
            Error::Forbidden(_) => ErrorCode::Forbidden,
            Error::InvalidRequest(_) | Error::Config(_) | Error::Json(_) | Error::Io(_) => {
                ErrorCode::InvalidRequest
            }
            Error::AgentOffline => ErrorCode::AgentOffline,
            Error::AgentNotActivated => ErrorCode::AgentNotActivated,
            Error::AgentBusy => ErrorCode::AgentBusy,
            Error::ScreenLocked => ErrorCode::ScreenLocked,
            Error::GatewayTimeout => ErrorCode::GatewayTimeout,
            Error::RateLimited { .. } => ErrorCode::RateLimited,
            Error::Other(_) => ErrorCode::Internal,
        }
    }

    /// JSON-RPC numeric error code per the MCP relay's error model (§7).
    /// Errors with no natural JSON-RPC meaning fall back to `-32603`
    /// (internal error) since they should never reach that surface directly.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            Error::AgentBusy => -32001,
            Error::Forbidden(_) => -32002,
            Error::GatewayTimeout => -32003,
            Error::AgentOffline => -32010,
            Error::AgentNotActivated => -32011,
            Error::ScreenLocked => -32012,
            Error::InvalidRequest(_) | Error::Json(_) => -32600,
            Error::NotFound(_) => -32601,
            _ => -32603,
        }
    }
}
