//! ==============================================================================
//! error.rs - fleet error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     one error type for the whole engine. per-node failures inside a fan-out
//!     are converted into in-band result entries (offline, failure fragment,
//!     excluded from bundle) and never surface here as a batch failure. only
//!     caller misuse and local i/o problems propagate to the caller.
//!
//! ==============================================================================

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug)]
pub enum FleetError {
    /// network error or timeout talking to a node
    #[error("node {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// node answered but rejected the credentials
    #[error("node {address} rejected the login")]
    Unauthorized { address: String },

    /// node answered with a non-success http status
    #[error("node {address} answered with http status {status}")]
    Status { address: String, status: u16 },

    #[error("address list not found: {0}")]
    NotFound(String),

    #[error("no address list is selected")]
    NoListSelected,

    #[error("invalid report kind: {0}")]
    InvalidReportKind(String),

    #[error("invalid export kind: {0}")]
    InvalidExportKind(String),

    #[error("no sensor addresses to work with")]
    NoAddresses,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("address list holds at most {max} addresses, got {got}")]
    TooManyAddresses { max: usize, got: usize },

    #[error("malformed node response: {0}")]
    MalformedResponse(String),

    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl FleetError {
    pub(crate) fn unreachable(address: impl ToString, reason: impl ToString) -> Self {
        FleetError::Unreachable {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// true for errors that mean "the node could not be talked to at all"
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FleetError::Unreachable { .. })
    }
}
