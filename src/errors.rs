//! Typed error taxonomy for venue adapters.
//!
//! Every error a Venue Adapter can surface is a concrete variant here. Callers match on
//! the variant; nothing above this layer inspects error strings or exception messages.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("subscribe rejected: {0}")]
    SubscribeRejected(String),

    #[error("malformed message: {0}")]
    MessageMalformed(String),

    #[error("rate limited")]
    RateLimited,

    #[error("server overloaded")]
    ServerOverloaded,

    #[error("service temporarily unavailable")]
    ServiceTemporarilyUnavailable,

    #[error("order already filled or canceled")]
    OrderAlreadyFilledOrCanceled,

    #[error("order not found")]
    OrderNotFound,

    #[error("notional below minimum")]
    NotionalBelowMinimum,

    #[error("precision below minimum")]
    PrecisionBelowMinimum,

    #[error("in-progress modification limit exceeded")]
    InProgressModificationLimitExceeded,

    #[error("margin insufficient")]
    MarginInsufficient,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown venue error: {0}")]
    Unknown(String),
}

pub type VenueResult<T> = Result<T, VenueError>;

impl From<tokio_tungstenite::tungstenite::Error> for VenueError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        VenueError::TransientNetwork(e.to_string())
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VenueError::TransientNetwork(format!("timeout: {e}"))
        } else {
            VenueError::Unknown(e.to_string())
        }
    }
}

impl From<serde_json::Error> for VenueError {
    fn from(e: serde_json::Error) -> Self {
        VenueError::MessageMalformed(e.to_string())
    }
}

/// Classification used by the error-handling design (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Never surfaces above the component; adjusts local state and logs.
    LocalRecovery,
    /// Appended to the sliding error budget.
    Budgeted,
    /// Sets a process-wide flag and alerts; does not crash the process.
    Fatal,
}

impl VenueError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VenueError::TransientNetwork(_)
            | VenueError::MessageMalformed(_)
            | VenueError::RateLimited
            | VenueError::OrderAlreadyFilledOrCanceled
            | VenueError::NotionalBelowMinimum
            | VenueError::OrderNotFound
            | VenueError::InProgressModificationLimitExceeded
            | VenueError::ServerOverloaded
            | VenueError::ServiceTemporarilyUnavailable
            | VenueError::PrecisionBelowMinimum
            | VenueError::InvalidArgument(_) => ErrorClass::LocalRecovery,
            VenueError::AuthFailed(_) | VenueError::SubscribeRejected(_) => {
                ErrorClass::Budgeted
            }
            VenueError::MarginInsufficient => ErrorClass::Fatal,
            VenueError::Unknown(_) => ErrorClass::Budgeted,
        }
    }
}
