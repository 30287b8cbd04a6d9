use std::fmt;

/// Why a single subscriber could not be handed an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The subscriber's inbox is gone; the connection has closed.
    Closed,
    /// The subscriber's inbox is full; this event was dropped for it.
    Lagging,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Lagging => f.write_str("lagging"),
        }
    }
}

/// Error taxonomy of the chat core.
///
/// Failures stay local to the connection that caused them: only
/// `NotFound` and `Forbidden` ever reject a connection, and
/// `DeliveryFailure` never reaches a publisher.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("delivery to {connection} failed: {reason}")]
    DeliveryFailure {
        connection: String,
        reason: DeliveryFailure,
    },

    #[error("store error: {0}")]
    Store(String),
}

impl ChatError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState { .. } => "invalid_state",
            Self::MalformedInput(_) => "malformed_input",
            Self::DeliveryFailure { .. } => "delivery_failure",
            Self::Store(_) => "store",
        }
    }

    /// Whether the failure rejects a connection attempt outright.
    pub fn rejects_connection(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Forbidden(_))
    }
}
