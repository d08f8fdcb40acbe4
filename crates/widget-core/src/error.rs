//! Error types for widget objects and their transport.

use crate::comm::CommError;
use crate::state::PatchErrors;
use crate::transport::TransportState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WidgetError {
    /// An explicit send (display, custom, full state) was attempted without a live comm.
    #[error("comm channel unavailable: transport is {state}")]
    ChannelUnavailable { state: TransportState },

    #[error("cannot {action} while transport is {state}")]
    InvalidTransition {
        action: &'static str,
        state: TransportState,
    },

    #[error(transparent)]
    Patch(#[from] PatchErrors),

    #[error("Comm error: {0}")]
    Comm(#[from] CommError),

    #[error("Serialization error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("property `{name}` declared more than once")]
    DuplicateProperty { name: &'static str },

    #[error("unsupported comm method `{0}`")]
    UnknownMethod(String),

    #[error("malformed comm message: {0}")]
    MalformedMessage(String),
}

pub type Result<T> = std::result::Result<T, WidgetError>;
