use thiserror::Error;

use waypoint_core::error::WaypointError;

/// Errors returned at the chat boundary.
///
/// These are the only errors a caller ever sees; everything else inside
/// a turn degrades into a natural-language reply.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat is disabled")]
    Disabled,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),

    #[error("Unknown region_id: {0}")]
    UnknownRegion(u32),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<WaypointError> for ChatError {
    fn from(err: WaypointError) -> Self {
        ChatError::Internal(err.to_string())
    }
}
