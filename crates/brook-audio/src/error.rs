use brook_core::{PipeId, StageError};
use thiserror::Error;

/// Pipe-level error surface returned on control replies.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested transition is not legal in the current state.
    #[error("invalid state transition")]
    InvalidState,
    /// The pipe was configured without a terminal stage.
    #[error("pipe has no sink")]
    NoSink,
    /// A stage rejected its bind during pipe construction.
    #[error("binding stage into {pipe} failed")]
    Bind {
        pipe: PipeId,
        #[source]
        source: StageError,
    },
    /// A run terminated with a stage failure.
    #[error("{pipe} failed")]
    Failed {
        pipe: PipeId,
        #[source]
        source: StageError,
    },
}

impl Error {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState)
    }

    /// The stage error carried by a bind or run failure, if any.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Bind { source, .. } | Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }
}
