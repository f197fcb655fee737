use thiserror::Error;

use crate::assignment::types::TransferFailure;
use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum AssignmentError {
    /// The payload would not touch any persisted booking or subgroup
    #[error("assignment affects no booking users and no subgroup")]
    Validation,
    #[error("monitor {monitor_id} is not available for any selected session")]
    NoAvailability { monitor_id: i64 },
    #[error("transfer rejected: {0}")]
    TransferConflict(TransferFailure),
    #[error("backend request failed: {0}")]
    Transport(#[from] BackendError),
    #[error("an assignment is already in progress")]
    Busy,
    #[error("no session selected")]
    NoSessionSelected,
    #[error("session {0} does not exist in this course")]
    InvalidSession(usize),
    #[error("session {0} has no subgroup for this level")]
    NoSubgroup(usize),
}

impl AssignmentError {
    /// Text shown to the user for this error
    pub fn user_message(&self) -> String {
        match self {
            AssignmentError::Validation | AssignmentError::Transport(_) => {
                "Something went wrong, please try again".to_string()
            }
            AssignmentError::NoAvailability { .. } => {
                "The monitor is not available for any of the selected sessions".to_string()
            }
            AssignmentError::TransferConflict(failure) => failure.user_message().to_string(),
            AssignmentError::Busy => "Another assignment is still being saved".to_string(),
            AssignmentError::NoSessionSelected => "Select a session first".to_string(),
            AssignmentError::InvalidSession(_) | AssignmentError::NoSubgroup(_) => {
                "This session cannot be assigned".to_string()
            }
        }
    }
}

pub type AssignmentResult<T> = Result<T, AssignmentError>;
