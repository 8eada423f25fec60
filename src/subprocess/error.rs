use crate::error::GavelError;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl From<ProcessError> for GavelError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::CommandNotFound(cmd) => GavelError::JudgeNotAvailable(cmd),
            ProcessError::Io(e) => GavelError::Filesystem(e),
            ProcessError::MockExpectationNotMet(msg) => GavelError::Internal(msg),
        }
    }
}
