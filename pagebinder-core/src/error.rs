use crate::document::DocumentId;
use crate::page_store::PageId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Page {0} has been disposed")]
    PageDisposed(PageId),

    #[error("Unknown document: {0}")]
    UnknownDocument(DocumentId),

    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Output cancelled")]
    OutputCancelled,
}

pub type Result<T> = std::result::Result<T, ComposeError>;

impl From<serde_json::Error> for ComposeError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ComposeError::Io(err.into())
        } else {
            ComposeError::Payload(err.to_string())
        }
    }
}
