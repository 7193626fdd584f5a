use derive_builder::UninitializedFieldError;
use tonic::{Code, Status};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bigtable client error: {0}")]
    Client(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("codec error: {0}")]
    Codec(String),

    /// The server sent a chunk sequence that cannot be assembled into rows.
    #[error("invalid chunk sequence: {0}")]
    InvalidChunkSequence(String),
    #[error("invalid key set: {0}")]
    InvalidKeySet(String),

    #[error("authentication error: {0}")]
    Auth(#[from] gcp_auth::Error),

    #[error("transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("unexpected gRPC status: {0}")]
    Status(#[from] Status),
}

impl Error {
    /// Returns true when the operation that produced this error may be attempted again.
    ///
    /// Only gRPC statuses are ever retryable, see [`is_retryable_status`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Status(status) => is_retryable_status(status),
            _ => false,
        }
    }
}

impl From<UninitializedFieldError> for Error {
    fn from(value: UninitializedFieldError) -> Self {
        Error::Config(value.to_string())
    }
}

pub(crate) const RETRYABLE_CODES: [Code; 4] = [
    Code::DeadlineExceeded,
    Code::ResourceExhausted,
    Code::Aborted,
    Code::Unavailable,
];

/// Classifies a gRPC status as transient.
///
/// Besides the fixed set of retryable codes, an `INTERNAL` status caused by the
/// server resetting the HTTP/2 stream is also considered transient.
pub fn is_retryable_status(status: &Status) -> bool {
    RETRYABLE_CODES.contains(&status.code()) || is_rst_stream(status)
}

fn is_rst_stream(status: &Status) -> bool {
    if status.code() != Code::Internal {
        return false;
    }
    let message = status.message().to_lowercase();
    message.contains("rst_stream") || message.contains("rst stream")
}
