use thiserror::Error;

/// Every way a capture cycle or an analysis request can fail. None of these
/// are fatal: callers log them and carry on.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Network unreachable, connection reset, body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response is not the JSON shape we asked for.
    #[error("unparsable classifier response: {0}")]
    Parse(String),

    /// Screenshot, markup or active tab could not be obtained.
    #[error("browser capability unavailable: {0}")]
    Unavailable(String),

    /// The other end of a message channel is gone.
    #[error("message delivery failed: {0}")]
    Messaging(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<reqwest::Error> for CaptureError {
    fn from(err: reqwest::Error) -> Self {
        CaptureError::Transport(err.to_string())
    }
}
