use thiserror::Error;

pub type FolioResult<T> = Result<T, FolioError>;

#[derive(Debug, Error)]
pub enum FolioError {
    /// Bearer token could not be parsed or lacks the session claim.
    #[error("token error: {0}")]
    Token(String),

    /// Envelope was malformed or failed padding validation.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Server-reported error event or a response shape violation.
    #[error("{}", protocol_message(.code, .message))]
    Protocol { code: Option<i64>, message: String },

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0}s waiting for the next message")]
    Timeout(u64),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FolioError {
    /// Protocol violation without a server error code.
    pub fn protocol(message: impl Into<String>) -> Self {
        FolioError::Protocol {
            code: None,
            message: message.into(),
        }
    }

    /// Error event reported by the server.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        FolioError::Protocol {
            code: Some(code),
            message: message.into(),
        }
    }
}

fn protocol_message(code: &Option<i64>, message: &str) -> String {
    match code {
        Some(code) => format!("server error ({code}): {message}"),
        None => format!("protocol error: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(
            FolioError::server(401, "unauthorised").to_string(),
            "server error (401): unauthorised"
        );
        assert_eq!(
            FolioError::protocol("unexpected event").to_string(),
            "protocol error: unexpected event"
        );
    }
}
