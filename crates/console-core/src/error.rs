use thiserror::Error;

pub type ConsoleResult<T> = Result<T, ConsoleError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleError {
    /// No usable response: connection failure, timeout, or a body that does
    /// not match the endpoint contract.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered but refused the operation.
    #[error("operation rejected ({status}): {message}")]
    Operation { status: u16, message: String },
    /// A client-side precondition was not met; nothing was sent.
    #[error("validation error: {0}")]
    Validation(String),
}

impl ConsoleError {
    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        Self::Transport(err.to_string())
    }
    pub fn invalid<E: std::fmt::Display>(err: E) -> Self {
        Self::Validation(err.to_string())
    }
    pub fn operation<E: std::fmt::Display>(status: u16, err: E) -> Self {
        Self::Operation {
            status,
            message: err.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Message suitable for showing to the operator, without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Transport(msg) | Self::Validation(msg) => msg,
            Self::Operation { message, .. } => message,
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConsoleError::Transport(format!("unexpected response body: {err}"))
        } else {
            ConsoleError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        ConsoleError::Transport(format!("JSON parse error: {err}"))
    }
}
