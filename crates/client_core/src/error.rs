use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub const ADMIN_LOGIN_REQUIRED: &str = "You must be logged in as admin.";
pub const VOTER_LOGIN_REQUIRED: &str = "You must be logged in to vote.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request never completed.
    #[error("network request failed: {0}")]
    Network(String),
    /// Non-2xx response; `message` is what the server said.
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("unexpected response from server: {0}")]
    Decode(String),
    #[error("{0}")]
    MissingCredential(&'static str),
    #[error("Admins cannot vote in sessions.")]
    AdminCannotVote,
    #[error("{0}")]
    Validation(String),
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the user may simply try the same action again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
