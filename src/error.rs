use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    /// The completion API produced nothing that could be read as an HTTP response.
    #[error("Invalid response from completion API: {0}")]
    InvalidResponse(String),

    /// The completion API answered with a non-2xx status.
    #[error("Bad response ({status_code}): {message}")]
    BadResponse { status_code: u16, message: String },

    #[error("Failed to decode completion response: {0}")]
    Decode(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::InvalidResponse(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for ChatError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        ChatError::Retrieval(err.to_string())
    }
}
