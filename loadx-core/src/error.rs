pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url `{0}`: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("invalid http method `{0}`")]
    InvalidMethod(String),

    #[error("invalid header `{name}`: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("binary body is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("failed to build http client: {0}")]
    ClientBuild(reqwest::Error),

    #[error("invalid proxy url `{0}`: {1}")]
    InvalidProxy(String, reqwest::Error),

    #[error("setup request `{0}` failed: {1}")]
    SetupFailed(String, String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
