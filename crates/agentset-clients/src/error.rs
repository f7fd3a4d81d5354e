#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {0} failed: {1}")]
    Transport(String, #[source] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("response body could not be parsed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

pub type ClientResult<T> = Result<T, ClientError>;
