use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned an error response: {0}")]
    Api(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}
