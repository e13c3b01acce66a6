//! `WorkerError`, per §12's one-thiserror-enum-per-crate convention.

use polos_contracts::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to bind push server: {0}")]
    Bind(#[from] std::io::Error),
}
