use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Connection not found: {0}")]
    ConnectionNotFound(Uuid),

    #[error("Connection closed: {0}")]
    ConnectionClosed(Uuid),
}

pub type Result<T> = std::result::Result<T, HubError>;
