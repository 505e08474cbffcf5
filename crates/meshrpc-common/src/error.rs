use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;
