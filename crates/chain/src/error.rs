//! Errors raised while talking to the chain.

/// Failure reported by the connection layer.
///
/// Everything here is a network-class error: the caller decides whether to
/// retry, nothing in this crate retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] alloy::transports::TransportError),

    #[error("contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),

    #[error("failed to decode log: {0}")]
    Decode(#[from] alloy::sol_types::Error),

    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("no signer configured for this connection")]
    NoSigner,

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Build a free-form error, mostly useful for tests and mocks.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
