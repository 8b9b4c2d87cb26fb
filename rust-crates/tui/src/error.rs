use thiserror::Error;

/// Failures crossing the chain client boundary.
///
/// Every variant ends up as a single displayed message; none is retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),
    #[error("request rejected: {0}")]
    UserRejected(String),
    #[error("insufficient balance: {balance} ETH available, {required} ETH required")]
    InsufficientBalance { balance: String, required: String },
    #[error("{0} event not found in transaction receipt")]
    EventNotFound(&'static str),
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        ChainError::Rpc(err.to_string())
    }
}
