use giftbridge_core::{ChainId, EscrowError};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] EscrowError),
    #[error("Configuration error: {0:#}")]
    Config(#[from] anyhow::Error),
    #[error("No agent for chain {0}")]
    UnknownChain(ChainId),
    #[error("Relay still busy after {0} rounds")]
    Stalled(usize),
    #[error("Delivery task failed")]
    Join(#[from] tokio::task::JoinError),
}
