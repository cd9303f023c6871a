use thiserror::Error;

pub type Result<T> = std::result::Result<T, CCError>;

#[derive(Error, Debug)]
pub enum CCError {
    #[error("consensus error: {0}")]
    Consensus(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("other error: {0}")]
    Other(String),
}
