use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Rejections the engine can hand back to the caller for a malformed or
/// out-of-protocol message. A violated safety invariant (equivocating on
/// an already-finalized round, a signature that verifies but over the
/// wrong round) is a programming bug, not a protocol fact, and panics
/// instead of returning one of these.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unauthorized: sender is not a current validator")]
    Unauthorized,

    #[error("equivocating message rejected")]
    Equivocation,

    #[error("stale message for a height or view already past")]
    Stale,

    #[error("message is ahead of the local pipeline by {0} blocks")]
    Ahead(u64),

    #[error("pipeline at capacity, message dropped")]
    Capacity,

    #[error(transparent)]
    Core(#[from] cc_core::CCError),
}
