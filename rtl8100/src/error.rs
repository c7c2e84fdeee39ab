// Error types for driver setup and lifecycle operations

use alloc::string::String;
use thiserror::Error;

/// Errors returned by setup-time operations.
///
/// Data-path operations never return these; they report outcomes through
/// [`crate::tx::TxOutcome`], [`crate::interrupt::InterruptOutcome`] and the
/// counters in [`crate::stats::Counters`].
#[derive(Debug, Error)]
pub enum NicError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("DMA allocation failed: {0}")]
    DmaAllocation(String),

    #[error("Receive buffer pool exhausted")]
    BufferExhausted,

    #[error("Chip reset not acknowledged after {0} polls")]
    ResetTimeout(u32),
}
