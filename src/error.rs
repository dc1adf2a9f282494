use thiserror::Error;

/// Errors surfaced by the swap engine.
///
/// Bounded waits do not report elapsed time through this type: they resolve
/// to a negative result (`Ok(false)` / `Ok(None)`). Only an explicit
/// cancellation raises [`SwapError::Cancelled`].
#[derive(Debug, Error)]
pub enum SwapError {
    /// Requested amount is outside the LP-advertised limits. Carries the
    /// exact bounds the LP replied with, denominated in the fixed-amount
    /// token of the request.
    #[error("amount out of bounds (min: {min:?}, max: {max:?})")]
    OutOfBounds { min: Option<u64>, max: Option<u64> },

    /// The quote deadline passed before the swap was funded/committed.
    /// Not retryable with the same quote; a fresh quote must be requested.
    #[error("quote expired")]
    QuoteExpired,

    /// LP or chain RPC unreachable after retries.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// A transaction was reverted or rejected on-chain. Never retried as-is;
    /// chain-sourced flows fall back to refund, BTC-sourced flows to manual
    /// claim.
    #[error("on-chain rejection: {0}")]
    OnChainRejection(String),

    /// An explicit cancellation token fired during a bounded wait. The
    /// persisted swap state is untouched.
    #[error("operation cancelled")]
    Cancelled,

    /// Quoted swap price deviates from the market price beyond the
    /// configured parts-per-million threshold.
    #[error("price difference {difference_ppm} ppm exceeds maximum {max_ppm} ppm")]
    PriceDifference { difference_ppm: i64, max_ppm: i64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The requested operation is not legal for the swap's current state or
    /// variant (e.g. refunding a BTC-sourced swap, advancing backwards).
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("swap not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("bitcoin artifact error: {0}")]
    Bitcoin(String),
}

pub type Result<T> = std::result::Result<T, SwapError>;
