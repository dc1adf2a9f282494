//! Trustless swaps between bitcoin (on-chain and lightning) and
//! smart-contract-chain assets through a liquidity-provider network.
//!
//! The crate owns quote negotiation, the per-swap state machine, bitcoin
//! PSBT handling, the hash-locked escrow protocol on the smart-chain side
//! and the automatic/manual settlement race. Wallet signing, chain RPC,
//! persistence backends and the LP transport are supplied by the caller
//! through the traits in [`chain`], [`lp`] and [`swap::store`].

pub mod btc;
pub mod chain;
pub mod error;
pub mod escrow;
pub mod logging;
pub mod lp;
pub mod quote;
pub mod swap;
pub mod watch;

pub use error::{Result, SwapError};
pub use swap::engine::{Swapper, SwapperConfig};
pub use swap::{
    AmountSpec, FeeBreakdown, FeeEntry, FeeKind, PriceInfo, Protocol, SwapDirection, SwapRecord,
    SwapState, Token,
};
pub use watch::CancelToken;
