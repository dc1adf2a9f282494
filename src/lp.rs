//! Wire-level interface to a liquidity provider node.
//!
//! Only the request/response and push shapes are defined here; the actual
//! transport (HTTP, nostr, ...) is supplied by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::swap::{AmountSpec, FeeBreakdown, Protocol, SwapState, Token};

/// Quote negotiation request sent to the LP. The hash lock is included for
/// flows that escrow against a locally generated secret; the secret itself
/// never crosses this interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub src_token: Token,
    pub dst_token: Token,
    pub amount: AmountSpec,
    pub src_address: Option<String>,
    pub dst_address: String,
    /// Requested destination-chain gas top-up, native units.
    pub gas_drop: u64,
    /// sha256 of the swap secret, hex. Present for hash-locked flows.
    pub hash_lock: Option<String>,
}

/// An accepted quote as returned by the LP. Terms are immutable once the
/// engine accepts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpQuote {
    pub protocol: Protocol,
    /// Total input including fees, source base units.
    pub input_amount: u64,
    pub output_amount: u64,
    pub fees: FeeBreakdown,
    pub swap_price: f64,
    pub market_price: f64,
    /// Unix millis.
    pub quote_expiry: u64,
    /// Escrow timeout (unix seconds) for flows that open one.
    pub escrow_timeout: Option<u64>,
    pub security_deposit: u64,
    pub claimer_bounty: u64,
    /// Minimum sat/vB fee rate required by the SPV claim path.
    pub min_btc_fee_rate: Option<u64>,
    /// BOLT11 invoice to pay, for lightning-sourced swaps.
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuoteReply {
    Accepted(LpQuote),
    /// Amount outside the LP's limits; carries the exact min/max in the
    /// fixed-amount token of the request.
    Rejected { min: Option<u64>, max: Option<u64> },
}

/// Asynchronous push notifications from the LP / watchtower network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LpUpdate {
    SwapStateChanged {
        swap_id: String,
        state: SwapState,
    },
    BoundsChanged {
        src_token: Token,
        dst_token: Token,
        min: u64,
        max: u64,
    },
    /// LP confirmed receipt of the lightning payment.
    InvoicePaid {
        swap_id: String,
    },
    /// LP broadcast the bitcoin payout of a chain-to-bitcoin swap.
    PaymentSent {
        swap_id: String,
        btc_txid: String,
    },
    /// A watchtower claim landed on the destination chain.
    SettlementLanded {
        swap_id: String,
        txid: String,
    },
}

/// Caller wallet identity needed by the LP to pre-fund a PSBT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcWalletInfo {
    pub address: String,
    pub pubkey_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedPsbtReply {
    pub psbt_hex: String,
    /// Input indices the caller must sign; any order is fine.
    pub sign_inputs: Vec<usize>,
    /// Output index paying into the swap; must carry the quoted input amount
    /// exactly.
    pub swap_vout: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPsbtReply {
    pub psbt_hex: String,
    /// Required sequence number for input 1 of the skeleton. The SPV proof
    /// of the current protocol depends on it being set exactly.
    pub in1_sequence: u32,
    /// Output index paying into the swap; must carry the quoted input amount
    /// exactly.
    pub swap_vout: u32,
}

#[async_trait]
pub trait LpTransport: Send + Sync {
    async fn request_quote(&self, request: &QuoteRequest) -> Result<QuoteReply>;

    /// Fetches a PSBT with the LP's inputs/outputs pre-added (funded mode).
    async fn funded_psbt(&self, swap_id: &str, wallet: &BtcWalletInfo) -> Result<FundedPsbtReply>;

    /// Fetches a skeleton PSBT the caller must add funding inputs to
    /// (raw mode).
    async fn raw_psbt(&self, swap_id: &str) -> Result<RawPsbtReply>;

    /// Next push update, if any. `Ok(None)` means the stream is idle.
    async fn next_update(&self) -> Result<Option<LpUpdate>>;
}
