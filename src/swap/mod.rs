pub mod engine;
pub mod state;
pub mod store;

use bitcoin::hashes::{Hash as _, sha256};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SwapError};

/// A swappable asset. Bitcoin L1 and Lightning are singletons; smart-chain
/// tokens are identified by chain id and contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Token {
    BtcOnchain,
    BtcLightning,
    Chain {
        chain_id: String,
        address: String,
        ticker: String,
        decimals: u8,
    },
}

impl Token {
    pub fn is_bitcoin(&self) -> bool {
        matches!(self, Token::BtcOnchain | Token::BtcLightning)
    }

    pub fn ticker(&self) -> &str {
        match self {
            Token::BtcOnchain => "BTC",
            Token::BtcLightning => "BTC-LN",
            Token::Chain { ticker, .. } => ticker,
        }
    }
}

/// Which escrow protocol the LP speaks for a given pair. Legacy escrows are
/// opened by the user on the destination chain before funding; the SPV
/// protocol lets the LP prove the bitcoin transaction directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Legacy,
    Spv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    BtcToChain,
    LightningToChain,
    ChainToBtc,
    ChainToLightning,
}

impl SwapDirection {
    /// Infers the swap direction from the token pair.
    pub fn infer(src: &Token, dst: &Token) -> Result<Self> {
        match (src, dst) {
            (Token::BtcOnchain, Token::Chain { .. }) => Ok(Self::BtcToChain),
            (Token::BtcLightning, Token::Chain { .. }) => Ok(Self::LightningToChain),
            (Token::Chain { .. }, Token::BtcOnchain) => Ok(Self::ChainToBtc),
            (Token::Chain { .. }, Token::BtcLightning) => Ok(Self::ChainToLightning),
            _ => Err(SwapError::InvalidState(format!(
                "unsupported swap pair: {} -> {}",
                src.ticker(),
                dst.ticker()
            ))),
        }
    }

    /// Swaps paying out on the bitcoin side are funded by a destination-chain
    /// escrow and recovered via refund.
    pub fn to_bitcoin(&self) -> bool {
        matches!(self, Self::ChainToBtc | Self::ChainToLightning)
    }
}

/// Which side of the swap the caller fixed; the other side is derived by the
/// LP and frozen at quote time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "amount", rename_all = "snake_case")]
pub enum AmountSpec {
    ExactIn(u64),
    ExactOut(u64),
}

impl AmountSpec {
    pub fn amount(&self) -> u64 {
        match self {
            Self::ExactIn(v) | Self::ExactOut(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    /// The LP's swap fee.
    Swap,
    /// Network fee for the payout transaction on the destination.
    NetworkOutput,
    /// Fee covering a requested gas top-up on the destination chain.
    GasDrop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEntry {
    pub kind: FeeKind,
    /// Amount in source-token base units.
    pub amount: u64,
}

/// Ordered fee breakdown. The sum of the parts must equal `total` exactly;
/// quotes violating this are rejected before acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub entries: Vec<FeeEntry>,
    pub total: u64,
}

impl FeeBreakdown {
    pub fn is_consistent(&self) -> bool {
        let mut sum: u64 = 0;
        for entry in &self.entries {
            match sum.checked_add(entry.amount) {
                Some(s) => sum = s,
                None => return false,
            }
        }
        sum == self.total
    }
}

/// Pricing snapshot frozen into the quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    /// Price of this swap, excluding fees (destination units per source unit).
    pub swap_price: f64,
    /// Reference market price at quote time.
    pub market_price: f64,
    /// Signed relative difference between the two, in parts per million.
    pub difference_ppm: i64,
}

impl PriceInfo {
    pub fn new(swap_price: f64, market_price: f64) -> Self {
        let difference_ppm = if market_price == 0.0 {
            0
        } else {
            (((swap_price - market_price) / market_price) * 1_000_000.0).round() as i64
        };
        Self {
            swap_price,
            market_price,
            difference_ppm,
        }
    }
}

/// Parameters of the hash-locked destination-chain escrow. Present for
/// chain-to-bitcoin flows and for legacy bitcoin-to-chain flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    /// sha256 digest of the swap secret.
    pub hash_lock: String,
    /// Refundable collateral locked by the committer, base units.
    pub security_deposit: u64,
    /// Incentive paid to whoever lands the claim transaction.
    pub claimer_bounty: u64,
    /// Absolute unix timestamp (seconds) after which refund becomes legal.
    pub timeout: u64,
}

/// Bitcoin-side artifacts accumulated while the swap progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinArtifacts {
    /// Hex-serialized PSBT, once obtained from the LP.
    pub psbt_hex: Option<String>,
    /// BOLT11 invoice for lightning-sourced swaps.
    pub invoice: Option<String>,
    /// LNURL link for lightning-destination swaps paying a reusable endpoint.
    pub lnurl: Option<String>,
    /// Txid of the broadcast bitcoin funding transaction.
    pub funding_txid: Option<String>,
    /// Required sequence for input 1 of a raw-mode PSBT; re-checked at
    /// submission.
    pub in1_sequence: Option<u32>,
}

/// State of a single swap instance. A given variant only ever visits the
/// subset declared in [`state::diagram`], strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Created,
    /// Destination-chain escrow opened.
    Committed,
    /// Bitcoin funding transaction signed and broadcast.
    Funded,
    /// Source transaction reached the required confirmation depth.
    SrcConfirmed,
    /// LP broadcast the bitcoin payout (chain-to-bitcoin flows).
    PaymentSent,
    /// LP confirmed receipt of the lightning payment.
    Paid,
    /// Automatic settlement window elapsed; caller owns the claim now.
    ManualClaimPending,
    Claimed,
    Refunded,
    Expired,
    Failed,
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Claimed | Self::Refunded | Self::Expired | Self::Failed
        )
    }
}

/// The central swap entity. Created by the quote engine, mutated exclusively
/// through [`engine::Swapper`], retired once a terminal state is reached.
///
/// Amounts, fees and pricing are immutable after quote acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,
    pub direction: SwapDirection,
    pub protocol: Protocol,
    pub src_token: Token,
    pub dst_token: Token,
    pub src_address: Option<String>,
    pub dst_address: String,

    pub amount_spec: AmountSpec,
    /// Total input including fees, source base units.
    pub input_amount: u64,
    /// Payout on the destination, destination base units.
    pub output_amount: u64,
    /// Requested destination-chain gas top-up, destination native units.
    pub gas_drop: u64,
    pub fees: FeeBreakdown,
    pub price: PriceInfo,

    /// Unix millis after which the quote is void.
    pub quote_expiry: u64,
    pub escrow: Option<EscrowParams>,
    /// Minimum bitcoin fee rate (sat/vB) required by the SPV claim path.
    pub min_btc_fee_rate: Option<u64>,

    /// Hash-lock pre-image, generated locally at quote time for flows that
    /// need one. Never part of any wire message before the claim lands.
    pub secret_hex: Option<String>,

    pub bitcoin: BitcoinArtifacts,
    /// Txids of destination-chain commit transactions, in submission order.
    pub commit_txids: Vec<String>,
    /// Txid of the settling transaction (claim or payout), once known.
    pub output_txid: Option<String>,

    pub state: SwapState,
}

impl SwapRecord {
    /// Input amount excluding fees.
    pub fn input_without_fee(&self) -> u64 {
        self.input_amount.saturating_sub(self.fees.total)
    }

    /// The revealed pre-image, serving as cryptographic proof of payment.
    /// Only available once the swap is claimed.
    pub fn payment_proof(&self) -> Option<&str> {
        if self.state == SwapState::Claimed {
            self.secret_hex.as_deref()
        } else {
            None
        }
    }

    pub fn quote_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.quote_expiry
    }
}

/// Derives the content-addressed swap id from the frozen quote terms.
pub fn derive_swap_id(
    direction: SwapDirection,
    src: &Token,
    dst: &Token,
    input_amount: u64,
    output_amount: u64,
    lock_hex: &str,
    quote_expiry: u64,
) -> String {
    let preimage = format!(
        "{direction:?}|{}|{}|{input_amount}|{output_amount}|{lock_hex}|{quote_expiry}",
        src.ticker(),
        dst.ticker()
    );
    sha256::Hash::hash(preimage.as_bytes()).to_string()
}
