//! Quote-side logic: swap bounds caching, quote verification and assembly of
//! the immutable swap record.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, SwapError};
use crate::lp::{LpQuote, QuoteRequest};
use crate::swap::{
    AmountSpec, BitcoinArtifacts, EscrowParams, PriceInfo, Protocol, SwapDirection, SwapRecord,
    SwapState, Token, derive_swap_id,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmountBounds {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl AmountBounds {
    pub fn contains(&self, amount: u64) -> bool {
        self.min.is_none_or(|min| amount >= min) && self.max.is_none_or(|max| amount <= max)
    }
}

/// Per-pair swap limits. Until the LP rejects a request, only the
/// BTC-denominated side is populated (approximate); after a rejection the
/// fixed-amount side carries the LP's exact min/max.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapBounds {
    pub input: AmountBounds,
    pub output: AmountBounds,
    /// True once refined from an LP rejection.
    pub exact: bool,
}

pub fn pair_key(src: &Token, dst: &Token) -> String {
    fn token_key(token: &Token) -> String {
        match token {
            Token::BtcOnchain => "BTC".into(),
            Token::BtcLightning => "BTCLN".into(),
            Token::Chain {
                chain_id, address, ..
            } => format!("{chain_id}:{address}"),
        }
    }
    format!("{}->{}", token_key(src), token_key(dst))
}

/// Cached swap limits for all pairs seen so far.
pub struct BoundsCache {
    default_btc: AmountBounds,
    map: Mutex<HashMap<String, SwapBounds>>,
}

impl BoundsCache {
    pub fn new(default_btc: AmountBounds) -> Self {
        Self {
            default_btc,
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, src: &Token, dst: &Token) -> SwapBounds {
        let map = self.map.lock().expect("bounds cache mutex poisoned");
        map.get(&pair_key(src, dst))
            .copied()
            .unwrap_or_else(|| self.approximate(src))
    }

    fn approximate(&self, src: &Token) -> SwapBounds {
        // Only the bitcoin-denominated side has limits before the first LP
        // round-trip.
        if src.is_bitcoin() {
            SwapBounds {
                input: self.default_btc,
                output: AmountBounds::default(),
                exact: false,
            }
        } else {
            SwapBounds {
                input: AmountBounds::default(),
                output: self.default_btc,
                exact: false,
            }
        }
    }

    /// Rejects amounts already known to be out of bounds, without a network
    /// round-trip.
    pub fn precheck(&self, src: &Token, dst: &Token, amount: AmountSpec) -> Result<()> {
        let bounds = self.get(src, dst);
        let side = match amount {
            AmountSpec::ExactIn(_) => bounds.input,
            AmountSpec::ExactOut(_) => bounds.output,
        };
        if bounds.exact && !side.contains(amount.amount()) {
            return Err(SwapError::OutOfBounds {
                min: side.min,
                max: side.max,
            });
        }
        Ok(())
    }

    /// Records the exact min/max the LP replied with for the fixed-amount
    /// side of a rejected request. Returns the updated bounds.
    pub fn refine(
        &self,
        src: &Token,
        dst: &Token,
        amount: AmountSpec,
        min: Option<u64>,
        max: Option<u64>,
    ) -> SwapBounds {
        let mut map = self.map.lock().expect("bounds cache mutex poisoned");
        let entry = map
            .entry(pair_key(src, dst))
            .or_insert_with(|| self.approximate(src));
        let side = match amount {
            AmountSpec::ExactIn(_) => &mut entry.input,
            AmountSpec::ExactOut(_) => &mut entry.output,
        };
        side.min = min;
        side.max = max;
        entry.exact = true;
        *entry
    }
}

/// Validates an accepted LP quote against the request and the pricing
/// threshold, returning the frozen price info.
pub fn verify_quote(
    request: &QuoteRequest,
    quote: &LpQuote,
    max_price_difference_ppm: i64,
    now_millis: u64,
) -> Result<PriceInfo> {
    if quote.quote_expiry <= now_millis {
        return Err(SwapError::QuoteExpired);
    }

    if quote.input_amount == 0 || quote.output_amount == 0 {
        return Err(SwapError::InvalidAmount(
            "quote has zero input or output".into(),
        ));
    }

    // The fixed side must come back unchanged; the LP derives only the other
    // side.
    let frozen_ok = match request.amount {
        AmountSpec::ExactIn(v) => quote.input_amount == v,
        AmountSpec::ExactOut(v) => quote.output_amount == v,
    };
    if !frozen_ok {
        return Err(SwapError::InvalidAmount(format!(
            "LP changed the fixed amount: requested {:?}, quoted in={} out={}",
            request.amount, quote.input_amount, quote.output_amount
        )));
    }

    if quote.fees.entries.is_empty() {
        return Err(SwapError::InvalidAmount(
            "quote carries no fee breakdown".into(),
        ));
    }
    if !quote.fees.is_consistent() {
        return Err(SwapError::InvalidAmount(format!(
            "fee breakdown parts do not sum to total {}",
            quote.fees.total
        )));
    }

    let price = PriceInfo::new(quote.swap_price, quote.market_price);
    if price.difference_ppm.abs() > max_price_difference_ppm {
        return Err(SwapError::PriceDifference {
            difference_ppm: price.difference_ppm,
            max_ppm: max_price_difference_ppm,
        });
    }

    Ok(price)
}

/// Whether this swap variant escrows against a locally generated secret.
pub fn needs_hash_lock(direction: SwapDirection, protocol: Protocol) -> bool {
    direction.to_bitcoin() || protocol == Protocol::Legacy
}

/// Assembles the immutable swap record from an accepted, verified quote.
pub fn build_record(
    request: &QuoteRequest,
    quote: &LpQuote,
    price: PriceInfo,
    direction: SwapDirection,
    secret_hex: Option<String>,
) -> Result<SwapRecord> {
    let escrow = if needs_hash_lock(direction, quote.protocol) {
        let hash_lock = request.hash_lock.clone().ok_or_else(|| {
            SwapError::InvalidState("hash-locked flow quoted without a hash lock".into())
        })?;
        let timeout = if direction.to_bitcoin() {
            quote.escrow_timeout.ok_or_else(|| {
                SwapError::InvalidState("BTC-destination quote missing escrow timeout".into())
            })?
        } else {
            quote.escrow_timeout.unwrap_or(0)
        };
        Some(EscrowParams {
            hash_lock,
            security_deposit: quote.security_deposit,
            claimer_bounty: quote.claimer_bounty,
            timeout,
        })
    } else {
        None
    };

    // Lightning-destination payouts may target a reusable LNURL endpoint
    // instead of a one-shot invoice; a malformed link is caught here, before
    // any funds move.
    let lnurl = if direction == SwapDirection::ChainToLightning
        && request.dst_address.to_lowercase().starts_with("lnurl1")
    {
        if !crate::btc::lnurl::is_valid(&request.dst_address) {
            return Err(SwapError::InvalidState(
                "destination LNURL does not decode".into(),
            ));
        }
        Some(request.dst_address.clone())
    } else {
        None
    };

    let lock_hex = request
        .hash_lock
        .as_deref()
        .or(quote.invoice.as_deref())
        .unwrap_or("");
    let swap_id = derive_swap_id(
        direction,
        &request.src_token,
        &request.dst_token,
        quote.input_amount,
        quote.output_amount,
        lock_hex,
        quote.quote_expiry,
    );

    Ok(SwapRecord {
        swap_id,
        direction,
        protocol: quote.protocol,
        src_token: request.src_token.clone(),
        dst_token: request.dst_token.clone(),
        src_address: request.src_address.clone(),
        dst_address: request.dst_address.clone(),
        amount_spec: request.amount,
        input_amount: quote.input_amount,
        output_amount: quote.output_amount,
        gas_drop: request.gas_drop,
        fees: quote.fees.clone(),
        price,
        quote_expiry: quote.quote_expiry,
        escrow,
        min_btc_fee_rate: quote.min_btc_fee_rate,
        secret_hex,
        bitcoin: BitcoinArtifacts {
            invoice: quote.invoice.clone(),
            lnurl,
            ..BitcoinArtifacts::default()
        },
        commit_txids: Vec::new(),
        output_txid: None,
        state: SwapState::Created,
    })
}
