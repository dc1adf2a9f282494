use std::str::FromStr as _;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::Hash as _;
use lightning_invoice::Bolt11Invoice;

use crate::error::{Result, SwapError};

fn parse(invoice: &str) -> Result<Bolt11Invoice> {
    Bolt11Invoice::from_str(invoice)
        .map_err(|e| SwapError::Bitcoin(format!("parse BOLT11 invoice: {e:?}")))
}

pub fn payment_hash_from_bolt11(invoice: &str) -> Result<[u8; 32]> {
    Ok(parse(invoice)?.payment_hash().to_byte_array())
}

pub fn amount_msat_from_bolt11(invoice: &str) -> Result<Option<u64>> {
    Ok(parse(invoice)?.amount_milli_satoshis())
}

pub fn is_expired(invoice: &str) -> Result<bool> {
    let invoice = parse(invoice)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SwapError::Bitcoin(format!("system clock before epoch: {e}")))?;
    Ok(invoice.would_expire(now))
}

/// Renders a `lightning:` hyperlink for wallet handoff.
pub fn hyperlink(invoice: &str) -> String {
    format!("lightning:{invoice}")
}
