//! Per-variant swap state diagrams and forward-only transition enforcement.

use super::{Protocol, SwapDirection, SwapRecord, SwapState};
use crate::error::{Result, SwapError};

/// The ordered happy-path diagram for a swap variant. States may be skipped
/// (e.g. `ManualClaimPending` when a watchtower settles first) but never
/// revisited.
pub fn diagram(direction: SwapDirection, protocol: Protocol) -> &'static [SwapState] {
    use SwapState::*;
    match (direction, protocol) {
        (SwapDirection::BtcToChain, Protocol::Spv) => {
            &[Created, Funded, SrcConfirmed, ManualClaimPending, Claimed]
        }
        (SwapDirection::BtcToChain, Protocol::Legacy) => &[
            Created,
            Committed,
            Funded,
            SrcConfirmed,
            ManualClaimPending,
            Claimed,
        ],
        (SwapDirection::LightningToChain, _) => &[Created, Paid, ManualClaimPending, Claimed],
        (SwapDirection::ChainToBtc | SwapDirection::ChainToLightning, _) => {
            &[Created, Committed, PaymentSent, Claimed]
        }
    }
}

fn position(diagram: &[SwapState], state: SwapState) -> Option<usize> {
    diagram.iter().position(|s| *s == state)
}

/// Whether `from -> to` is a legal transition for the given variant.
pub fn can_transition(
    direction: SwapDirection,
    protocol: Protocol,
    from: SwapState,
    to: SwapState,
) -> bool {
    if from.is_terminal() || from == to {
        return false;
    }
    match to {
        SwapState::Failed => true,
        // Only quotes that never moved funds expire; funded swaps fail or
        // fall back to claim/refund instead.
        SwapState::Expired => matches!(from, SwapState::Created | SwapState::Committed),
        SwapState::Refunded => {
            direction.to_bitcoin()
                && matches!(from, SwapState::Committed | SwapState::PaymentSent)
        }
        _ => {
            let diag = diagram(direction, protocol);
            match (position(diag, from), position(diag, to)) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            }
        }
    }
}

/// Advances a swap strictly forward along its diagram.
pub fn advance(record: &mut SwapRecord, to: SwapState) -> Result<()> {
    if !can_transition(record.direction, record.protocol, record.state, to) {
        return Err(SwapError::InvalidState(format!(
            "illegal transition {:?} -> {to:?} for {:?}/{:?} swap {}",
            record.state, record.direction, record.protocol, record.swap_id
        )));
    }
    tracing::debug!(
        swap_id = %record.swap_id,
        from = ?record.state,
        to = ?to,
        "swap state transition"
    );
    record.state = to;
    Ok(())
}
