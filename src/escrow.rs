//! Smart-chain side of the swap: a hash-locked, timeout-bounded escrow.
//!
//! Transactions are expressed as chain-agnostic [`ChainTransaction`] values;
//! a per-chain [`crate::chain::ChainSigner`] turns them into real signed
//! transactions. Plans that include an account deployment are one logical
//! unit: the deployment confirms before the invocation is broadcast.

use bitcoin::hashes::{Hash as _, sha256};
use rand::RngCore as _;

use crate::chain::{ChainTransaction, EscrowStatus};
use crate::error::{Result, SwapError};
use crate::swap::SwapRecord;

/// Single-round digest of the secret, hex.
pub fn hash_lock(secret: &[u8; 32]) -> String {
    sha256::Hash::hash(secret).to_string()
}

/// Generates a fresh 32-byte pre-image and its hash lock.
pub fn generate_secret() -> (String, String) {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    (hex::encode(secret), hash_lock(&secret))
}

/// Checks that a revealed pre-image matches a hash lock.
pub fn verify_secret(hash_lock_hex: &str, secret_hex: &str) -> Result<()> {
    let bytes =
        hex::decode(secret_hex).map_err(|e| SwapError::Bitcoin(format!("decode secret: {e}")))?;
    let secret: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SwapError::Bitcoin("secret must be 32 bytes".into()))?;
    if hash_lock(&secret) != hash_lock_hex.to_lowercase() {
        return Err(SwapError::OnChainRejection(
            "pre-image does not match escrow hash lock".into(),
        ));
    }
    Ok(())
}

/// An ordered multi-transaction unit. Step `n + 1` must not be broadcast
/// before step `n` reached the required confirmation depth.
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub steps: Vec<ChainTransaction>,
}

fn escrow_params(record: &SwapRecord) -> Result<&crate::swap::EscrowParams> {
    record
        .escrow
        .as_ref()
        .ok_or_else(|| SwapError::InvalidState("swap variant carries no escrow".into()))
}

/// Builds the commit plan opening the escrow: swap amount plus, for
/// chain-to-bitcoin flows, the security deposit and claimer bounty.
pub fn commit_plan(
    record: &SwapRecord,
    block_reference: &str,
    needs_account_deploy: bool,
) -> Result<TransactionPlan> {
    let escrow = escrow_params(record)?;

    let locked_amount = if record.direction.to_bitcoin() {
        record
            .input_amount
            .checked_add(escrow.security_deposit)
            .and_then(|v| v.checked_add(escrow.claimer_bounty))
            .ok_or_else(|| SwapError::InvalidAmount("escrow amount overflow".into()))?
    } else {
        // Legacy bitcoin-sourced flows: the LP funds the escrow, the user
        // only locks the deposit and bounty.
        escrow
            .security_deposit
            .checked_add(escrow.claimer_bounty)
            .ok_or_else(|| SwapError::InvalidAmount("escrow amount overflow".into()))?
    };

    let mut steps = Vec::new();
    if needs_account_deploy {
        steps.push(ChainTransaction::DeployAccount {
            calldata: serde_json::json!({
                "address": record.src_address,
                "block_reference": block_reference,
            }),
        });
    }
    steps.push(ChainTransaction::Invoke {
        entrypoint: "initialize".into(),
        calldata: serde_json::json!({
            "escrow_id": record.swap_id,
            "hash_lock": escrow.hash_lock,
            "amount": locked_amount,
            "security_deposit": escrow.security_deposit,
            "claimer_bounty": escrow.claimer_bounty,
            "timeout": escrow.timeout,
            "payee": record.dst_address,
            "block_reference": block_reference,
        }),
    });

    Ok(TransactionPlan { steps })
}

/// Builds the claim plan revealing the pre-image. Anyone holding the secret
/// may submit it, which is what lets watchtowers settle on the user's behalf.
pub fn claim_plan(
    record: &SwapRecord,
    secret_hex: &str,
    block_reference: &str,
    needs_account_deploy: bool,
) -> Result<TransactionPlan> {
    let escrow = escrow_params(record)?;
    verify_secret(&escrow.hash_lock, secret_hex)?;

    let mut steps = Vec::new();
    if needs_account_deploy {
        steps.push(ChainTransaction::DeployAccount {
            calldata: serde_json::json!({
                "address": record.dst_address,
                "block_reference": block_reference,
            }),
        });
    }
    steps.push(ChainTransaction::Invoke {
        entrypoint: "claim".into(),
        calldata: serde_json::json!({
            "escrow_id": record.swap_id,
            "secret": secret_hex,
            "block_reference": block_reference,
        }),
    });

    Ok(TransactionPlan { steps })
}

/// Builds the claim plan for current-protocol bitcoin-sourced swaps, where
/// the claim references the confirmed bitcoin funding transaction (or the
/// paid lightning invoice) instead of a pre-image.
pub fn spv_claim_plan(
    record: &SwapRecord,
    block_reference: &str,
    needs_account_deploy: bool,
) -> Result<TransactionPlan> {
    let funding_ref = record
        .bitcoin
        .funding_txid
        .as_deref()
        .or(record.bitcoin.invoice.as_deref())
        .ok_or_else(|| {
            SwapError::InvalidState("cannot claim before the bitcoin payment is known".into())
        })?;

    let mut steps = Vec::new();
    if needs_account_deploy {
        steps.push(ChainTransaction::DeployAccount {
            calldata: serde_json::json!({
                "address": record.dst_address,
                "block_reference": block_reference,
            }),
        });
    }
    steps.push(ChainTransaction::Invoke {
        entrypoint: "claim".into(),
        calldata: serde_json::json!({
            "escrow_id": record.swap_id,
            "bitcoin_payment": funding_ref,
            "block_reference": block_reference,
        }),
    });

    Ok(TransactionPlan { steps })
}

/// Builds the refund plan. Only legal for the original committer, only after
/// the escrow timeout, and only while no claim has landed.
pub fn refund_plan(
    record: &SwapRecord,
    committer: &str,
    now_secs: u64,
    block_reference: &str,
) -> Result<TransactionPlan> {
    let escrow = escrow_params(record)?;

    if record.src_address.as_deref() != Some(committer) {
        return Err(SwapError::InvalidState(
            "refund is only available to the original committer".into(),
        ));
    }
    if now_secs < escrow.timeout {
        return Err(SwapError::InvalidState(format!(
            "escrow timeout {} not yet reached (now {now_secs})",
            escrow.timeout
        )));
    }

    Ok(TransactionPlan {
        steps: vec![ChainTransaction::Invoke {
            entrypoint: "refund".into(),
            calldata: serde_json::json!({
                "escrow_id": record.swap_id,
                "committer": committer,
                "block_reference": block_reference,
            }),
        }],
    })
}

/// Gate before submitting a claim: the escrow must still be open. A claim
/// that already landed is reported as an on-chain rejection so the caller
/// can treat the race as benign.
pub fn ensure_claimable(status: &EscrowStatus) -> Result<()> {
    match status {
        EscrowStatus::Open => Ok(()),
        EscrowStatus::Claimed { txid, .. } => Err(SwapError::OnChainRejection(format!(
            "escrow already claimed in {txid}"
        ))),
        EscrowStatus::Refunded { txid } => Err(SwapError::OnChainRejection(format!(
            "escrow already refunded in {txid}"
        ))),
        EscrowStatus::NotFound => Err(SwapError::OnChainRejection("escrow not found".into())),
    }
}

/// Gate before submitting a refund; idempotent against already-settled
/// escrows.
pub fn ensure_refundable(status: &EscrowStatus) -> Result<()> {
    match status {
        EscrowStatus::Open => Ok(()),
        EscrowStatus::Claimed { txid, .. } => Err(SwapError::OnChainRejection(format!(
            "escrow already claimed in {txid}"
        ))),
        EscrowStatus::Refunded { txid } => Err(SwapError::OnChainRejection(format!(
            "escrow already refunded in {txid}"
        ))),
        EscrowStatus::NotFound => Err(SwapError::OnChainRejection("escrow not found".into())),
    }
}
