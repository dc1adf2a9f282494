//! Bitcoin funding-transaction construction on top of PSBTs.
//!
//! Two modes exist. In funded mode the LP pre-adds its inputs and outputs and
//! the caller signs only the indices it is told to. In raw mode the caller
//! appends its own funding inputs to a skeleton and must set the sequence of
//! input 1 exactly as instructed, since the SPV claim proof commits to it.

use bitcoin::{Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::{Result, SwapError};
use crate::lp::{FundedPsbtReply, RawPsbtReply};

/// A PSBT returned by the LP with its inputs/outputs already in place.
#[derive(Debug, Clone)]
pub struct FundedPsbt {
    pub psbt: Psbt,
    pub sign_inputs: Vec<usize>,
    pub swap_vout: u32,
}

impl FundedPsbt {
    pub fn from_reply(reply: &FundedPsbtReply) -> Result<Self> {
        Ok(Self {
            psbt: parse_psbt_hex(&reply.psbt_hex)?,
            sign_inputs: reply.sign_inputs.clone(),
            swap_vout: reply.swap_vout,
        })
    }
}

/// A skeleton PSBT the caller still has to fund.
#[derive(Debug, Clone)]
pub struct RawPsbt {
    pub psbt: Psbt,
    pub in1_sequence: Sequence,
    pub swap_vout: u32,
}

impl RawPsbt {
    pub fn from_reply(reply: &RawPsbtReply) -> Result<Self> {
        Ok(Self {
            psbt: parse_psbt_hex(&reply.psbt_hex)?,
            in1_sequence: Sequence(reply.in1_sequence),
            swap_vout: reply.swap_vout,
        })
    }

    /// Appends a caller-owned funding input. `prev_out` must be a segwit
    /// output so the witness UTXO can be recorded for signing.
    pub fn add_funding_input(
        &mut self,
        previous_output: OutPoint,
        prev_txout: TxOut,
    ) -> Result<()> {
        self.psbt.unsigned_tx.input.push(TxIn {
            previous_output,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        self.psbt.inputs.push(bitcoin::psbt::Input {
            witness_utxo: Some(prev_txout),
            ..Default::default()
        });
        Ok(())
    }

    /// Pins the designated sequence number onto input 1 of the skeleton.
    /// Must be called after funding inputs are added and before signing.
    pub fn apply_in1_sequence(&mut self) -> Result<()> {
        let input = self
            .psbt
            .unsigned_tx
            .input
            .get_mut(1)
            .ok_or_else(|| SwapError::Bitcoin("raw psbt has no input at index 1".into()))?;
        input.sequence = self.in1_sequence;
        Ok(())
    }

    /// Confirms the sequence constraint holds; violating it invalidates the
    /// claim path and must be caught before broadcast.
    pub fn verify_in1_sequence(&self) -> Result<()> {
        match self.psbt.unsigned_tx.input.get(1) {
            Some(input) if input.sequence == self.in1_sequence => Ok(()),
            Some(input) => Err(SwapError::Bitcoin(format!(
                "input 1 sequence {} does not match required {}",
                input.sequence, self.in1_sequence
            ))),
            None => Err(SwapError::Bitcoin("raw psbt has no input at index 1".into())),
        }
    }
}

pub fn parse_psbt_hex(psbt_hex: &str) -> Result<Psbt> {
    let bytes =
        hex::decode(psbt_hex).map_err(|e| SwapError::Bitcoin(format!("decode psbt hex: {e}")))?;
    Psbt::deserialize(&bytes).map_err(|e| SwapError::Bitcoin(format!("deserialize psbt: {e}")))
}

pub fn psbt_to_hex(psbt: &Psbt) -> String {
    hex::encode(psbt.serialize())
}

/// Checks the hard funding invariant: the swap output carries exactly the
/// quoted input amount. Over- and underpayment both break the linkage to the
/// escrow claim and are rejected before broadcast.
pub fn verify_funding_value(psbt: &Psbt, swap_vout: u32, expected_sats: u64) -> Result<()> {
    let output = psbt
        .unsigned_tx
        .output
        .get(swap_vout as usize)
        .ok_or_else(|| SwapError::Bitcoin(format!("psbt has no output at index {swap_vout}")))?;
    if output.value != Amount::from_sat(expected_sats) {
        return Err(SwapError::Bitcoin(format!(
            "swap output value {} does not equal quoted input of {expected_sats} sat",
            output.value
        )));
    }
    Ok(())
}

/// Extracts the final transaction for broadcast, hex-encoded.
pub fn extract_tx_hex(psbt: Psbt) -> Result<(Transaction, String)> {
    let tx = psbt
        .extract_tx()
        .map_err(|e| SwapError::Bitcoin(format!("extract transaction: {e:?}")))?;
    let tx_hex = hex::encode(bitcoin::consensus::encode::serialize(&tx));
    Ok((tx, tx_hex))
}
