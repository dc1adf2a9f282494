//! External chain interfaces: RPC access and transaction signing.
//!
//! Per-chain backends implement these traits; the engine never talks to a
//! node directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A smart-chain transaction the engine asks a signer to execute. Backends
/// implement only the variants their chain needs; account-abstraction chains
/// additionally support [`ChainTransaction::DeployAccount`], which must
/// precede the invocation it enables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainTransaction {
    Invoke {
        entrypoint: String,
        calldata: serde_json::Value,
    },
    DeployAccount {
        calldata: serde_json::Value,
    },
    Raw {
        #[serde(with = "hex_bytes")]
        bytes: Vec<u8>,
    },
}

mod hex_bytes {
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// On-chain view of a hash-locked escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    NotFound,
    Open,
    Claimed { txid: String, secret_hex: String },
    Refunded { txid: String },
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Submits a signed transaction, returning its txid.
    async fn submit(&self, signed: &[u8]) -> Result<String>;

    /// Confirmation depth of a transaction; 0 while unconfirmed.
    async fn confirmations(&self, txid: &str) -> Result<u32>;

    /// Current status of the escrow identified by the swap id.
    async fn escrow_status(&self, escrow_id: &str) -> Result<EscrowStatus>;

    /// Chain-specific transient datum needed to build a transaction
    /// (recent blockhash, account nonce, ...).
    async fn block_reference(&self) -> Result<String>;
}

/// Capability-based smart-chain signer. Supports both sign-and-return and
/// sign-and-submit.
#[async_trait]
pub trait ChainSigner: Send + Sync {
    fn address(&self) -> String;

    async fn sign(&self, tx: &ChainTransaction) -> Result<Vec<u8>>;

    async fn sign_and_submit(&self, tx: &ChainTransaction) -> Result<String>;
}

/// Adapter for backends whose signer can only sign: the signed bytes are
/// broadcast through the wrapped [`ChainRpc`] instead.
pub struct SignThenSubmit {
    signer: Arc<dyn ChainSigner>,
    rpc: Arc<dyn ChainRpc>,
}

impl SignThenSubmit {
    pub fn new(signer: Arc<dyn ChainSigner>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { signer, rpc }
    }
}

#[async_trait]
impl ChainSigner for SignThenSubmit {
    fn address(&self) -> String {
        self.signer.address()
    }

    async fn sign(&self, tx: &ChainTransaction) -> Result<Vec<u8>> {
        self.signer.sign(tx).await
    }

    async fn sign_and_submit(&self, tx: &ChainTransaction) -> Result<String> {
        let signed = self.signer.sign(tx).await?;
        self.rpc.submit(&signed).await
    }
}

#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    /// Broadcasts a raw transaction (hex), returning its txid.
    async fn broadcast(&self, tx_hex: &str) -> Result<String>;

    async fn confirmations(&self, txid: &str) -> Result<u32>;
}

/// Signs the requested input indices of a PSBT in place.
pub trait PsbtSigner: Send + Sync {
    fn sign_psbt(&self, psbt: &mut bitcoin::Psbt, sign_inputs: &[usize]) -> Result<()>;
}
