//! Mock LP transport, chain backends and fixtures shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::{
    Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    absolute, transaction,
};

use btc_cross_swap::chain::{
    BitcoinRpc, ChainRpc, ChainSigner, ChainTransaction, EscrowStatus, PsbtSigner,
};
use btc_cross_swap::error::{Result, SwapError};
use btc_cross_swap::lp::{
    BtcWalletInfo, FundedPsbtReply, LpQuote, LpTransport, LpUpdate, QuoteReply, QuoteRequest,
    RawPsbtReply,
};
use btc_cross_swap::swap::store::SqliteStore;
use btc_cross_swap::swap::{BitcoinArtifacts, EscrowParams};
use btc_cross_swap::{
    AmountSpec, FeeBreakdown, FeeEntry, FeeKind, PriceInfo, Protocol, SwapDirection, SwapRecord,
    SwapState, Swapper, SwapperConfig, Token,
};

pub fn chain_token(ticker: &str) -> Token {
    Token::Chain {
        chain_id: "STARKNET".into(),
        address: format!("0x{ticker}"),
        ticker: ticker.into(),
        decimals: 18,
    }
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub fn fee_breakdown(swap: u64, network: u64) -> FeeBreakdown {
    FeeBreakdown {
        entries: vec![
            FeeEntry {
                kind: FeeKind::Swap,
                amount: swap,
            },
            FeeEntry {
                kind: FeeKind::NetworkOutput,
                amount: network,
            },
        ],
        total: swap + network,
    }
}

/// An accepted quote with sane defaults; tweak fields per test.
pub fn accepted_quote(protocol: Protocol, input: u64, output: u64) -> LpQuote {
    LpQuote {
        protocol,
        input_amount: input,
        output_amount: output,
        fees: fee_breakdown(30, 20),
        swap_price: 1.0,
        market_price: 1.0,
        quote_expiry: now_millis() + 120_000,
        escrow_timeout: None,
        security_deposit: 0,
        claimer_bounty: 0,
        min_btc_fee_rate: Some(2),
        invoice: None,
    }
}

/// Unsigned funding transaction paying `swap_value` into output 0, with a
/// witness UTXO attached so the PSBT can be extracted.
pub fn funding_psbt(swap_value: u64) -> Psbt {
    let tx = Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::all_zeros(), 7),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(swap_value),
            script_pubkey: ScriptBuf::new(),
        }],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).expect("unsigned tx");
    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: Amount::from_sat(swap_value + 200),
        script_pubkey: ScriptBuf::new(),
    });
    psbt
}

pub fn psbt_hex(psbt: &Psbt) -> String {
    hex::encode(psbt.serialize())
}

/// Fully populated swap record in the given state, for store and state
/// machine tests that bypass quote negotiation.
pub fn sample_record(
    direction: SwapDirection,
    protocol: Protocol,
    state: SwapState,
) -> SwapRecord {
    let (src_token, dst_token) = match direction {
        SwapDirection::BtcToChain => (Token::BtcOnchain, chain_token("STRK")),
        SwapDirection::LightningToChain => (Token::BtcLightning, chain_token("STRK")),
        SwapDirection::ChainToBtc => (chain_token("STRK"), Token::BtcOnchain),
        SwapDirection::ChainToLightning => (chain_token("STRK"), Token::BtcLightning),
    };
    let secret = [7u8; 32];
    SwapRecord {
        swap_id: "swap-test-1".into(),
        direction,
        protocol,
        src_token,
        dst_token,
        src_address: Some("0xalice".into()),
        dst_address: "0xbob".into(),
        amount_spec: AmountSpec::ExactIn(3_000),
        input_amount: 3_000,
        output_amount: 2_950,
        gas_drop: 0,
        fees: fee_breakdown(30, 20),
        price: PriceInfo::new(1.0, 1.0),
        quote_expiry: now_millis() + 120_000,
        escrow: Some(EscrowParams {
            hash_lock: btc_cross_swap::escrow::hash_lock(&secret),
            security_deposit: 100,
            claimer_bounty: 50,
            timeout: 1,
        }),
        min_btc_fee_rate: Some(2),
        secret_hex: Some(hex::encode(secret)),
        bitcoin: BitcoinArtifacts::default(),
        commit_txids: Vec::new(),
        output_txid: None,
        state,
    }
}

pub struct Harness {
    pub lp: Arc<MockLp>,
    pub btc: Arc<MockBitcoinRpc>,
    pub chain: Arc<MockChainRpc>,
    pub swapper: Swapper,
}

pub fn harness(cfg: SwapperConfig) -> anyhow::Result<Harness> {
    let lp = Arc::new(MockLp::default());
    let btc = Arc::new(MockBitcoinRpc::default());
    let chain = Arc::new(MockChainRpc::default());
    let store = Box::new(SqliteStore::open_in_memory()?);
    let swapper = Swapper::new(cfg, lp.clone(), btc.clone(), chain.clone(), store);
    Ok(Harness {
        lp,
        btc,
        chain,
        swapper,
    })
}

#[derive(Default)]
pub struct MockLp {
    pub replies: Mutex<VecDeque<QuoteReply>>,
    pub funded: Mutex<Option<FundedPsbtReply>>,
    pub raw: Mutex<Option<RawPsbtReply>>,
    pub updates: Mutex<VecDeque<LpUpdate>>,
    pub quote_calls: AtomicU32,
}

impl MockLp {
    pub fn with_reply(reply: QuoteReply) -> Self {
        let lp = Self::default();
        lp.replies.lock().unwrap().push_back(reply);
        lp
    }

    pub fn push_reply(&self, reply: QuoteReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_update(&self, update: LpUpdate) {
        self.updates.lock().unwrap().push_back(update);
    }
}

#[async_trait]
impl LpTransport for MockLp {
    async fn request_quote(&self, _request: &QuoteRequest) -> Result<QuoteReply> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SwapError::NetworkFailure("no scripted reply".into()))
    }

    async fn funded_psbt(&self, _swap_id: &str, _wallet: &BtcWalletInfo) -> Result<FundedPsbtReply> {
        self.funded
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SwapError::NetworkFailure("no funded psbt scripted".into()))
    }

    async fn raw_psbt(&self, _swap_id: &str) -> Result<RawPsbtReply> {
        self.raw
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SwapError::NetworkFailure("no raw psbt scripted".into()))
    }

    async fn next_update(&self) -> Result<Option<LpUpdate>> {
        Ok(self.updates.lock().unwrap().pop_front())
    }
}

#[derive(Default)]
pub struct MockBitcoinRpc {
    pub confs: Mutex<HashMap<String, u32>>,
    pub broadcasts: Mutex<Vec<String>>,
}

impl MockBitcoinRpc {
    pub fn set_confirmations(&self, txid: &str, confs: u32) {
        self.confs.lock().unwrap().insert(txid.into(), confs);
    }
}

#[async_trait]
impl BitcoinRpc for MockBitcoinRpc {
    async fn broadcast(&self, tx_hex: &str) -> Result<String> {
        let mut broadcasts = self.broadcasts.lock().unwrap();
        broadcasts.push(tx_hex.to_string());
        Ok(format!("btc-tx-{}", broadcasts.len()))
    }

    async fn confirmations(&self, txid: &str) -> Result<u32> {
        Ok(*self.confs.lock().unwrap().get(txid).unwrap_or(&0))
    }
}

pub struct MockChainRpc {
    pub statuses: Mutex<HashMap<String, EscrowStatus>>,
    pub confs: Mutex<HashMap<String, u32>>,
    pub submitted_raw: Mutex<Vec<Vec<u8>>>,
    /// Depth reported for txids with no explicit entry.
    pub default_confs: u32,
}

impl Default for MockChainRpc {
    fn default() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            confs: Mutex::new(HashMap::new()),
            submitted_raw: Mutex::new(Vec::new()),
            default_confs: 6,
        }
    }
}

impl MockChainRpc {
    pub fn set_status(&self, escrow_id: &str, status: EscrowStatus) {
        self.statuses.lock().unwrap().insert(escrow_id.into(), status);
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn submit(&self, signed: &[u8]) -> Result<String> {
        let mut raw = self.submitted_raw.lock().unwrap();
        raw.push(signed.to_vec());
        Ok(format!("chain-raw-tx-{}", raw.len()))
    }

    async fn confirmations(&self, txid: &str) -> Result<u32> {
        Ok(*self
            .confs
            .lock()
            .unwrap()
            .get(txid)
            .unwrap_or(&self.default_confs))
    }

    async fn escrow_status(&self, escrow_id: &str) -> Result<EscrowStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(escrow_id)
            .cloned()
            .unwrap_or(EscrowStatus::Open))
    }

    async fn block_reference(&self) -> Result<String> {
        Ok("blockref-1".into())
    }
}

#[derive(Default)]
pub struct MockSigner {
    pub address: String,
    pub submitted: Mutex<Vec<ChainTransaction>>,
    counter: AtomicU32,
}

impl MockSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Wallet-side PSBT signer that records which inputs it was asked to sign.
#[derive(Default)]
pub struct MockPsbtSigner {
    pub signed: Mutex<Vec<Vec<usize>>>,
}

impl PsbtSigner for MockPsbtSigner {
    fn sign_psbt(&self, _psbt: &mut Psbt, sign_inputs: &[usize]) -> Result<()> {
        self.signed.lock().unwrap().push(sign_inputs.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ChainSigner for MockSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign(&self, tx: &ChainTransaction) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(tx).expect("serialize chain tx"))
    }

    async fn sign_and_submit(&self, tx: &ChainTransaction) -> Result<String> {
        self.submitted.lock().unwrap().push(tx.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("chain-tx-{n}"))
    }
}
