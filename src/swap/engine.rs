//! The swapper context: quote negotiation and per-swap orchestration.
//!
//! One `Swapper` is constructed at startup and passed by reference to
//! everything that needs it. Each swap id is exclusively owned by one update
//! path at a time (per-id async locks); cross-swap operations run freely in
//! parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;

use crate::btc::psbt::{
    FundedPsbt, RawPsbt, extract_tx_hex, parse_psbt_hex, psbt_to_hex, verify_funding_value,
};
use crate::chain::{BitcoinRpc, ChainRpc, ChainSigner, PsbtSigner};
use crate::error::{Result, SwapError};
use crate::lp::{BtcWalletInfo, LpTransport, LpUpdate, QuoteReply, QuoteRequest};
use crate::quote::{AmountBounds, BoundsCache, SwapBounds, build_record, needs_hash_lock, verify_quote};
use crate::swap::{AmountSpec, SwapDirection, SwapRecord, SwapState, Token};
use crate::watch::{CancelToken, SettlementWatcher, check_cancel};
use crate::{escrow, swap::state};

pub type StateObserver = Box<dyn Fn(&SwapRecord) + Send + Sync>;
pub type BoundsObserver = Box<dyn Fn(&Token, &Token, SwapBounds) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SwapperConfig {
    /// Maximum allowed difference between swap and market price, ppm.
    pub max_price_difference_ppm: i64,
    /// Confirmation depth required of source/commit transactions.
    pub required_confirmations: u32,
    /// Poll cadence for confirmation and payment waits.
    pub poll_interval: Duration,
    /// Poll cadence of the settlement watcher.
    pub settlement_poll_interval: Duration,
    /// Approximate BTC-denominated swap limits used before the LP reports
    /// exact per-pair bounds.
    pub default_btc_bounds: AmountBounds,
    /// Bounded retries for LP negotiation round-trips.
    pub network_retries: u32,
}

impl Default for SwapperConfig {
    fn default() -> Self {
        Self {
            max_price_difference_ppm: 20_000,
            required_confirmations: 1,
            poll_interval: Duration::from_millis(500),
            settlement_poll_interval: Duration::from_secs(1),
            default_btc_bounds: AmountBounds {
                min: Some(1_000),
                max: Some(100_000_000),
            },
            network_retries: 3,
        }
    }
}

#[derive(Default)]
struct SwapEvents {
    state: Mutex<Vec<StateObserver>>,
    bounds: Mutex<Vec<BoundsObserver>>,
}

/// Cross-chain swap orchestrator.
pub struct Swapper {
    cfg: SwapperConfig,
    lp: Arc<dyn LpTransport>,
    btc_rpc: Arc<dyn BitcoinRpc>,
    chain_rpc: Arc<dyn ChainRpc>,
    store: Mutex<Box<dyn crate::swap::store::SwapStore>>,
    bounds: BoundsCache,
    events: SwapEvents,
    watcher: SettlementWatcher,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    settle_signals: Mutex<HashMap<String, Arc<Notify>>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn now_secs() -> u64 {
    now_millis() / 1000
}

impl Swapper {
    pub fn new(
        cfg: SwapperConfig,
        lp: Arc<dyn LpTransport>,
        btc_rpc: Arc<dyn BitcoinRpc>,
        chain_rpc: Arc<dyn ChainRpc>,
        store: Box<dyn crate::swap::store::SwapStore>,
    ) -> Self {
        let bounds = BoundsCache::new(cfg.default_btc_bounds);
        let watcher = SettlementWatcher::new(cfg.settlement_poll_interval);
        Self {
            cfg,
            lp,
            btc_rpc,
            chain_rpc,
            store: Mutex::new(store),
            bounds,
            events: SwapEvents::default(),
            watcher,
            locks: Mutex::new(HashMap::new()),
            settle_signals: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an observer for swap state changes.
    pub fn on_state_change(&self, observer: StateObserver) {
        self.events
            .state
            .lock()
            .expect("state observers mutex poisoned")
            .push(observer);
    }

    /// Registers an observer for swap bounds changes.
    pub fn on_bounds_change(&self, observer: BoundsObserver) {
        self.events
            .bounds
            .lock()
            .expect("bounds observers mutex poisoned")
            .push(observer);
    }

    fn emit_state(&self, record: &SwapRecord) {
        for observer in self
            .events
            .state
            .lock()
            .expect("state observers mutex poisoned")
            .iter()
        {
            observer(record);
        }
    }

    fn emit_bounds(&self, src: &Token, dst: &Token, bounds: SwapBounds) {
        for observer in self
            .events
            .bounds
            .lock()
            .expect("bounds observers mutex poisoned")
            .iter()
        {
            observer(src, dst, bounds);
        }
    }

    /// Currently known swap limits for a pair; approximate (BTC-denominated
    /// side only) until the LP has rejected a request for it.
    pub fn swap_limits(&self, src: &Token, dst: &Token) -> SwapBounds {
        self.bounds.get(src, dst)
    }

    async fn lock_swap(&self, swap_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("swap locks mutex poisoned");
            locks
                .entry(swap_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn settle_signal(&self, swap_id: &str) -> Arc<Notify> {
        let mut signals = self
            .settle_signals
            .lock()
            .expect("settle signals mutex poisoned");
        signals
            .entry(swap_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn load(&self, swap_id: &str) -> Result<SwapRecord> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .get(swap_id)?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))
    }

    /// Advances state, persists and notifies observers. Caller holds the
    /// per-id lock.
    fn persist_state(&self, record: &mut SwapRecord, to: SwapState) -> Result<()> {
        state::advance(record, to)?;
        self.store
            .lock()
            .expect("store mutex poisoned")
            .update(record)?;
        self.emit_state(record);
        Ok(())
    }

    fn persist(&self, record: &SwapRecord) -> Result<()> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .update(record)
    }

    /// Expires a quote that never moved funds. Returns true if it did.
    fn expire_if_due(&self, record: &mut SwapRecord) -> Result<bool> {
        if matches!(record.state, SwapState::Created | SwapState::Committed)
            && record.quote_expired(now_millis())
        {
            self.persist_state(record, SwapState::Expired)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Negotiates a quote with the LP and freezes it into a swap record.
    /// No funds move here.
    pub async fn quote(
        &self,
        src_token: Token,
        dst_token: Token,
        amount: AmountSpec,
        src_address: Option<String>,
        dst_address: String,
        gas_drop: u64,
    ) -> Result<SwapRecord> {
        if amount.amount() == 0 {
            return Err(SwapError::InvalidAmount("amount must be > 0".into()));
        }
        let direction = SwapDirection::infer(&src_token, &dst_token)?;
        self.bounds.precheck(&src_token, &dst_token, amount)?;

        let (secret_hex, hash_lock) = escrow::generate_secret();
        let request = QuoteRequest {
            src_token: src_token.clone(),
            dst_token: dst_token.clone(),
            amount,
            src_address,
            dst_address,
            gas_drop,
            hash_lock: Some(hash_lock),
        };

        let reply = self.request_quote_with_retries(&request).await?;
        let lp_quote = match reply {
            QuoteReply::Rejected { min, max } => {
                let bounds = self.bounds.refine(&src_token, &dst_token, amount, min, max);
                tracing::info!(
                    src = src_token.ticker(),
                    dst = dst_token.ticker(),
                    ?min,
                    ?max,
                    "LP rejected amount, bounds refined"
                );
                self.emit_bounds(&src_token, &dst_token, bounds);
                return Err(SwapError::OutOfBounds { min, max });
            }
            QuoteReply::Accepted(q) => q,
        };

        let price = verify_quote(
            &request,
            &lp_quote,
            self.cfg.max_price_difference_ppm,
            now_millis(),
        )?;

        let secret = needs_hash_lock(direction, lp_quote.protocol).then_some(secret_hex);
        let record = build_record(&request, &lp_quote, price, direction, secret)?;

        self.store
            .lock()
            .expect("store mutex poisoned")
            .insert(&record)?;
        tracing::info!(
            swap_id = %record.swap_id,
            ?direction,
            input = record.input_amount,
            output = record.output_amount,
            "quote accepted"
        );
        self.emit_state(&record);
        Ok(record)
    }

    async fn request_quote_with_retries(&self, request: &QuoteRequest) -> Result<QuoteReply> {
        let mut backoff = Duration::from_millis(250);
        let mut attempt = 0;
        loop {
            match self.lp.request_quote(request).await {
                Err(SwapError::NetworkFailure(err)) if attempt < self.cfg.network_retries => {
                    attempt += 1;
                    tracing::warn!(%err, attempt, "LP unreachable, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }

    pub fn get_swap(&self, swap_id: &str) -> Result<Option<SwapRecord>> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .get(swap_id)
    }

    /// Past swaps the given destination address can still claim manually.
    pub fn claimable_swaps(&self, address: &str) -> Result<Vec<SwapRecord>> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .claimable_by(address)
    }

    /// Past swaps the given committer address can refund.
    pub fn refundable_swaps(&self, address: &str) -> Result<Vec<SwapRecord>> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .refundable_by(address, now_secs())
    }

    /// Applies an LP/watchtower push notification.
    pub async fn process_update(&self, update: LpUpdate) -> Result<()> {
        match update {
            LpUpdate::BoundsChanged {
                src_token,
                dst_token,
                min,
                max,
            } => {
                let side = if src_token.is_bitcoin() {
                    AmountSpec::ExactIn(0)
                } else {
                    AmountSpec::ExactOut(0)
                };
                let bounds =
                    self.bounds
                        .refine(&src_token, &dst_token, side, Some(min), Some(max));
                self.emit_bounds(&src_token, &dst_token, bounds);
            }
            LpUpdate::InvoicePaid { swap_id } => {
                let _guard = self.lock_swap(&swap_id).await;
                let mut record = self.load(&swap_id)?;
                if record.state == SwapState::Created {
                    self.persist_state(&mut record, SwapState::Paid)?;
                }
            }
            LpUpdate::PaymentSent { swap_id, btc_txid } => {
                let _guard = self.lock_swap(&swap_id).await;
                let mut record = self.load(&swap_id)?;
                if record.state == SwapState::Committed {
                    record.output_txid = Some(btc_txid);
                    self.persist_state(&mut record, SwapState::PaymentSent)?;
                }
            }
            LpUpdate::SettlementLanded { swap_id, txid } => {
                {
                    let _guard = self.lock_swap(&swap_id).await;
                    let mut record = self.load(&swap_id)?;
                    if !record.state.is_terminal() {
                        record.output_txid = Some(txid);
                        self.persist_state(&mut record, SwapState::Claimed)?;
                    }
                }
                self.settle_signal(&swap_id).notify_waiters();
            }
            LpUpdate::SwapStateChanged { swap_id, state } => {
                tracing::debug!(%swap_id, ?state, "LP state notification");
            }
        }
        Ok(())
    }

    /// Drains pending LP push notifications into [`Self::process_update`].
    /// Returns the number of updates applied.
    pub async fn process_pending_updates(&self) -> Result<u32> {
        let mut applied = 0;
        while let Some(update) = self.lp.next_update().await? {
            self.process_update(update).await?;
            applied += 1;
        }
        Ok(applied)
    }

    // --- bitcoin funding -------------------------------------------------

    /// Fetches the LP-funded PSBT (inputs pre-added), verifies the funding
    /// invariant and records the artifact.
    pub async fn funded_psbt(&self, swap_id: &str, wallet: &BtcWalletInfo) -> Result<FundedPsbt> {
        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;
        self.check_fundable(&mut record)?;

        let reply = self.lp.funded_psbt(swap_id, wallet).await?;
        let funded = FundedPsbt::from_reply(&reply)?;
        verify_funding_value(&funded.psbt, funded.swap_vout, record.input_amount)?;

        record.bitcoin.psbt_hex = Some(psbt_to_hex(&funded.psbt));
        self.persist(&record)?;
        Ok(funded)
    }

    /// Fetches the raw skeleton PSBT; the caller appends funding inputs and
    /// must preserve the designated input-1 sequence.
    pub async fn raw_psbt(&self, swap_id: &str) -> Result<RawPsbt> {
        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;
        self.check_fundable(&mut record)?;

        let reply = self.lp.raw_psbt(swap_id).await?;
        let raw = RawPsbt::from_reply(&reply)?;
        verify_funding_value(&raw.psbt, raw.swap_vout, record.input_amount)?;

        record.bitcoin.psbt_hex = Some(psbt_to_hex(&raw.psbt));
        record.bitcoin.in1_sequence = Some(reply.in1_sequence);
        self.persist(&record)?;
        Ok(raw)
    }

    /// Funded-mode shortcut: fetches the LP-funded PSBT, signs the
    /// designated inputs with the wallet signer and broadcasts.
    pub async fn fund_with_wallet(
        &self,
        swap_id: &str,
        wallet: &BtcWalletInfo,
        signer: &dyn PsbtSigner,
    ) -> Result<String> {
        let mut funded = self.funded_psbt(swap_id, wallet).await?;
        signer.sign_psbt(&mut funded.psbt, &funded.sign_inputs)?;
        self.submit_psbt(swap_id, funded.psbt, funded.swap_vout).await
    }

    fn check_fundable(&self, record: &mut SwapRecord) -> Result<()> {
        if record.src_token != Token::BtcOnchain {
            return Err(SwapError::InvalidState(
                "swap is not funded with on-chain bitcoin".into(),
            ));
        }
        if self.expire_if_due(record)? {
            return Err(SwapError::QuoteExpired);
        }
        let fundable = match record.protocol {
            crate::swap::Protocol::Spv => record.state == SwapState::Created,
            crate::swap::Protocol::Legacy => record.state == SwapState::Committed,
        };
        if !fundable {
            return Err(SwapError::InvalidState(format!(
                "swap not ready for funding in state {:?}",
                record.state
            )));
        }
        Ok(())
    }

    /// Verifies and broadcasts the signed funding PSBT. The transferred
    /// value must equal the quoted input exactly; the designated sequence of
    /// a raw-mode PSBT is re-checked here as a last gate before broadcast.
    pub async fn submit_psbt(
        &self,
        swap_id: &str,
        psbt: bitcoin::Psbt,
        swap_vout: u32,
    ) -> Result<String> {
        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;
        self.check_fundable(&mut record)?;

        verify_funding_value(&psbt, swap_vout, record.input_amount)?;
        if let Some(seq) = record.bitcoin.in1_sequence {
            let raw = RawPsbt {
                psbt: psbt.clone(),
                in1_sequence: bitcoin::Sequence(seq),
                swap_vout,
            };
            raw.verify_in1_sequence()?;
        }

        let (_tx, tx_hex) = extract_tx_hex(psbt)?;
        let txid = self.btc_rpc.broadcast(&tx_hex).await?;
        tracing::info!(swap_id, %txid, "bitcoin funding transaction broadcast");

        record.bitcoin.funding_txid = Some(txid.clone());
        self.persist_state(&mut record, SwapState::Funded)?;
        Ok(txid)
    }

    /// Waits for the bitcoin funding transaction to reach the required
    /// confirmation depth, then marks the source side confirmed.
    pub async fn wait_for_bitcoin_confirmation(
        &self,
        swap_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<u32> {
        let txid = {
            let record = self.load(swap_id)?;
            record.bitcoin.funding_txid.clone().ok_or_else(|| {
                SwapError::InvalidState("swap has no bitcoin transaction to wait for".into())
            })?
        };

        loop {
            check_cancel(cancel)?;
            let confs = self.btc_rpc.confirmations(&txid).await?;
            if confs >= self.cfg.required_confirmations {
                let _guard = self.lock_swap(swap_id).await;
                let mut record = self.load(swap_id)?;
                if record.state == SwapState::Funded {
                    self.persist_state(&mut record, SwapState::SrcConfirmed)?;
                }
                return Ok(confs);
            }
            self.sleep_or_cancel(self.cfg.poll_interval, cancel).await?;
        }
    }

    /// Waits for the LP to confirm receipt of the lightning payment.
    /// Resolves `Ok(false)` if the invoice expires unpaid (the swap is then
    /// `Expired`); cancellation aborts without touching state.
    pub async fn wait_for_payment(
        &self,
        swap_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<bool> {
        loop {
            check_cancel(cancel)?;
            {
                let _guard = self.lock_swap(swap_id).await;
                let mut record = self.load(swap_id)?;
                match record.state {
                    SwapState::Created => {
                        if self.expire_if_due(&mut record)? {
                            return Ok(false);
                        }
                    }
                    SwapState::Expired => return Ok(false),
                    _ => return Ok(true),
                }
            }
            self.sleep_or_cancel(self.cfg.poll_interval, cancel).await?;
        }
    }

    async fn sleep_or_cancel(
        &self,
        duration: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = async {
                match cancel {
                    Some(c) => c.cancelled().await,
                    None => std::future::pending().await,
                }
            } => Err(SwapError::Cancelled),
        }
    }

    // --- escrow lifecycle ------------------------------------------------

    /// Executes an ordered transaction plan: each step is signed, submitted
    /// and confirmed to the required depth before the next one goes out.
    async fn execute_plan(
        &self,
        plan: escrow::TransactionPlan,
        signer: &dyn ChainSigner,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<String>> {
        let mut txids = Vec::with_capacity(plan.steps.len());
        let last = plan.steps.len().saturating_sub(1);
        for (i, step) in plan.steps.into_iter().enumerate() {
            check_cancel(cancel)?;
            let txid = signer.sign_and_submit(&step).await?;
            tracing::info!(%txid, step = i, "chain transaction submitted");
            if i < last {
                // Later steps depend on this one; wait out its confirmation.
                loop {
                    check_cancel(cancel)?;
                    if self.chain_rpc.confirmations(&txid).await?
                        >= self.cfg.required_confirmations
                    {
                        break;
                    }
                    self.sleep_or_cancel(self.cfg.poll_interval, cancel).await?;
                }
            }
            txids.push(txid);
        }
        Ok(txids)
    }

    /// Opens the destination-chain escrow (legacy bitcoin-sourced flows and
    /// all chain-sourced flows).
    pub async fn commit(
        &self,
        swap_id: &str,
        signer: &dyn ChainSigner,
        needs_account_deploy: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<String>> {
        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;

        if record.state != SwapState::Created {
            return Err(SwapError::InvalidState(format!(
                "cannot commit from state {:?}",
                record.state
            )));
        }
        if self.expire_if_due(&mut record)? {
            return Err(SwapError::QuoteExpired);
        }

        let block_ref = self.chain_rpc.block_reference().await?;
        let plan = escrow::commit_plan(&record, &block_ref, needs_account_deploy)?;
        let txids = self.execute_plan(plan, signer, cancel).await?;

        record.commit_txids = txids.clone();
        self.persist_state(&mut record, SwapState::Committed)?;
        Ok(txids)
    }

    /// Races automatic watchtower settlement against the manual-claim
    /// window. Returns whether the swap settled automatically; on `false`
    /// the caller decides whether to claim (bitcoin-sourced flows) or wait
    /// for the escrow timeout and refund (chain-sourced flows).
    pub async fn settle(
        &self,
        swap_id: &str,
        window: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<bool> {
        if self.load(swap_id)?.state == SwapState::Claimed {
            return Ok(true);
        }

        let push = self.settle_signal(swap_id);
        let outcome = self
            .watcher
            .wait_settled(
                self.chain_rpc.as_ref(),
                swap_id,
                window,
                Some(push.as_ref()),
                cancel,
            )
            .await?;

        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;
        match outcome {
            Some(txid) => {
                if record.state != SwapState::Claimed && !record.state.is_terminal() {
                    record.output_txid = Some(txid);
                    self.persist_state(&mut record, SwapState::Claimed)?;
                }
                Ok(true)
            }
            None => {
                if record.state == SwapState::Claimed {
                    return Ok(true);
                }
                if !record.direction.to_bitcoin()
                    && matches!(record.state, SwapState::SrcConfirmed | SwapState::Paid)
                {
                    self.persist_state(&mut record, SwapState::ManualClaimPending)?;
                }
                Ok(false)
            }
        }
    }

    /// Manually claims the destination funds. Re-checks the escrow status
    /// first: a claim that already landed (watchtower won the race) surfaces
    /// as a clean [`SwapError::OnChainRejection`].
    pub async fn claim(
        &self,
        swap_id: &str,
        signer: &dyn ChainSigner,
        needs_account_deploy: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<String> {
        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;

        if record.direction.to_bitcoin() {
            return Err(SwapError::InvalidState(
                "chain-sourced swaps are settled by the LP claim; use refund to recover".into(),
            ));
        }
        if !matches!(
            record.state,
            SwapState::SrcConfirmed | SwapState::Paid | SwapState::ManualClaimPending
        ) {
            return Err(SwapError::InvalidState(format!(
                "cannot claim from state {:?}",
                record.state
            )));
        }

        let status = self.chain_rpc.escrow_status(swap_id).await?;
        escrow::ensure_claimable(&status)?;

        let block_ref = self.chain_rpc.block_reference().await?;
        let plan = match (&record.escrow, &record.secret_hex) {
            (Some(_), Some(secret)) => {
                escrow::claim_plan(&record, secret, &block_ref, needs_account_deploy)?
            }
            _ => escrow::spv_claim_plan(&record, &block_ref, needs_account_deploy)?,
        };
        let txids = self.execute_plan(plan, signer, cancel).await?;
        let claim_txid = txids
            .last()
            .cloned()
            .ok_or_else(|| SwapError::InvalidState("empty claim plan".into()))?;

        record.output_txid = Some(claim_txid.clone());
        self.persist_state(&mut record, SwapState::Claimed)?;
        Ok(claim_txid)
    }

    /// Refunds a chain-sourced swap after the escrow timeout. Idempotent:
    /// a second attempt, or one racing a landed claim, fails with a clean
    /// [`SwapError::OnChainRejection`].
    pub async fn refund(
        &self,
        swap_id: &str,
        signer: &dyn ChainSigner,
        cancel: Option<&CancelToken>,
    ) -> Result<String> {
        let _guard = self.lock_swap(swap_id).await;
        let mut record = self.load(swap_id)?;

        if !record.direction.to_bitcoin() {
            return Err(SwapError::InvalidState(
                "refund only applies to chain-sourced swaps".into(),
            ));
        }
        if !matches!(
            record.state,
            SwapState::Committed | SwapState::PaymentSent
        ) {
            return Err(SwapError::InvalidState(format!(
                "cannot refund from state {:?}",
                record.state
            )));
        }

        let status = self.chain_rpc.escrow_status(swap_id).await?;
        escrow::ensure_refundable(&status)?;

        let block_ref = self.chain_rpc.block_reference().await?;
        let plan = escrow::refund_plan(&record, &signer.address(), now_secs(), &block_ref)?;
        let txids = self.execute_plan(plan, signer, cancel).await?;
        let refund_txid = txids
            .last()
            .cloned()
            .ok_or_else(|| SwapError::InvalidState("empty refund plan".into()))?;

        self.persist_state(&mut record, SwapState::Refunded)?;
        Ok(refund_txid)
    }

    /// Loads a previously persisted PSBT artifact.
    pub fn stored_psbt(&self, swap_id: &str) -> Result<Option<bitcoin::Psbt>> {
        let record = self.load(swap_id)?;
        record
            .bitcoin
            .psbt_hex
            .as_deref()
            .map(parse_psbt_hex)
            .transpose()
    }
}
