mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use btc_cross_swap::chain::EscrowStatus;
use btc_cross_swap::lp::{LpUpdate, QuoteReply};
use btc_cross_swap::watch::{CancelToken, SettlementWatcher};
use btc_cross_swap::{AmountSpec, Protocol, SwapError, SwapState, SwapperConfig, Token};
use support::{
    MockChainRpc, MockSigner, accepted_quote, chain_token, funding_psbt, harness, Harness,
};

/// Drives a current-protocol BTC-to-chain swap up to `SrcConfirmed`.
async fn confirmed_btc_swap(h: &Harness) -> anyhow::Result<String> {
    h.lp.push_reply(QuoteReply::Accepted(accepted_quote(Protocol::Spv, 3_000, 2_950)));
    let record = h
        .swapper
        .quote(
            Token::BtcOnchain,
            chain_token("STRK"),
            AmountSpec::ExactIn(3_000),
            None,
            "0xbob".into(),
            0,
        )
        .await?;
    let swap_id = record.swap_id;

    let txid = h.swapper.submit_psbt(&swap_id, funding_psbt(3_000), 0).await?;
    h.btc.set_confirmations(&txid, 1);
    h.swapper.wait_for_bitcoin_confirmation(&swap_id, None).await?;
    Ok(swap_id)
}

#[tokio::test(start_paused = true)]
async fn watchtower_claim_settles_the_swap_automatically() -> anyhow::Result<()> {
    let h = harness(SwapperConfig::default())?;
    let swap_id = confirmed_btc_swap(&h).await?;

    h.chain.set_status(
        &swap_id,
        EscrowStatus::Claimed {
            txid: "watchtower-tx".into(),
            secret_hex: "00".repeat(32),
        },
    );

    let settled = h
        .swapper
        .settle(&swap_id, Duration::from_secs(60), None)
        .await?;
    assert!(settled);

    let record = h.swapper.get_swap(&swap_id)?.unwrap();
    assert_eq!(record.state, SwapState::Claimed);
    assert_eq!(record.output_txid.as_deref(), Some("watchtower-tx"));

    // Idempotent once settled.
    assert!(h.swapper.settle(&swap_id, Duration::from_secs(60), None).await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn elapsed_window_hands_the_claim_to_the_caller() -> anyhow::Result<()> {
    let h = harness(SwapperConfig::default())?;
    let swap_id = confirmed_btc_swap(&h).await?;

    let settled = h
        .swapper
        .settle(&swap_id, Duration::from_secs(30), None)
        .await?;
    assert!(!settled);
    assert_eq!(
        h.swapper.get_swap(&swap_id)?.unwrap().state,
        SwapState::ManualClaimPending
    );

    let signer = MockSigner::new("0xbob");
    let claim_txid = h.swapper.claim(&swap_id, &signer, false, None).await?;

    let record = h.swapper.get_swap(&swap_id)?.unwrap();
    assert_eq!(record.state, SwapState::Claimed);
    assert_eq!(record.output_txid, Some(claim_txid));

    // A second claim finds the swap already terminal.
    assert!(h.swapper.claim(&swap_id, &signer, false, None).await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn push_notification_short_circuits_the_poll_loop() -> anyhow::Result<()> {
    let h = Arc::new(harness(SwapperConfig::default())?);
    let swap_id = confirmed_btc_swap(&h).await?;

    let settle = tokio::spawn({
        let h = h.clone();
        let swap_id = swap_id.clone();
        async move { h.swapper.settle(&swap_id, Duration::from_secs(3_600), None).await }
    });
    tokio::task::yield_now().await;

    h.chain.set_status(
        &swap_id,
        EscrowStatus::Claimed {
            txid: "watchtower-tx".into(),
            secret_hex: "00".repeat(32),
        },
    );
    h.swapper
        .process_update(LpUpdate::SettlementLanded {
            swap_id: swap_id.clone(),
            txid: "watchtower-tx".into(),
        })
        .await?;

    assert!(settle.await??);
    assert_eq!(
        h.swapper.get_swap(&swap_id)?.unwrap().state,
        SwapState::Claimed
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn claim_racing_a_landed_settlement_fails_benignly() -> anyhow::Result<()> {
    let h = harness(SwapperConfig::default())?;
    let swap_id = confirmed_btc_swap(&h).await?;

    h.chain.set_status(
        &swap_id,
        EscrowStatus::Claimed {
            txid: "watchtower-tx".into(),
            secret_hex: "00".repeat(32),
        },
    );

    let signer = MockSigner::new("0xbob");
    let err = h.swapper.claim(&swap_id, &signer, false, None).await.unwrap_err();
    assert!(matches!(err, SwapError::OnChainRejection(_)));
    assert!(signer.submitted.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_cancel_deadline_aborts_without_touching_state() -> anyhow::Result<()> {
    let h = harness(SwapperConfig::default())?;
    let swap_id = confirmed_btc_swap(&h).await?;

    let cancel = CancelToken::with_deadline(Instant::now() - Duration::from_secs(1));
    let err = h
        .swapper
        .settle(&swap_id, Duration::from_secs(60), Some(&cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::Cancelled));
    assert_eq!(
        h.swapper.get_swap(&swap_id)?.unwrap().state,
        SwapState::SrcConfirmed
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn explicit_cancellation_interrupts_a_running_wait() -> anyhow::Result<()> {
    let rpc = Arc::new(MockChainRpc::default());
    let watcher = SettlementWatcher::new(Duration::from_secs(1));
    let cancel = CancelToken::new();

    let wait = tokio::spawn({
        let rpc = rpc.clone();
        let cancel = cancel.clone();
        async move {
            watcher
                .wait_settled(
                    rpc.as_ref(),
                    "swap-test-1",
                    Duration::from_secs(3_600),
                    None,
                    Some(&cancel),
                )
                .await
        }
    });
    tokio::task::yield_now().await;

    cancel.cancel();
    assert!(cancel.is_cancelled());
    assert!(matches!(wait.await?, Err(SwapError::Cancelled)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refund_landing_during_the_watch_surfaces_as_rejection() -> anyhow::Result<()> {
    let rpc = MockChainRpc::default();
    rpc.set_status(
        "swap-test-1",
        EscrowStatus::Refunded {
            txid: "refund-tx".into(),
        },
    );
    let watcher = SettlementWatcher::new(Duration::from_secs(1));

    let err = watcher
        .wait_settled(&rpc, "swap-test-1", Duration::from_secs(60), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::OnChainRejection(_)));
    Ok(())
}
