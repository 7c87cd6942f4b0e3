//! Integration Tests: Channel Manager
//!
//! - Concurrent sends never share a channel
//! - Channels come back FREE on success, failure and drop
//! - Underfunded channels are topped up and the send retried
//! - A busy pool fails with ChannelsBusy after the timeout

use super::mock_ledger::tx_failed;
use super::{seeds, Harness};
use kin_sdk::error::tx_codes;
use kin_sdk::{
    Asset, ChannelManager, ChannelOptions, ChannelStatus, GatewayError, Keypair, KinError,
    TransactionBuilder,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn manager(h: &Harness, base: &Keypair, channels: &[Keypair], options: ChannelOptions) -> ChannelManager {
    ChannelManager::new(
        &h.environment,
        h.gateway(),
        base.clone(),
        &seeds(channels),
        100,
        options,
    )
    .expect("channel manager")
}

fn pay<'a>(
    destination: &'a str,
    amount: &'a str,
) -> impl FnOnce(&mut TransactionBuilder, Option<&str>) -> kin_sdk::Result<()> + Send + 'a {
    move |builder, source| {
        builder.append_payment_op(destination, amount, Asset::Native, source)?;
        Ok(())
    }
}

/// Test: Many concurrent sends over a small pool all land, none collide
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_are_exclusive() {
    let h = Harness::new();
    let base = h.funded(1_000);
    let channels = h.channels(3, 10);
    let dest = h.funded(1);
    let manager = Arc::new(manager(&h, &base, &channels, ChannelOptions::default()));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let manager = manager.clone();
        let dest = dest.public_address().to_string();
        tasks.push(tokio::spawn(async move {
            manager
                .send_transaction(
                    move |b, source| {
                        b.append_payment_op(&dest, "1", Asset::Native, source)?;
                        Ok(())
                    },
                    100,
                    None,
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("send should succeed");
    }

    // A shared channel would have produced a bad sequence somewhere
    assert_eq!(h.ledger.submissions().len(), 12);
    assert_eq!(h.ledger.accepted().len(), 12);
    assert_eq!(h.ledger.balance_kin(dest.public_address()), 13.0);
    assert_eq!(manager.pool().free_count(), 3);
}

/// Test: Delegated channels pay the fee, the base account owns the operation
#[tokio::test]
async fn test_channel_delegation() {
    let h = Harness::new();
    let base = h.funded(100);
    let channels = h.channels(1, 10);
    let dest = h.funded(1);
    let m = manager(&h, &base, &channels, ChannelOptions::default());

    m.send_transaction(pay(dest.public_address(), "5"), 100, Some("1-test-x"))
        .await
        .unwrap();

    let submissions = h.ledger.submissions();
    let envelope = &submissions[0];
    assert_eq!(envelope.tx.source_account, channels[0].public_address());
    assert_eq!(
        envelope.tx.operations[0].source_account.as_deref(),
        Some(base.public_address())
    );
    assert_eq!(envelope.signatures.len(), 2);
    assert_eq!(h.ledger.balance_kin(base.public_address()), 95.0);

    // With no channels the base account is its own channel
    let solo = manager(&h, &base, &[], ChannelOptions::default());
    solo.send_transaction(pay(dest.public_address(), "1"), 100, None)
        .await
        .unwrap();
    let submissions = h.ledger.submissions();
    let envelope = &submissions[1];
    assert_eq!(envelope.tx.source_account, base.public_address());
    assert_eq!(envelope.tx.operations[0].source_account, None);
    assert_eq!(envelope.signatures.len(), 1);
}

/// Test: An empty channel is topped up and the same envelope resubmitted
#[tokio::test]
async fn test_top_up_is_transparent() {
    let h = Harness::new();
    let base = h.funded(100);
    let channel = Keypair::random();
    h.ledger.fund_stroops(channel.public_address(), 0);
    let dest = h.funded(1);
    let m = manager(&h, &base, &[channel.clone()], ChannelOptions::default());

    let response = m
        .send_transaction(pay(dest.public_address(), "1"), 100, None)
        .await
        .expect("send succeeds after top-up");

    let submissions = h.ledger.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[0], submissions[2]);
    // The top-up comes from the base account
    assert_eq!(submissions[1].tx.source_account, base.public_address());

    // Topped up with 1000 fees, one of them spent
    let channel_state = h.ledger.account_state(channel.public_address()).unwrap();
    assert_eq!(channel_state.balance, 100 * 1000 - 100);
    assert_eq!(m.pool().status_of(0), Some(ChannelStatus::Free));
    assert_eq!(h.ledger.accepted().last().unwrap().hash, response.hash);
}

/// Test: Top-ups are bounded
#[tokio::test]
async fn test_top_up_gives_up() {
    let h = Harness::new();
    let base = h.funded(100);
    let channels = h.channels(1, 10);
    let dest = h.funded(1);
    let m = manager(&h, &base, &channels, ChannelOptions::default());

    let address = channels[0].public_address();
    h.ledger
        .fail_next(address, tx_failed(tx_codes::INSUFFICIENT_BALANCE, &[]));
    h.ledger
        .fail_next(address, tx_failed(tx_codes::INSUFFICIENT_BALANCE, &[]));

    let err = m
        .send_transaction(pay(dest.public_address(), "1"), 100, None)
        .await
        .unwrap_err();

    assert_eq!(err, KinError::LowBalance("tx_insufficient_balance".to_string()));
    // send, top-up, resend
    assert_eq!(h.ledger.submissions().len(), 3);
    assert_eq!(m.pool().free_count(), 1);
}

/// Test: The base account can't top itself up
#[tokio::test]
async fn test_base_channel_low_balance() {
    let h = Harness::new();
    let base = Keypair::random();
    h.ledger.fund_stroops(base.public_address(), 50);
    let dest = h.funded(1);
    let m = manager(&h, &base, &[], ChannelOptions::default());

    let err = m
        .send_transaction(pay(dest.public_address(), "0.000001"), 100, None)
        .await
        .unwrap_err();

    assert!(matches!(err, KinError::LowBalance(_)));
    assert_eq!(h.ledger.submissions().len(), 1);
    assert_eq!(m.pool().free_count(), 1);
}

/// Test: Other failures surface once, untouched, and free the channel
#[tokio::test]
async fn test_failures_release_channel() {
    let h = Harness::new();
    let base = h.funded(100);
    let channels = h.channels(2, 10);
    let m = manager(&h, &base, &channels, ChannelOptions::default());

    // Destination doesn't exist
    let nowhere = Keypair::random();
    let err = m
        .send_transaction(pay(nowhere.public_address(), "1"), 100, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KinError::AccountNotFound { ref code, .. }
        if code.as_deref() == Some("op_no_destination")));

    // Base account short of funds: op_underfunded is not a top-up case
    let dest = h.funded(1);
    let err = m
        .send_transaction(pay(dest.public_address(), "1000"), 100, None)
        .await
        .unwrap_err();
    assert_eq!(err, KinError::LowBalance("op_underfunded".to_string()));

    // Transport failure, never retried
    h.ledger.set_offline(true);
    let before = h.ledger.submissions().len();
    let err = m
        .send_transaction(pay(dest.public_address(), "1"), 100, None)
        .await;
    h.ledger.set_offline(false);
    assert!(err.is_err());
    assert_eq!(h.ledger.submissions().len(), before);

    // Attach errors release too
    let err = m
        .send_transaction(pay("not-an-address", "1"), 100, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KinError::InvalidAddress(_)));

    assert_eq!(m.pool().free_count(), 2);
}

/// Test: Server errors are translated and not retried
#[tokio::test]
async fn test_server_error_not_retried() {
    let h = Harness::new();
    let base = h.funded(100);
    let dest = h.funded(1);
    let m = manager(&h, &base, &[], ChannelOptions::default());

    h.ledger.fail_next(
        base.public_address(),
        GatewayError::UnexpectedStatus {
            status: 503,
            body: "over capacity".to_string(),
        },
    );
    let err = m
        .send_transaction(pay(dest.public_address(), "1"), 100, None)
        .await
        .unwrap_err();

    assert!(matches!(err, KinError::Server(_)));
    assert!(err.is_retryable());
    assert_eq!(h.ledger.submissions().len(), 1);
    assert_eq!(m.pool().free_count(), 1);
}

/// Test: A held channel makes the next caller wait, then fail
#[tokio::test(start_paused = true)]
async fn test_busy_pool_times_out() {
    let h = Harness::new();
    let base = h.funded(100);
    let dest = h.funded(1);
    let options = ChannelOptions {
        acquire_timeout: Duration::from_secs(1),
        ..ChannelOptions::default()
    };
    let m = manager(&h, &base, &[], options);

    let held = m
        .build_transaction(pay(dest.public_address(), "1"), 100, None)
        .await
        .unwrap();
    assert_eq!(m.pool().free_count(), 0);

    let start = tokio::time::Instant::now();
    let err = m
        .build_transaction(pay(dest.public_address(), "1"), 100, None)
        .await
        .unwrap_err();
    let waited = start.elapsed();

    assert_eq!(err, KinError::ChannelsBusy);
    assert!(waited >= Duration::from_secs(1), "{:?}", waited);
    assert!(waited < Duration::from_secs(2), "{:?}", waited);

    // Dropping the unsubmitted transaction frees the channel
    drop(held);
    assert_eq!(m.pool().free_count(), 1);
    let again = m
        .build_transaction(pay(dest.public_address(), "2"), 100, None)
        .await
        .unwrap();
    assert_eq!(again.builder().operations().len(), 1);
    again.release();
    assert_eq!(m.pool().free_count(), 1);
    assert!(h.ledger.submissions().is_empty());
}

/// Test: Prepared transactions expose their hash before submission
#[tokio::test]
async fn test_prepared_transaction() {
    let h = Harness::new();
    let base = h.funded(100);
    let channels = h.channels(2, 10);
    let dest = h.funded(1);
    let m = manager(&h, &base, &channels, ChannelOptions::default());

    let prepared = m
        .build_transaction(pay(dest.public_address(), "3"), 150, Some("memo"))
        .await
        .unwrap();
    let hash = prepared.hash().to_string();
    let channel = prepared.channel_address().to_string();
    assert!(channels.iter().any(|c| c.public_address() == channel));
    assert_eq!(prepared.builder().fee(), 150);
    assert_eq!(m.get_status(false).non_free_channels, 1);

    let response = prepared.submit().await.unwrap();
    assert_eq!(response.hash, hash);
    assert_eq!(m.get_status(false).free_channels, 2);
    assert_eq!(h.ledger.balance_kin(dest.public_address()), 4.0);
}

/// Test: Channel choice is spread over the pool
#[tokio::test]
async fn test_channels_are_spread() {
    let h = Harness::new();
    let base = h.funded(1_000);
    let channels = h.channels(3, 10);
    let dest = h.funded(1);
    let m = manager(&h, &base, &channels, ChannelOptions::default());

    for _ in 0..30 {
        m.send_transaction(pay(dest.public_address(), "0.1"), 100, None)
            .await
            .unwrap();
    }
    let used: HashSet<String> = h
        .ledger
        .submissions()
        .iter()
        .map(|e| e.tx.source_account.clone())
        .collect();
    assert!(used.len() > 1, "all sends went through one channel");
    // 1 + 30 * 0.1
    assert_eq!(h.ledger.balance_kin(dest.public_address()), 4.0);
}

#[test]
fn test_manager_rejects_bad_channels() {
    let h = Harness::new();
    let base = Keypair::random();
    let result = ChannelManager::new(
        &h.environment,
        h.gateway(),
        base.clone(),
        &["SBAD".to_string()],
        100,
        ChannelOptions::default(),
    );
    assert!(matches!(result, Err(KinError::Configuration(_))));

    let dup = vec![base.secret_seed().to_string(), base.secret_seed().to_string()];
    let result = ChannelManager::new(
        &h.environment,
        h.gateway(),
        base,
        &dup,
        100,
        ChannelOptions::default(),
    );
    assert!(matches!(result, Err(KinError::Configuration(_))));
}

/// Test: The base account can't be one channel among several
#[test]
fn test_base_not_mixed_with_channels() {
    let h = Harness::new();
    let base = h.funded(100);
    let channel = h.funded(1);

    let result = ChannelManager::new(
        &h.environment,
        h.gateway(),
        base.clone(),
        &seeds(&[base.clone(), channel]),
        100,
        ChannelOptions::default(),
    );
    assert!(matches!(result, Err(KinError::Configuration(_))));

    // Alone it is just the default single channel
    let solo = manager(&h, &base, &[base.clone()], ChannelOptions::default());
    assert_eq!(solo.pool().size(), 1);
}

