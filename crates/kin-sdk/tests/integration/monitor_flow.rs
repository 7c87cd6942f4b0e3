//! Integration Tests: Payment Monitors
//!
//! - Account monitors deliver payments touching one address
//! - Ledger-wide monitors deliver once per watched side
//! - Undecodable events and non-payments are skipped
//! - Stopping ends the stream and freezes the address set

use super::Harness;
use chrono::Utc;
use kin_sdk::{GatewayError, Keypair, KinError, SimplifiedTransaction, TransactionRecord};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::mpsc;

type Delivery = (String, SimplifiedTransaction);

fn collector() -> (
    impl Fn(&str, &SimplifiedTransaction) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Delivery>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let callback = move |address: &str, tx: &SimplifiedTransaction| {
        let _ = sender.send((address.to_string(), tx.clone()));
    };
    (callback, receiver)
}

async fn next(receiver: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("no payment delivered in time")
        .expect("monitor channel closed")
}

/// Let the monitor task drain whatever is queued
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Test: One account's payments reach the callback, account creation doesn't
#[tokio::test]
async fn test_account_monitor() {
    let h = Harness::new();
    let owner = h.funded(100);
    let dest = h.funded(1);
    let account = h
        .client
        .kin_account(owner.secret_seed(), None, Some("test"))
        .await
        .unwrap();

    let (callback, mut deliveries) = collector();
    let mut monitor = h
        .client
        .monitor_account_payments(owner.public_address(), callback)
        .await
        .unwrap();
    assert_eq!(
        h.ledger.stream_requests(),
        vec![(Some(owner.public_address().to_string()), None)]
    );

    account
        .create_account(Keypair::random().public_address(), "1", 100, None)
        .await
        .unwrap();
    let hash = account
        .send_kin(dest.public_address(), "3", 100, Some("tip"))
        .await
        .unwrap();

    let (address, tx) = next(&mut deliveries).await;
    assert_eq!(address, owner.public_address());
    assert_eq!(tx.id, hash);
    assert_eq!(tx.memo.as_deref(), Some("1-test-tip"));
    assert_eq!(tx.operation.amount.as_deref(), Some("3.0000000"));
    assert_eq!(tx.operation.destination.as_deref(), Some(dest.public_address()));

    assert!(matches!(
        monitor.add_address(dest.public_address()),
        Err(KinError::Configuration(_))
    ));

    monitor.stop().await;
    settle().await;
    assert!(deliveries.try_recv().is_err());
}

/// Test: Both watched sides of a payment get a delivery
#[tokio::test]
async fn test_ledger_monitor_both_sides() {
    let h = Harness::new();
    let a = h.funded(100);
    let b = h.funded(1);
    let c = h.funded(1);
    let sender = h
        .client
        .kin_account(a.secret_seed(), None, Some("test"))
        .await
        .unwrap();

    let (callback, mut deliveries) = collector();
    let monitor = h
        .client
        .monitor_accounts_payments(
            &[a.public_address().to_string(), b.public_address().to_string()],
            callback,
        )
        .await
        .unwrap();
    assert_eq!(h.ledger.stream_requests(), vec![(None, None)]);

    let hash = sender
        .send_kin(b.public_address(), "1", 100, None)
        .await
        .unwrap();
    let first = next(&mut deliveries).await;
    let second = next(&mut deliveries).await;
    assert_eq!(first.0, a.public_address());
    assert_eq!(second.0, b.public_address());
    assert_eq!(first.1, second.1);
    assert_eq!(first.1.id, hash);

    // Swap b for c
    monitor.remove_address(b.public_address()).unwrap();
    monitor.add_address(c.public_address()).unwrap();
    let mut watched = monitor.addresses();
    watched.sort();
    let mut expected = vec![a.public_address().to_string(), c.public_address().to_string()];
    expected.sort();
    assert_eq!(watched, expected);

    sender
        .send_kin(b.public_address(), "1", 100, None)
        .await
        .unwrap();
    sender
        .send_kin(c.public_address(), "2", 100, None)
        .await
        .unwrap();

    let (address, tx) = next(&mut deliveries).await;
    assert_eq!(address, a.public_address());
    assert_eq!(tx.operation.destination.as_deref(), Some(b.public_address()));
    let (address, tx) = next(&mut deliveries).await;
    assert_eq!(address, a.public_address());
    assert_eq!(tx.operation.destination.as_deref(), Some(c.public_address()));
    let (address, _) = next(&mut deliveries).await;
    assert_eq!(address, c.public_address());

    assert!(matches!(
        monitor.add_address("GNOPE"),
        Err(KinError::InvalidAddress(_))
    ));
}

/// Test: Garbage on the stream doesn't end the monitor
#[tokio::test]
async fn test_bad_events_skipped() {
    let h = Harness::new();
    let a = h.funded(100);
    let b = h.funded(1);
    let sender = h
        .client
        .kin_account(a.secret_seed(), None, Some("test"))
        .await
        .unwrap();

    let (callback, mut deliveries) = collector();
    let _monitor = h
        .client
        .monitor_accounts_payments(&[b.public_address().to_string()], callback)
        .await
        .unwrap();

    h.ledger.broadcast(Ok(TransactionRecord {
        hash: "00".repeat(32),
        ledger: 1,
        created_at: Utc::now(),
        source_account: a.public_address().to_string(),
        envelope_xdr: "definitely not xdr".to_string(),
        memo_type: "none".to_string(),
        memo: None,
        paging_token: "1".to_string(),
        fee_paid: None,
    }));
    h.ledger
        .broadcast(Err(GatewayError::Transport("stream hiccup".to_string())));

    let hash = sender
        .send_kin(b.public_address(), "5", 100, None)
        .await
        .unwrap();
    let (address, tx) = next(&mut deliveries).await;
    assert_eq!(address, b.public_address());
    assert_eq!(tx.id, hash);
}

/// Test: A stopped monitor closes its stream and refuses changes
#[tokio::test]
async fn test_stop_monitor() {
    let h = Harness::new();
    let a = h.funded(100);
    let b = h.funded(1);
    let sender = h
        .client
        .kin_account(a.secret_seed(), None, Some("test"))
        .await
        .unwrap();

    let (callback, mut deliveries) = collector();
    let mut monitor = h
        .client
        .monitor_accounts_payments(&[b.public_address().to_string()], callback)
        .await
        .unwrap();
    assert!(!monitor.is_stopped());
    assert_eq!(h.ledger.open_streams(), 1);

    monitor.stop().await;
    assert!(monitor.is_stopped());
    assert_eq!(h.ledger.open_streams(), 0);
    assert_eq!(
        monitor.add_address(a.public_address()).unwrap_err(),
        KinError::StoppedMonitor
    );
    assert_eq!(
        monitor.remove_address(b.public_address()).unwrap_err(),
        KinError::StoppedMonitor
    );

    sender
        .send_kin(b.public_address(), "1", 100, None)
        .await
        .unwrap();
    settle().await;
    assert!(deliveries.try_recv().is_err());

    // Stopping twice is harmless
    monitor.stop().await;
}

/// Test: Dropping a monitor ends its task
#[tokio::test]
async fn test_drop_monitor() {
    let h = Harness::new();
    let a = h.funded(1);

    let (callback, _deliveries) = collector();
    let monitor = h
        .client
        .monitor_account_payments(a.public_address(), callback)
        .await
        .unwrap();
    assert_eq!(h.ledger.open_streams(), 1);
    drop(monitor);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.ledger.open_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream still open after drop");
}

/// Test: Invalid addresses are refused up front
#[tokio::test]
async fn test_monitor_rejects_bad_addresses() {
    let h = Harness::new();

    let (callback, _) = collector();
    assert!(matches!(
        h.client.monitor_account_payments("GBAD", callback).await,
        Err(KinError::InvalidAddress(_))
    ));

    let (callback, _) = collector();
    assert!(matches!(
        h.client
            .monitor_accounts_payments(&["GBAD".to_string()], callback)
            .await,
        Err(KinError::InvalidAddress(_))
    ));
    assert!(h.ledger.stream_requests().is_empty());
}
