//! Integration Tests: Transaction Builder
//!
//! - Sequence numbers come from the ledger at every signature
//! - `clear` resets a builder for reuse
//! - Memo and amount validation
//! - Fees scale with the operation count

use super::Harness;
use kin_sdk::{Asset, KinError, Memo, TransactionBuilder};
use pretty_assertions::assert_eq;

fn builder(h: &Harness, seed: &str) -> TransactionBuilder {
    TransactionBuilder::new(&h.environment, h.gateway(), 100, seed).expect("builder")
}

/// Test: Serial transactions on one account have increasing sequences
#[tokio::test]
async fn test_sequence_strictly_increases() {
    let h = Harness::new();
    let source = h.funded(100);
    let dest = h.funded(1);
    let mut b = builder(&h, source.secret_seed());

    let mut sequences = Vec::new();
    for _ in 0..3 {
        b.append_payment_op(dest.public_address(), "1", Asset::Native, None)
            .unwrap();
        b.sign().await.unwrap();
        sequences.push(b.envelope().unwrap().tx.sequence);
        b.submit().await.unwrap();
        b.clear();
    }

    assert!(sequences.windows(2).all(|w| w[1] > w[0]), "{:?}", sequences);
    let on_ledger = h.ledger.account_state(source.public_address()).unwrap();
    assert_eq!(on_ledger.sequence, *sequences.last().unwrap());
}

/// Test: A sequence bumped behind the builder's back is picked up
#[tokio::test]
async fn test_sign_refreshes_sequence() {
    let h = Harness::new();
    let source = h.funded(100);
    let dest = h.funded(1);
    let mut first = builder(&h, source.secret_seed());
    let mut second = builder(&h, source.secret_seed());

    first
        .append_payment_op(dest.public_address(), "1", Asset::Native, None)
        .unwrap();
    first.sign().await.unwrap();

    // Another builder for the same account submits in between
    second
        .append_payment_op(dest.public_address(), "2", Asset::Native, None)
        .unwrap();
    second.sign().await.unwrap();
    second.submit().await.unwrap();

    // The stale envelope is rejected, re-signing fixes it
    assert!(matches!(
        first.submit().await,
        Err(KinError::Request { ref code, .. }) if code == "tx_bad_seq"
    ));
    first.sign().await.unwrap();
    first.submit().await.unwrap();
    assert_eq!(h.ledger.accepted().len(), 2);
}

/// Test: Clearing twice leaves the same empty builder
#[tokio::test]
async fn test_clear_is_idempotent() {
    let h = Harness::new();
    let source = h.funded(100);
    let dest = h.funded(1);
    let mut b = builder(&h, source.secret_seed());

    b.set_fee(250);
    b.add_text_memo("hi").unwrap();
    b.append_payment_op(dest.public_address(), "1", Asset::Native, None)
        .unwrap();
    b.sign().await.unwrap();
    let sequence = b.sequence();

    b.clear();
    let after_first = format!("{:?}", b);
    b.clear();

    assert_eq!(format!("{:?}", b), after_first);
    assert!(b.operations().is_empty());
    assert!(!b.is_signed());
    assert_eq!(b.memo(), &Memo::None);
    assert_eq!(b.fee(), 100);
    // Keys and sequence survive
    assert_eq!(b.sequence(), sequence);
    assert_eq!(b.address(), source.public_address());
}

/// Test: The memo cap counts bytes, not characters
#[tokio::test]
async fn test_memo_byte_length() {
    let h = Harness::new();
    let source = h.funded(1);
    let mut b = builder(&h, source.secret_seed());

    assert!(b.add_text_memo(&"a".repeat(28)).is_ok());
    assert_eq!(
        b.add_text_memo(&"é".repeat(15)).unwrap_err(),
        KinError::MemoTooLong {
            length: 30,
            cap: 28
        }
    );
}

/// Test: Amounts with more than 7 decimals are rejected, not rounded
#[tokio::test]
async fn test_amount_precision() {
    let h = Harness::new();
    let source = h.funded(1);
    let dest = h.funded(1);
    let mut b = builder(&h, source.secret_seed());

    let err = b
        .append_payment_op(dest.public_address(), "1.00000001", Asset::Native, None)
        .unwrap_err();
    assert!(matches!(err, KinError::Precision { max_digits: 7, .. }));
    assert!(b.operations().is_empty());

    assert!(matches!(
        b.append_payment_op("GBAD", "1", Asset::Native, None),
        Err(KinError::InvalidAddress(_))
    ));
}

/// Test: Total fee is the per-operation fee times the operation count
#[tokio::test]
async fn test_fee_per_operation() {
    let h = Harness::new();
    let source = h.funded(100);
    let a = h.funded(1);
    let b_account = h.funded(1);
    let mut b = builder(&h, source.secret_seed());

    b.append_payment_op(a.public_address(), "1", Asset::Native, None)
        .unwrap();
    b.append_payment_op(b_account.public_address(), "1", Asset::Native, None)
        .unwrap();
    b.sign().await.unwrap();

    assert_eq!(b.envelope().unwrap().tx.fee, 200);
    b.submit().await.unwrap();
}

/// Test: Signing needs operations and an existing account
#[tokio::test]
async fn test_sign_failures() {
    let h = Harness::new();
    let source = h.funded(1);
    let mut b = builder(&h, source.secret_seed());
    assert!(matches!(
        b.sign().await,
        Err(KinError::InvalidTransaction(_))
    ));

    let ghost = kin_sdk::Keypair::random();
    let mut b = builder(&h, ghost.secret_seed());
    b.append_create_account_op(source.public_address(), "1", None)
        .unwrap();
    assert_eq!(
        b.sign().await.unwrap_err(),
        KinError::AccountNotFound {
            address: Some(ghost.public_address().to_string()),
            code: Some("not_found".to_string()),
        }
    );
}

/// Test: The local hash is the one the ledger reports
#[tokio::test]
async fn test_hash_matches_ledger() {
    let h = Harness::new();
    let source = h.funded(10);
    let dest = kin_sdk::Keypair::random();
    let mut b = builder(&h, source.secret_seed());

    b.append_create_account_op(dest.public_address(), "2.5", None)
        .unwrap();
    b.sign().await.unwrap();
    let hash = b.hash().unwrap();
    let response = b.submit().await.unwrap();

    assert_eq!(response.hash, hash);
    assert_eq!(h.ledger.balance_kin(dest.public_address()), 2.5);
}

/// Test: A trust operation is accepted and reads back as an activation
#[tokio::test]
async fn test_trust_op_activation() {
    let h = Harness::new();
    let source = h.funded(10);
    let issuer = kin_sdk::Keypair::random();
    let mut b = builder(&h, source.secret_seed());

    b.append_trust_op(issuer.public_address(), "KIN", None, None)
        .unwrap();
    b.sign().await.unwrap();
    let hash = b.submit().await.unwrap().hash;

    let tx = h.client.get_transaction_data(&hash, true).await.unwrap();
    let simple = tx.as_simplified().unwrap();
    assert_eq!(simple.operation.op_type, kin_sdk::OperationType::Activation);
    assert_eq!(simple.source, source.public_address());

    assert!(matches!(
        b.append_trust_op("GBAD", "KIN", None, None),
        Err(KinError::InvalidAddress(_))
    ));
}
