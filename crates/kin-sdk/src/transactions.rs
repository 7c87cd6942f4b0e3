// ============================================================================
// KIN-SDK - Transaction Views
// ============================================================================
// `RawTransaction` is a Horizon record plus its decoded envelope.
// `SimplifiedTransaction` is the one-operation view apps care about; anything
// that doesn't fit (several operations, binary memos, foreign assets, other
// operation types) is refused with `CantSimplify`.
// ============================================================================

use crate::amount;
use crate::error::KinError;
use crate::horizon::TransactionRecord;
use crate::xdr::{Memo, OperationBody, TransactionEnvelope};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Payment,
    CreateAccount,
    /// Change-trust
    Activation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawTransaction {
    pub hash: String,
    pub ledger: u64,
    pub timestamp: DateTime<Utc>,
    pub paging_token: String,
    pub envelope: TransactionEnvelope,
}

impl TryFrom<&TransactionRecord> for RawTransaction {
    type Error = KinError;

    fn try_from(record: &TransactionRecord) -> Result<Self> {
        Ok(Self {
            hash: record.hash.clone(),
            ledger: record.ledger,
            timestamp: record.created_at,
            paging_token: record.paging_token.clone(),
            envelope: TransactionEnvelope::from_base64(&record.envelope_xdr)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimplifiedOperation {
    pub op_type: OperationType,
    /// Asset code for payments and activations
    pub asset: Option<String>,
    pub amount: Option<String>,
    pub destination: Option<String>,
    pub starting_balance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplifiedTransaction {
    /// Transaction hash
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub memo: Option<String>,
    /// Operation source if set, transaction source otherwise
    pub source: String,
    pub operation: SimplifiedOperation,
}

impl TryFrom<&RawTransaction> for SimplifiedTransaction {
    type Error = KinError;

    fn try_from(raw: &RawTransaction) -> Result<Self> {
        let tx = &raw.envelope.tx;

        let memo = match &tx.memo {
            Memo::None => None,
            Memo::Text(text) => Some(text.clone()),
            other => {
                return Err(KinError::CantSimplify(format!(
                    "memo type {}",
                    other.type_name()
                )))
            }
        };

        let op = match tx.operations.as_slice() {
            [op] => op,
            ops => {
                return Err(KinError::CantSimplify(format!(
                    "{} operations",
                    ops.len()
                )))
            }
        };

        let operation = match &op.body {
            OperationBody::Payment {
                destination,
                asset,
                amount,
            } => {
                if !asset.is_native() {
                    return Err(KinError::CantSimplify(format!(
                        "payment in asset {}",
                        asset.code()
                    )));
                }
                SimplifiedOperation {
                    op_type: OperationType::Payment,
                    asset: Some(asset.code().to_string()),
                    amount: Some(amount::from_stroops(*amount)),
                    destination: Some(destination.clone()),
                    starting_balance: None,
                }
            }
            OperationBody::CreateAccount {
                destination,
                starting_balance,
            } => SimplifiedOperation {
                op_type: OperationType::CreateAccount,
                asset: None,
                amount: None,
                destination: Some(destination.clone()),
                starting_balance: Some(amount::from_stroops(*starting_balance)),
            },
            OperationBody::ChangeTrust { asset, .. } => SimplifiedOperation {
                op_type: OperationType::Activation,
                asset: Some(asset.code().to_string()),
                amount: None,
                destination: None,
                starting_balance: None,
            },
        };

        Ok(Self {
            id: raw.hash.clone(),
            timestamp: raw.timestamp,
            memo,
            source: op
                .source_account
                .clone()
                .unwrap_or_else(|| tx.source_account.clone()),
            operation,
        })
    }
}

/// What `get_transaction_data` and history calls return
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransactionData {
    Simplified(SimplifiedTransaction),
    Raw(RawTransaction),
}

impl TransactionData {
    pub fn hash(&self) -> &str {
        match self {
            TransactionData::Simplified(tx) => &tx.id,
            TransactionData::Raw(tx) => &tx.hash,
        }
    }

    pub fn as_simplified(&self) -> Option<&SimplifiedTransaction> {
        match self {
            TransactionData::Simplified(tx) => Some(tx),
            TransactionData::Raw(_) => None,
        }
    }
}
