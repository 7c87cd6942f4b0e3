// ============================================================================
// KIN-SDK - Transaction Builder
// ============================================================================
// A builder is bound to one source account and reused across transactions.
// The channel manager keeps one per channel: fill it with operations, sign,
// submit, then `clear` it for the next caller.
//
// Signing always refreshes the sequence number from the ledger first, so a
// reused builder never signs with a stale sequence.
// ============================================================================

use crate::amount;
use crate::config::Environment;
use crate::error::{account_error, KinError};
use crate::horizon::{LedgerGateway, SubmitResponse};
use crate::keypair::Keypair;
use crate::memo;
use crate::strkey::is_valid_address;
use crate::xdr::{
    Asset, Memo, Operation, OperationBody, Transaction, TransactionEnvelope, MAX_TRUST_LIMIT,
};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct TransactionBuilder {
    network_id: [u8; 32],
    gateway: Arc<dyn LedgerGateway>,
    keypair: Option<Keypair>,
    address: String,
    /// Sequence last read from the ledger
    sequence: Option<i64>,
    default_fee: u32,
    fee: u32,
    memo: Memo,
    operations: Vec<Operation>,
    envelope: Option<TransactionEnvelope>,
}

impl TransactionBuilder {
    /// Builder that signs for the account owning `secret_seed`
    pub fn new(
        environment: &Environment,
        gateway: Arc<dyn LedgerGateway>,
        fee: u32,
        secret_seed: &str,
    ) -> Result<Self> {
        let keypair = Keypair::from_seed(secret_seed)?;
        let address = keypair.public_address().to_string();
        Ok(Self::init(environment, gateway, fee, Some(keypair), address))
    }

    /// Builder for an account we can't sign for; use `sign_with`
    pub fn for_address(
        environment: &Environment,
        gateway: Arc<dyn LedgerGateway>,
        fee: u32,
        address: &str,
    ) -> Result<Self> {
        if !is_valid_address(address) {
            return Err(KinError::InvalidAddress(address.to_string()));
        }
        Ok(Self::init(environment, gateway, fee, None, address.to_string()))
    }

    fn init(
        environment: &Environment,
        gateway: Arc<dyn LedgerGateway>,
        fee: u32,
        keypair: Option<Keypair>,
        address: String,
    ) -> Self {
        Self {
            network_id: *environment.passphrase_hash(),
            gateway,
            keypair,
            address,
            sequence: None,
            default_fee: fee,
            fee,
            memo: Memo::None,
            operations: Vec::new(),
            envelope: None,
        }
    }

    // ==================== Accessors ====================

    /// Source account of built transactions
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Per-operation fee
    pub fn fee(&self) -> u32 {
        self.fee
    }

    pub fn set_fee(&mut self, fee: u32) -> &mut Self {
        self.fee = fee;
        self.envelope = None;
        self
    }

    pub fn sequence(&self) -> Option<i64> {
        self.sequence
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn envelope(&self) -> Option<&TransactionEnvelope> {
        self.envelope.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.envelope.is_some()
    }

    // ==================== Operations ====================

    pub fn append_create_account_op(
        &mut self,
        destination: &str,
        starting_balance: &str,
        source: Option<&str>,
    ) -> Result<&mut Self> {
        let destination = checked_address(destination)?;
        let starting_balance = amount::to_positive_stroops(starting_balance)?;
        self.push(
            source,
            OperationBody::CreateAccount {
                destination,
                starting_balance,
            },
        )
    }

    pub fn append_payment_op(
        &mut self,
        destination: &str,
        amount: &str,
        asset: Asset,
        source: Option<&str>,
    ) -> Result<&mut Self> {
        let destination = checked_address(destination)?;
        let amount = amount::to_positive_stroops(amount)?;
        self.push(
            source,
            OperationBody::Payment {
                destination,
                asset,
                amount,
            },
        )
    }

    /// Trust `code` issued by `issuer`; no limit means the maximum
    pub fn append_trust_op(
        &mut self,
        issuer: &str,
        code: &str,
        limit: Option<&str>,
        source: Option<&str>,
    ) -> Result<&mut Self> {
        let issuer = checked_address(issuer)?;
        let limit = match limit {
            Some(limit) => amount::to_stroops(limit)?,
            None => MAX_TRUST_LIMIT,
        };
        self.push(
            source,
            OperationBody::ChangeTrust {
                asset: Asset::credit(code, &issuer),
                limit,
            },
        )
    }

    fn push(&mut self, source: Option<&str>, body: OperationBody) -> Result<&mut Self> {
        let source_account = source.map(checked_address).transpose()?;
        self.operations.push(Operation {
            source_account,
            body,
        });
        self.envelope = None;
        Ok(self)
    }

    /// Set a text memo (no templating, see `memo::build_memo`)
    pub fn add_text_memo(&mut self, text: &str) -> Result<&mut Self> {
        memo::check_length(text)?;
        self.memo = Memo::Text(text.to_string());
        self.envelope = None;
        Ok(self)
    }

    // ==================== Sequence / Signing ====================

    /// Read the current sequence from the ledger. Transactions are built
    /// with the next one.
    pub async fn update_sequence(&mut self) -> Result<i64> {
        let account = self
            .gateway
            .account(&self.address)
            .await
            .map_err(|e| account_error(e, &self.address))?;
        let sequence = account
            .sequence_number()
            .map_err(|e| account_error(e, &self.address))?;
        self.sequence = Some(sequence);
        Ok(sequence)
    }

    /// Refresh the sequence, build the transaction and sign with our key
    pub async fn sign(&mut self) -> Result<()> {
        let keypair = self.keypair.clone().ok_or_else(|| {
            KinError::InvalidTransaction(format!("no signing key for {}", self.address))
        })?;
        if self.operations.is_empty() {
            return Err(KinError::InvalidTransaction("no operations".to_string()));
        }

        let sequence = self.update_sequence().await?;
        let mut envelope = TransactionEnvelope::new(self.build_transaction(sequence + 1)?);
        envelope.sign(&keypair, &self.network_id)?;

        debug!(
            source = %self.address,
            sequence = sequence + 1,
            operations = self.operations.len(),
            "Signed transaction"
        );
        self.envelope = Some(envelope);
        Ok(())
    }

    /// Add a signature from another key to the already signed envelope
    pub fn sign_with(&mut self, keypair: &Keypair) -> Result<()> {
        let envelope = self
            .envelope
            .as_mut()
            .ok_or_else(|| KinError::InvalidTransaction("transaction is not signed".to_string()))?;
        envelope.sign(keypair, &self.network_id)
    }

    fn build_transaction(&self, sequence: i64) -> Result<Transaction> {
        let fee = self
            .fee
            .checked_mul(self.operations.len() as u32)
            .ok_or_else(|| KinError::InvalidTransaction("fee overflow".to_string()))?;
        Ok(Transaction {
            source_account: self.address.clone(),
            fee,
            sequence,
            time_bounds: None,
            memo: self.memo.clone(),
            operations: self.operations.clone(),
        })
    }

    // ==================== Output ====================

    /// Hex hash of the signed transaction
    pub fn hash(&self) -> Result<String> {
        let envelope = self.signed()?;
        Ok(hex::encode(envelope.hash(&self.network_id)?))
    }

    pub fn envelope_xdr(&self) -> Result<String> {
        self.signed()?.to_base64()
    }

    fn signed(&self) -> Result<&TransactionEnvelope> {
        self.envelope
            .as_ref()
            .ok_or_else(|| KinError::InvalidTransaction("transaction is not signed".to_string()))
    }

    /// Submit the signed envelope once
    pub async fn submit(&self) -> Result<SubmitResponse> {
        let xdr = self.envelope_xdr()?;
        Ok(self.gateway.submit(&xdr).await?)
    }

    /// Forget operations, memo, fee and the signed envelope. The source
    /// account, keys and last sequence stay.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.memo = Memo::None;
        self.fee = self.default_fee;
        self.envelope = None;
    }
}

impl fmt::Debug for TransactionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionBuilder")
            .field("address", &self.address)
            .field("sequence", &self.sequence)
            .field("fee", &self.fee)
            .field("memo", &self.memo)
            .field("operations", &self.operations.len())
            .field("signed", &self.envelope.is_some())
            .finish()
    }
}

fn checked_address(address: &str) -> Result<String> {
    if !is_valid_address(address) {
        return Err(KinError::InvalidAddress(address.to_string()));
    }
    Ok(address.to_string())
}
