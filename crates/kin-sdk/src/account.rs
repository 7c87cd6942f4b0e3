// ============================================================================
// KIN-SDK - Kin Account
// ============================================================================
// Authenticated side of the SDK. An account owns a keypair, an app id used
// to tag memos, and a channel manager that carries its transactions.
//
// Every public send validates its input before touching the network.
// ============================================================================

use crate::amount;
use crate::channel_manager::{ChannelManager, PreparedTransaction};
use crate::channels::PoolStatus;
use crate::client::{ClientConfig, HistoryQuery, KinClient};
use crate::config::{ChannelOptions, DEFAULT_FEE};
use crate::error::KinError;
use crate::horizon::AccountRecord;
use crate::keypair::Keypair;
use crate::memo::{build_memo, is_valid_app_id};
use crate::strkey::{is_valid_address, is_valid_secret_key};
use crate::transactions::TransactionData;
use crate::xdr::{Asset, TransactionEnvelope};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A transaction built elsewhere, sent to us for a counter-signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistPayload {
    /// Base64 transaction envelope
    pub envelope: String,
    /// Network passphrase the envelope was built for
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub client: ClientConfig,
    pub account: AccountInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub app_id: String,
    pub public_address: String,
    /// `None` when the balance couldn't be read
    pub balance: Option<f64>,
    pub channels: PoolStatus,
}

pub struct KinAccount {
    client: KinClient,
    keypair: Keypair,
    app_id: String,
    channels: ChannelManager,
}

impl KinAccount {
    /// Usually reached through `KinClient::kin_account`. Fails if the
    /// account doesn't exist on the ledger.
    pub async fn new(
        client: KinClient,
        seed: &str,
        channel_seeds: Vec<String>,
        app_id: &str,
        options: ChannelOptions,
    ) -> Result<Self> {
        let keypair = Keypair::from_seed(seed)?;
        if !is_valid_app_id(app_id) {
            return Err(KinError::InvalidAppId(app_id.to_string()));
        }
        if let Some(bad) = channel_seeds.iter().position(|s| !is_valid_secret_key(s)) {
            return Err(KinError::Configuration(format!(
                "channel seed #{} is not a valid secret key",
                bad
            )));
        }

        // The account must exist before it can sign anything
        client.get_account_data(keypair.public_address()).await?;
        for seed in &channel_seeds {
            let address = Keypair::address_from_seed(seed)?;
            client.get_account_data(&address).await?;
        }

        let channels = ChannelManager::new(
            client.environment(),
            client.gateway().clone(),
            keypair.clone(),
            &channel_seeds,
            DEFAULT_FEE,
            options,
        )?;

        info!(
            address = %keypair.public_address(),
            app_id = %app_id,
            channels = channels.pool().size(),
            "Kin account ready"
        );

        Ok(Self {
            client,
            keypair,
            app_id: app_id.to_string(),
            channels,
        })
    }

    pub fn get_public_address(&self) -> &str {
        self.keypair.public_address()
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn client(&self) -> &KinClient {
        &self.client
    }

    pub fn channel_manager(&self) -> &ChannelManager {
        &self.channels
    }

    // ==================== Queries ====================

    pub async fn get_balance(&self) -> Result<f64> {
        self.client.get_account_balance(self.get_public_address()).await
    }

    pub async fn get_data(&self) -> Result<AccountRecord> {
        self.client.get_account_data(self.get_public_address()).await
    }

    /// Client config, balance and channel occupancy. `verbose` lists every
    /// channel by address.
    pub async fn get_status(&self, verbose: bool) -> AccountStatus {
        let balance = self.get_balance().await.ok();
        AccountStatus {
            client: self.client.get_config().await,
            account: AccountInfo {
                app_id: self.app_id.clone(),
                public_address: self.get_public_address().to_string(),
                balance,
                channels: self.channels.get_status(verbose),
            },
        }
    }

    pub async fn get_transaction_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<TransactionData>> {
        self.client
            .get_account_tx_history(self.get_public_address(), query)
            .await
    }

    // ==================== Building ====================

    /// Sign (but don't submit) a create-account transaction. The returned
    /// transaction holds a channel until it is submitted or dropped.
    pub async fn build_create_account(
        &self,
        address: &str,
        starting_balance: &str,
        fee: u32,
        memo_text: Option<&str>,
    ) -> Result<PreparedTransaction<'_>> {
        check_destination(address)?;
        amount::to_positive_stroops(starting_balance)?;
        let memo = build_memo(&self.app_id, memo_text)?;

        self.channels
            .build_transaction(
                |builder, source| {
                    builder.append_create_account_op(address, starting_balance, source)?;
                    Ok(())
                },
                fee,
                Some(&memo),
            )
            .await
    }

    /// Sign (but don't submit) a KIN payment
    pub async fn build_send_kin(
        &self,
        address: &str,
        amount: &str,
        fee: u32,
        memo_text: Option<&str>,
    ) -> Result<PreparedTransaction<'_>> {
        check_destination(address)?;
        amount::to_positive_stroops(amount)?;
        let memo = build_memo(&self.app_id, memo_text)?;

        self.channels
            .build_transaction(
                |builder, source| {
                    builder.append_payment_op(address, amount, Asset::Native, source)?;
                    Ok(())
                },
                fee,
                Some(&memo),
            )
            .await
    }

    /// Submit a transaction from one of the `build_*` calls; returns its hash
    pub async fn submit_transaction(&self, transaction: PreparedTransaction<'_>) -> Result<String> {
        let response = transaction.submit().await?;
        Ok(response.hash)
    }

    // ==================== Sending ====================

    /// Create and fund a new account; returns the transaction hash
    pub async fn create_account(
        &self,
        address: &str,
        starting_balance: &str,
        fee: u32,
        memo_text: Option<&str>,
    ) -> Result<String> {
        let transaction = self
            .build_create_account(address, starting_balance, fee, memo_text)
            .await?;
        let hash = self.submit_transaction(transaction).await?;
        info!(destination = %address, hash = %hash, "Account created");
        Ok(hash)
    }

    /// Send KIN; returns the transaction hash
    pub async fn send_kin(
        &self,
        address: &str,
        amount: &str,
        fee: u32,
        memo_text: Option<&str>,
    ) -> Result<String> {
        let transaction = self
            .build_send_kin(address, amount, fee, memo_text)
            .await?;
        let hash = self.submit_transaction(transaction).await?;
        info!(destination = %address, amount = %amount, hash = %hash, "KIN sent");
        Ok(hash)
    }

    // ==================== Whitelisting ====================

    /// Add this account's signature to an externally built transaction and
    /// return the re-encoded envelope. Purely local.
    pub fn whitelist_transaction(&self, payload: &WhitelistPayload) -> Result<String> {
        let environment = self.client.environment();
        if payload.network_id != environment.passphrase {
            return Err(KinError::WrongNetwork {
                expected: environment.passphrase.clone(),
                actual: payload.network_id.clone(),
            });
        }

        let mut envelope = TransactionEnvelope::from_base64(&payload.envelope)?;
        envelope.sign(&self.keypair, environment.passphrase_hash())?;
        debug!(
            source = %envelope.tx.source_account,
            signatures = envelope.signatures.len(),
            "Transaction whitelisted"
        );
        envelope.to_base64()
    }
}

impl std::fmt::Debug for KinAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KinAccount")
            .field("address", &self.get_public_address())
            .field("app_id", &self.app_id)
            .field("channels", &self.channels.pool().size())
            .finish()
    }
}

fn check_destination(address: &str) -> Result<()> {
    if !is_valid_address(address) {
        return Err(KinError::InvalidAddress(address.to_string()));
    }
    Ok(())
}
