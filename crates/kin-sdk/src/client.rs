// ============================================================================
// KIN-SDK - Kin Client
// ============================================================================
// Read-side entry point of the SDK. Holds the environment and a ledger
// gateway, answers queries, and hands out `KinAccount`s for anything that
// needs a signature.
//
// Features:
// - Account balance / existence / data lookups
// - Transaction lookups and paged history (raw or simplified)
// - Minimum fee and connection status
// - Friendbot funding on test networks
// - Payment monitors
// ============================================================================

use crate::account::KinAccount;
use crate::amount;
use crate::config::{
    ChannelOptions, Environment, HorizonOptions, ANON_APP_ID, MAX_RECORDS_PER_REQUEST,
    SDK_VERSION,
};
use crate::error::{account_error, GatewayError, KinError};
use crate::horizon::{AccountRecord, HorizonClient, LedgerGateway, Order, PageQuery};
use crate::monitor::PaymentMonitor;
use crate::strkey::{is_valid_address, is_valid_transaction_hash};
use crate::transactions::{RawTransaction, SimplifiedTransaction, TransactionData};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Friendbot refuses to hand out more than this per request
pub const MAX_FRIENDBOT_AMOUNT_KIN: i64 = 10_000;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// SDK and connection status
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    pub sdk_version: String,
    pub environment: String,
    pub horizon: HorizonStatus,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct HorizonStatus {
    pub uri: String,
    pub online: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportConfig {
    pub pool_size: usize,
    pub num_retries: u32,
    /// Seconds
    pub request_timeout: f64,
    /// Seconds
    pub backoff_factor: f64,
}

/// Which part of an account's history to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Maximum number of transactions returned
    pub amount: usize,
    /// Newest first
    pub descending: bool,
    /// Paging token to continue from
    pub cursor: Option<String>,
    /// Return simplified transactions, skipping those that can't be
    pub simple: bool,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            amount: 10,
            descending: true,
            cursor: None,
            simple: true,
        }
    }
}

// ============================================================================
// KIN CLIENT
// ============================================================================

#[derive(Clone)]
pub struct KinClient {
    environment: Environment,
    options: HorizonOptions,
    gateway: Arc<dyn LedgerGateway>,
}

impl KinClient {
    /// Client talking to the environment's Horizon with default transport
    pub fn new(environment: Environment) -> Result<Self> {
        Self::with_options(environment, HorizonOptions::default())
    }

    pub fn with_options(environment: Environment, options: HorizonOptions) -> Result<Self> {
        let gateway = HorizonClient::new(&environment, &options)?;
        info!(
            "Kin client initialized on network {}, horizon endpoint {}",
            environment.name, environment.horizon_url
        );
        Ok(Self {
            environment,
            options,
            gateway: Arc::new(gateway),
        })
    }

    /// Client over any gateway implementation
    pub fn with_gateway(environment: Environment, gateway: Arc<dyn LedgerGateway>) -> Self {
        Self {
            environment,
            options: HorizonOptions::default(),
            gateway,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    // ==================== Accounts ====================

    /// Open an account for signing. With no channel seeds the account is its
    /// own single channel; with no app id the anonymous one is used.
    pub async fn kin_account(
        &self,
        seed: &str,
        channel_seeds: Option<Vec<String>>,
        app_id: Option<&str>,
    ) -> Result<KinAccount> {
        self.kin_account_with_options(seed, channel_seeds, app_id, ChannelOptions::default())
            .await
    }

    pub async fn kin_account_with_options(
        &self,
        seed: &str,
        channel_seeds: Option<Vec<String>>,
        app_id: Option<&str>,
        options: ChannelOptions,
    ) -> Result<KinAccount> {
        KinAccount::new(
            self.clone(),
            seed,
            channel_seeds.unwrap_or_default(),
            app_id.unwrap_or(ANON_APP_ID),
            options,
        )
        .await
    }

    pub async fn get_config(&self) -> ClientConfig {
        let (online, error) = match self.gateway.ping().await {
            Ok(()) => (true, None),
            Err(e) => {
                warn!("Horizon is unreachable: {}", e);
                (false, Some(e.to_string()))
            }
        };

        ClientConfig {
            sdk_version: SDK_VERSION.to_string(),
            environment: self.environment.name.clone(),
            horizon: HorizonStatus {
                uri: self.environment.horizon_url.clone(),
                online,
                error,
            },
            transport: TransportConfig {
                pool_size: self.options.pool_size,
                num_retries: self.options.num_retries,
                request_timeout: self.options.request_timeout.as_secs_f64(),
                backoff_factor: self.options.backoff_factor.as_secs_f64(),
            },
        }
    }

    /// Base fee per operation of the latest ledger, in stroops
    pub async fn get_minimum_fee(&self) -> Result<u32> {
        let ledger = self.gateway.latest_ledger().await?;
        ledger.base_fee().ok_or_else(|| KinError::Internal {
            code: "ledger".to_string(),
            detail: format!("ledger {} has no base fee", ledger.sequence),
        })
    }

    /// Native KIN balance
    pub async fn get_account_balance(&self, address: &str) -> Result<f64> {
        Ok(self.get_account_data(address).await?.kin_balance())
    }

    pub async fn does_account_exist(&self, address: &str) -> Result<bool> {
        match self.get_account_data(address).await {
            Ok(_) => Ok(true),
            Err(KinError::AccountNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_account_data(&self, address: &str) -> Result<AccountRecord> {
        check_address(address)?;
        self.gateway
            .account(address)
            .await
            .map_err(|e| account_error(e, address))
    }

    // ==================== Transactions ====================

    /// Look up a transaction. With `simple`, fails with `CantSimplify` for
    /// transactions that don't fit the simplified view.
    pub async fn get_transaction_data(&self, tx_hash: &str, simple: bool) -> Result<TransactionData> {
        if !is_valid_transaction_hash(tx_hash) {
            return Err(KinError::InvalidTransactionHash(tx_hash.to_string()));
        }

        let record = self.gateway.transaction(tx_hash).await?;
        let raw = RawTransaction::try_from(&record)?;
        if simple {
            return Ok(TransactionData::Simplified(SimplifiedTransaction::try_from(
                &raw,
            )?));
        }
        Ok(TransactionData::Raw(raw))
    }

    /// Up to `query.amount` transactions, fetched page by page
    pub async fn get_account_tx_history(
        &self,
        address: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<TransactionData>> {
        check_address(address)?;
        if query.amount == 0 {
            return Err(KinError::InvalidAmount(
                "history amount must be bigger than 0".to_string(),
            ));
        }

        let order = if query.descending {
            Order::Desc
        } else {
            Order::Asc
        };
        let mut history = Vec::with_capacity(query.amount);
        let mut cursor = query.cursor.clone();

        while history.len() < query.amount {
            let wanted = query.amount - history.len();
            let limit = wanted.min(MAX_RECORDS_PER_REQUEST as usize) as u32;
            let page = self
                .gateway
                .account_transactions(
                    address,
                    &PageQuery {
                        cursor: cursor.clone(),
                        limit,
                        order,
                    },
                )
                .await
                .map_err(|e| account_error(e, address))?;

            for record in &page.records {
                if history.len() == query.amount {
                    break;
                }
                let raw = RawTransaction::try_from(record)?;
                if !query.simple {
                    history.push(TransactionData::Raw(raw));
                    continue;
                }
                match SimplifiedTransaction::try_from(&raw) {
                    Ok(tx) => history.push(TransactionData::Simplified(tx)),
                    Err(KinError::CantSimplify(reason)) => {
                        debug!(hash = %raw.hash, "History transaction skipped: {}", reason)
                    }
                    Err(e) => return Err(e),
                }
            }

            // A short page is the last one
            if page.records.len() < limit as usize {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(history)
    }

    // ==================== Friendbot ====================

    /// Create and fund a new account through the network's friendbot
    pub async fn friendbot(&self, address: &str) -> Result<String> {
        self.require_friendbot()?;
        check_address(address)?;
        if self.does_account_exist(address).await? {
            return Err(KinError::AccountExists {
                address: Some(address.to_string()),
                code: None,
            });
        }

        let response = self
            .gateway
            .friendbot(address, None)
            .await
            .map_err(friendbot_error)?;
        info!(address = %address, hash = %response.hash, "Friendbot created account");
        Ok(response.hash)
    }

    /// Fund an existing account with up to 10000 KIN
    pub async fn friendbot_fund(&self, address: &str, amount: &str) -> Result<String> {
        self.require_friendbot()?;
        let stroops = amount::to_positive_stroops(amount)?;
        if stroops > MAX_FRIENDBOT_AMOUNT_KIN * amount::STROOPS_PER_KIN {
            return Err(KinError::InvalidAmount(format!(
                "{} (friendbot pays at most {})",
                amount, MAX_FRIENDBOT_AMOUNT_KIN
            )));
        }
        check_address(address)?;
        if !self.does_account_exist(address).await? {
            return Err(KinError::AccountNotFound {
                address: Some(address.to_string()),
                code: None,
            });
        }

        let response = self
            .gateway
            .friendbot(address, Some(amount))
            .await
            .map_err(friendbot_error)?;
        info!(address = %address, amount = %amount, "Friendbot funded account");
        Ok(response.hash)
    }

    fn require_friendbot(&self) -> Result<()> {
        if self.environment.friendbot_url.is_none() {
            return Err(KinError::Configuration(format!(
                "no friendbot service configured for {}",
                self.environment.name
            )));
        }
        Ok(())
    }

    // ==================== Monitoring ====================

    /// Call `callback` for every KIN payment to or from `address`
    pub async fn monitor_account_payments<F>(
        &self,
        address: &str,
        callback: F,
    ) -> Result<PaymentMonitor>
    where
        F: Fn(&str, &SimplifiedTransaction) + Send + Sync + 'static,
    {
        PaymentMonitor::account(self.gateway.clone(), address, Arc::new(callback)).await
    }

    /// Call `callback` for every KIN payment touching any of `addresses`
    pub async fn monitor_accounts_payments<F>(
        &self,
        addresses: &[String],
        callback: F,
    ) -> Result<PaymentMonitor>
    where
        F: Fn(&str, &SimplifiedTransaction) + Send + Sync + 'static,
    {
        PaymentMonitor::accounts(self.gateway.clone(), addresses, Arc::new(callback)).await
    }
}

impl std::fmt::Debug for KinClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KinClient")
            .field("environment", &self.environment.name)
            .field("horizon", &self.environment.horizon_url)
            .finish()
    }
}

fn check_address(address: &str) -> Result<()> {
    if !is_valid_address(address) {
        return Err(KinError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn friendbot_error(err: GatewayError) -> KinError {
    match err {
        GatewayError::UnexpectedStatus { status, body } => KinError::Friendbot { status, body },
        GatewayError::Horizon(problem) => KinError::Friendbot {
            status: problem.status,
            body: problem.detail.unwrap_or(problem.title),
        },
        other => other.into(),
    }
}
