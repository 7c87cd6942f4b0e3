// ============================================================================
// KIN-SDK - Horizon Gateway
// ============================================================================
// Everything the SDK needs from the ledger goes through `LedgerGateway`.
// `HorizonClient` is the HTTP implementation; tests swap in an in-memory one.
//
// Reads are retried with backoff. Submissions are sent exactly once.
// ============================================================================

use crate::config::{Environment, HorizonOptions};
use crate::error::{GatewayError, KinError};
use crate::retry::RetryPolicy;
use crate::sse::{self, Cursored};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Live transactions, oldest first
pub type TransactionStream = BoxStream<'static, GatewayResult<TransactionRecord>>;

/// Prefix of Horizon problem `type` URLs
pub const PROBLEM_TYPE_PREFIX: &str = "https://stellar.org/horizon-errors/";

// ============================================================================
// DATA TYPES
// ============================================================================

/// Account balance line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// "native" for KIN, "credit_alphanum4"/"credit_alphanum12" otherwise
    pub asset_type: String,

    #[serde(default)]
    pub asset_code: Option<String>,

    #[serde(default)]
    pub asset_issuer: Option<String>,

    /// Decimal string, 7 fractional digits
    pub balance: String,

    #[serde(default)]
    pub limit: Option<String>,
}

impl Balance {
    pub fn is_native(&self) -> bool {
        self.asset_type == "native"
    }

    pub fn amount(&self) -> f64 {
        self.balance.parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountThresholds {
    pub low_threshold: u8,
    pub med_threshold: u8,
    pub high_threshold: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountFlags {
    pub auth_required: bool,
    pub auth_revocable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSigner {
    #[serde(default)]
    pub key: Option<String>,

    /// Older Horizon name for `key`
    #[serde(default)]
    pub public_key: Option<String>,

    pub weight: u32,

    #[serde(rename = "type", default)]
    pub signer_type: String,
}

/// Account as Horizon reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Public address
    pub id: String,

    /// Current sequence number (int64 as string)
    pub sequence: String,

    pub balances: Vec<Balance>,

    #[serde(default)]
    pub subentry_count: u32,

    #[serde(default)]
    pub thresholds: AccountThresholds,

    #[serde(default)]
    pub flags: AccountFlags,

    #[serde(default)]
    pub signers: Vec<AccountSigner>,

    /// Base64 values keyed by name
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl AccountRecord {
    pub fn sequence_number(&self) -> GatewayResult<i64> {
        self.sequence
            .parse()
            .map_err(|_| GatewayError::Decode(format!("bad sequence {:?}", self.sequence)))
    }

    /// Native KIN balance
    pub fn kin_balance(&self) -> f64 {
        self.balances
            .iter()
            .find(|b| b.is_native())
            .map(|b| b.amount())
            .unwrap_or(0.0)
    }
}

/// Transaction as Horizon reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,

    #[serde(default)]
    pub ledger: u64,

    pub created_at: DateTime<Utc>,

    pub source_account: String,

    /// Base64 transaction envelope
    pub envelope_xdr: String,

    #[serde(default)]
    pub memo_type: String,

    #[serde(default)]
    pub memo: Option<String>,

    pub paging_token: String,

    #[serde(default)]
    pub fee_paid: Option<u64>,
}

impl Cursored for TransactionRecord {
    fn paging_token(&self) -> &str {
        &self.paging_token
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub sequence: u64,

    #[serde(default)]
    pub base_fee_in_stroops: Option<u32>,

    /// Older Horizon name for the same value
    #[serde(default)]
    pub base_fee: Option<u32>,

    #[serde(default)]
    pub paging_token: String,
}

impl LedgerRecord {
    pub fn base_fee(&self) -> Option<u32> {
        self.base_fee_in_stroops.or(self.base_fee)
    }
}

impl Cursored for LedgerRecord {
    fn paging_token(&self) -> &str {
        &self.paging_token
    }
}

/// Accepted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub hash: String,

    #[serde(default)]
    pub ledger: Option<u64>,

    #[serde(default)]
    pub envelope_xdr: Option<String>,

    #[serde(default)]
    pub result_xdr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendbotResponse {
    pub hash: String,
}

/// One page of a Horizon collection
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Token of the last record, feed it back to continue
    pub next_cursor: Option<String>,
}

impl<T: Cursored> Page<T> {
    pub fn new(records: Vec<T>) -> Self {
        let next_cursor = records.last().map(|r| r.paging_token().to_string());
        Self {
            records,
            next_cursor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: u32,
    pub order: Order,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 10,
            order: Order::Desc,
        }
    }
}

#[derive(Deserialize)]
struct Embedded<T> {
    #[serde(rename = "_embedded")]
    embedded: Records<T>,
}

#[derive(Deserialize)]
struct Records<T> {
    records: Vec<T>,
}

// ============================================================================
// PROBLEM DOCUMENTS
// ============================================================================

/// Horizon error response (RFC 7807 problem)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizonProblem {
    #[serde(rename = "type", default)]
    pub problem_type: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: u16,

    #[serde(default)]
    pub detail: Option<String>,

    #[serde(default)]
    pub extras: Option<ProblemExtras>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemExtras {
    #[serde(default)]
    pub invalid_field: Option<String>,

    #[serde(default)]
    pub envelope_xdr: Option<String>,

    #[serde(default)]
    pub result_xdr: Option<String>,

    #[serde(default)]
    pub result_codes: Option<ResultCodes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCodes {
    #[serde(default)]
    pub transaction: Option<String>,

    #[serde(default)]
    pub operations: Option<Vec<String>>,
}

impl HorizonProblem {
    pub fn new(kind: &str, status: u16) -> Self {
        Self {
            problem_type: format!("{}{}", PROBLEM_TYPE_PREFIX, kind),
            title: kind.replace('_', " "),
            status,
            detail: None,
            extras: None,
        }
    }

    /// A `transaction_failed` problem carrying the given result codes
    pub fn transaction_failed(tx_code: &str, op_codes: &[&str]) -> Self {
        let mut problem = Self::new(crate::error::problem_types::TRANSACTION_FAILED, 400);
        problem.extras = Some(ProblemExtras {
            result_codes: Some(ResultCodes {
                transaction: Some(tx_code.to_string()),
                operations: Some(op_codes.iter().map(|c| c.to_string()).collect()),
            }),
            ..ProblemExtras::default()
        });
        problem
    }

    /// Last path segment of the type URL, e.g. `transaction_failed`
    pub fn kind(&self) -> &str {
        self.problem_type
            .rsplit('/')
            .next()
            .unwrap_or(&self.problem_type)
    }

    pub fn transaction_code(&self) -> Option<&str> {
        self.result_codes()?.transaction.as_deref()
    }

    pub fn operation_codes(&self) -> &[String] {
        self.result_codes()
            .and_then(|rc| rc.operations.as_deref())
            .unwrap_or(&[])
    }

    pub fn invalid_field(&self) -> Option<&str> {
        self.extras.as_ref()?.invalid_field.as_deref()
    }

    fn result_codes(&self) -> Option<&ResultCodes> {
        self.extras.as_ref()?.result_codes.as_ref()
    }
}

// ============================================================================
// GATEWAY TRAIT
// ============================================================================

/// Ledger access used by the rest of the SDK
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn account(&self, address: &str) -> GatewayResult<AccountRecord>;

    async fn transaction(&self, hash: &str) -> GatewayResult<TransactionRecord>;

    async fn account_transactions(
        &self,
        address: &str,
        query: &PageQuery,
    ) -> GatewayResult<Page<TransactionRecord>>;

    async fn latest_ledger(&self) -> GatewayResult<LedgerRecord>;

    /// Submit a base64 envelope. Must not retry.
    async fn submit(&self, envelope_xdr: &str) -> GatewayResult<SubmitResponse>;

    /// Stream transactions touching `address`, or every ledger transaction
    /// when `None`. Starts at `cursor`, or at "now".
    async fn stream_transactions(
        &self,
        address: Option<&str>,
        cursor: Option<&str>,
    ) -> GatewayResult<TransactionStream>;

    /// Succeeds when Horizon answers
    async fn ping(&self) -> GatewayResult<()>;

    /// Ask the network's friendbot to create (no amount) or fund an account
    async fn friendbot(
        &self,
        address: &str,
        amount: Option<&str>,
    ) -> GatewayResult<FriendbotResponse>;
}

// ============================================================================
// HORIZON CLIENT
// ============================================================================

pub struct HorizonClient {
    horizon_url: String,
    friendbot_url: Option<String>,
    http: Client,
    stream_http: Client,
    retry: RetryPolicy,
}

impl HorizonClient {
    pub fn new(environment: &Environment, options: &HorizonOptions) -> Result<Self> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .user_agent(options.user_agent.clone())
            .pool_max_idle_per_host(options.pool_size)
            .build()
            .map_err(|e| KinError::Configuration(format!("http client: {}", e)))?;

        // Streams stay open indefinitely; only bound the connect
        let stream_http = Client::builder()
            .connect_timeout(options.request_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| KinError::Configuration(format!("stream client: {}", e)))?;

        Ok(Self {
            horizon_url: environment.horizon_url.clone(),
            friendbot_url: environment.friendbot_url.clone(),
            http,
            stream_http,
            retry: RetryPolicy::from_options(options),
        })
    }

    pub fn horizon_url(&self) -> &str {
        &self.horizon_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.horizon_url, path)
    }

    /// Idempotent GET, retried per policy
    async fn get<T: DeserializeOwned>(
        &self,
        url: String,
        query: Vec<(&'static str, String)>,
    ) -> GatewayResult<T> {
        let http = &self.http;
        let url = &url;
        let query = &query;
        self.retry
            .execute(|| async move {
                let response = http.get(url).query(query).send().await?;
                decode(response).await
            })
            .await
    }
}

/// Parse a success body as `T`, anything else as a problem document
async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()));
    }

    match serde_json::from_str::<HorizonProblem>(&body) {
        Ok(mut problem) if !problem.problem_type.is_empty() => {
            if problem.status == 0 {
                problem.status = status.as_u16();
            }
            Err(GatewayError::Horizon(problem))
        }
        _ => Err(GatewayError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        }),
    }
}

#[async_trait]
impl LedgerGateway for HorizonClient {
    async fn account(&self, address: &str) -> GatewayResult<AccountRecord> {
        debug!("Loading account: {}", address);
        self.get(self.url(&format!("/accounts/{}", address)), Vec::new())
            .await
    }

    async fn transaction(&self, hash: &str) -> GatewayResult<TransactionRecord> {
        self.get(self.url(&format!("/transactions/{}", hash)), Vec::new())
            .await
    }

    async fn account_transactions(
        &self,
        address: &str,
        query: &PageQuery,
    ) -> GatewayResult<Page<TransactionRecord>> {
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("order", query.order.as_str().to_string()),
        ];
        if let Some(cursor) = &query.cursor {
            params.push(("cursor", cursor.clone()));
        }

        let page: Embedded<TransactionRecord> = self
            .get(self.url(&format!("/accounts/{}/transactions", address)), params)
            .await?;
        Ok(Page::new(page.embedded.records))
    }

    async fn latest_ledger(&self) -> GatewayResult<LedgerRecord> {
        let params = vec![("order", "desc".to_string()), ("limit", "1".to_string())];
        let page: Embedded<LedgerRecord> = self.get(self.url("/ledgers"), params).await?;
        page.embedded
            .records
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode("no ledgers".to_string()))
    }

    async fn submit(&self, envelope_xdr: &str) -> GatewayResult<SubmitResponse> {
        debug!("Submitting transaction...");

        let response = self
            .http
            .post(self.url("/transactions"))
            .form(&[("tx", envelope_xdr)])
            .send()
            .await?;

        let result = decode::<SubmitResponse>(response).await;
        match &result {
            Ok(accepted) => debug!("Transaction accepted: {}", accepted.hash),
            Err(GatewayError::Horizon(problem)) => warn!(
                "Transaction rejected: tx: {:?}, ops: {:?}",
                problem.transaction_code(),
                problem.operation_codes()
            ),
            Err(e) => warn!("Transaction submission failed: {}", e),
        }
        result
    }

    async fn stream_transactions(
        &self,
        address: Option<&str>,
        cursor: Option<&str>,
    ) -> GatewayResult<TransactionStream> {
        let url = match address {
            Some(address) => self.url(&format!("/accounts/{}/transactions", address)),
            None => self.url("/transactions"),
        };
        Ok(sse::subscribe(
            self.stream_http.clone(),
            url,
            cursor.map(str::to_string),
        ))
    }

    async fn ping(&self) -> GatewayResult<()> {
        let _: serde_json::Value = self.get(self.url("/"), Vec::new()).await?;
        Ok(())
    }

    async fn friendbot(
        &self,
        address: &str,
        amount: Option<&str>,
    ) -> GatewayResult<FriendbotResponse> {
        let base = self.friendbot_url.as_deref().ok_or_else(|| {
            GatewayError::Transport("network has no friendbot".to_string())
        })?;

        let (url, mut params) = match amount {
            Some(amount) => (format!("{}/fund", base), vec![("amount", amount.to_string())]),
            None => (base.to_string(), Vec::new()),
        };
        params.push(("addr", address.to_string()));

        debug!("Requesting friendbot funding for: {}", address);

        let response = self.http.get(&url).query(&params).send().await?;
        decode(response).await
    }
}
