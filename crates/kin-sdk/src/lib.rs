// ============================================================================
// KIN-SDK - Kin Blockchain Client
// ============================================================================
// Async SDK for the Kin blockchain, a ledger speaking the Stellar protocol.
//
// The interesting part is transaction submission: every send borrows a
// "channel" account from a fixed pool, so many callers can submit in
// parallel without fighting over one sequence number. Channels pay the fee,
// the base account owns the funds and co-signs.
//
// Features:
// - Keypairs, address/seed validation, HD channel derivation
// - Payments and account creation through the channel pool
// - Automatic top-up of channels that run out of fee balance
// - Horizon queries (accounts, transactions, history, fees)
// - Payment monitoring over server-sent events
// - Counter-signing ("whitelisting") of externally built transactions
// ============================================================================

pub mod config;
pub mod error;
pub mod strkey;
pub mod keypair;
pub mod amount;
pub mod memo;
pub mod xdr;
pub mod retry;
pub mod sse;
pub mod horizon;
pub mod builder;
pub mod channels;
pub mod channel_manager;
pub mod transactions;
pub mod monitor;
pub mod client;
pub mod account;
pub mod utils;

pub use config::{ChannelOptions, Environment, HorizonOptions};
pub use error::{GatewayError, KinError};
pub use keypair::Keypair;
pub use strkey::{is_valid_address, is_valid_secret_key, is_valid_transaction_hash};
pub use xdr::{Asset, Memo, TransactionEnvelope};
pub use horizon::{
    AccountRecord, Balance, HorizonClient, LedgerGateway, Order, Page, PageQuery, SubmitResponse,
    TransactionRecord,
};
pub use builder::TransactionBuilder;
pub use channels::{ChannelLease, ChannelPool, ChannelStatus, PoolStatus};
pub use channel_manager::{ChannelManager, PreparedTransaction};
pub use transactions::{
    OperationType, RawTransaction, SimplifiedOperation, SimplifiedTransaction, TransactionData,
};
pub use monitor::PaymentMonitor;
pub use client::{HistoryQuery, KinClient};
pub use account::{KinAccount, WhitelistPayload};
pub use utils::{create_channels, get_hd_channels};

/// Re-export for convenience
pub type Result<T> = std::result::Result<T, KinError>;
