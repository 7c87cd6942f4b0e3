// ============================================================================
// KIN-SDK - Error Types
// ============================================================================
// Two layers. `GatewayError` is what the Horizon transport reports: a raw
// transport failure, a problem document, or a reply we couldn't decode.
// `KinError` is what callers see. The translation tables below turn Horizon
// result codes into the SDK taxonomy.

use crate::horizon::HorizonProblem;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KinError {
    // ==================== Input Errors ====================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid secret seed")]
    InvalidSeed,

    #[error("Invalid transaction hash: {0}")]
    InvalidTransactionHash(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} has more than {max_digits} fractional digits")]
    Precision { amount: String, max_digits: usize },

    #[error("Memo is {length} bytes, maximum is {cap}")]
    MemoTooLong { length: usize, cap: usize },

    #[error("Invalid app id: {0}")]
    InvalidAppId(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    // ==================== Channel Errors ====================
    #[error("All channels are busy, try again later")]
    ChannelsBusy,

    // ==================== Ledger Errors ====================
    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad request ({code})")]
    Request {
        code: String,
        invalid_field: Option<String>,
    },

    #[error("Server error ({0})")]
    Server(String),

    #[error("Resource not found ({0})")]
    ResourceNotFound(String),

    #[error("Account not found: {}", .address.as_deref().unwrap_or("unknown"))]
    AccountNotFound {
        address: Option<String>,
        code: Option<String>,
    },

    #[error("Account already exists: {}", .address.as_deref().unwrap_or("unknown"))]
    AccountExists {
        address: Option<String>,
        code: Option<String>,
    },

    #[error("Account not activated: {}", .address.as_deref().unwrap_or("unknown"))]
    AccountNotActivated {
        address: Option<String>,
        code: Option<String>,
    },

    #[error("Low balance ({0})")]
    LowBalance(String),

    #[error("Internal error ({code}): {detail}")]
    Internal { code: String, detail: String },

    #[error("Friendbot error: HTTP {status}: {body}")]
    Friendbot { status: u16, body: String },

    // ==================== Transaction Errors ====================
    #[error("Transaction can't be simplified: {0}")]
    CantSimplify(String),

    #[error("Wrong network: expected {expected}, got {actual}")]
    WrongNetwork { expected: String, actual: String },

    #[error("XDR codec error: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== Monitor Errors ====================
    #[error("Monitor is stopped")]
    StoppedMonitor,
}

impl KinError {
    /// True for failures where trying the same call again later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KinError::ChannelsBusy | KinError::Network(_) | KinError::Server(_)
        )
    }
}

impl From<serde_json::Error> for KinError {
    fn from(err: serde_json::Error) -> Self {
        KinError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for KinError {
    fn from(err: hex::FromHexError) -> Self {
        KinError::Codec(format!("hex: {}", err))
    }
}

impl From<base64::DecodeError> for KinError {
    fn from(err: base64::DecodeError) -> Self {
        KinError::Codec(format!("base64: {}", err))
    }
}

// ============================================================================
// GATEWAY ERRORS
// ============================================================================

/// Failure reported by a `LedgerGateway`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("horizon problem: {} ({})", .0.title, .0.status)]
    Horizon(HorizonProblem),

    /// Non-success reply that wasn't a problem document
    #[error("unexpected HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid horizon reply: {0}")]
    Decode(String),
}

impl GatewayError {
    /// The transaction source can't pay the fee. An underfunded operation
    /// doesn't count: that's the operation source running dry.
    pub fn is_insufficient_balance(&self) -> bool {
        match self {
            GatewayError::Horizon(problem) => {
                problem.transaction_code() == Some(tx_codes::INSUFFICIENT_BALANCE)
            }
            _ => false,
        }
    }

    /// Transport hiccups and overload statuses; safe to retry for reads
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Horizon(p) => RETRY_STATUSES.contains(&p.status),
            GatewayError::UnexpectedStatus { status, .. } => RETRY_STATUSES.contains(status),
            GatewayError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Statuses worth another attempt
pub const RETRY_STATUSES: [u16; 4] = [413, 429, 503, 504];

/// Horizon problem types (the last path segment of the `type` URL)
pub mod problem_types {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_ACCEPTABLE: &str = "not_acceptable";
    pub const NOT_FOUND: &str = "not_found";
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVER_OVER_CAPACITY: &str = "server_over_capacity";
    pub const STALE_HISTORY: &str = "stale_history";
    pub const TIMEOUT: &str = "timeout";
    pub const TRANSACTION_MALFORMED: &str = "transaction_malformed";
    pub const TRANSACTION_FAILED: &str = "transaction_failed";
    pub const UNSUPPORTED_MEDIA_TYPE: &str = "unsupported_media_type";
    pub const BEFORE_HISTORY: &str = "before_history";
}

/// Transaction-level result codes
pub mod tx_codes {
    pub const FAILED: &str = "tx_failed";
    pub const TOO_EARLY: &str = "tx_too_early";
    pub const TOO_LATE: &str = "tx_too_late";
    pub const MISSING_OPERATION: &str = "tx_missing_operation";
    pub const BAD_SEQUENCE: &str = "tx_bad_seq";
    pub const BAD_AUTH: &str = "tx_bad_auth";
    pub const INSUFFICIENT_BALANCE: &str = "tx_insufficient_balance";
    pub const NO_ACCOUNT: &str = "tx_no_source_account";
    pub const INSUFFICIENT_FEE: &str = "tx_insufficient_fee";
    pub const BAD_AUTH_EXTRA: &str = "tx_bad_auth_extra";
    pub const INTERNAL_ERROR: &str = "tx_internal_error";
}

/// Operation-level result codes
pub mod op_codes {
    pub const INNER: &str = "op_inner";
    pub const BAD_AUTH: &str = "op_bad_auth";
    pub const NO_ACCOUNT: &str = "op_no_source_account";
    pub const MALFORMED: &str = "op_malformed";
    pub const UNDERFUNDED: &str = "op_underfunded";
    pub const LOW_RESERVE: &str = "op_low_reserve";
    pub const LINE_FULL: &str = "op_line_full";
    pub const NO_ISSUER: &str = "op_no_issuer";
    pub const NO_TRUST: &str = "op_no_trust";
    pub const NOT_AUTHORIZED: &str = "op_not_authorized";
    pub const SRC_NO_TRUST: &str = "op_src_no_trust";
    pub const SRC_NOT_AUTHORIZED: &str = "op_src_not_authorized";
    pub const NO_DESTINATION: &str = "op_no_destination";
    pub const ALREADY_EXISTS: &str = "op_already_exists";
    pub const INVALID_LIMIT: &str = "op_invalid_limit";
}

// ============================================================================
// TRANSLATION
// ============================================================================

impl From<GatewayError> for KinError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transport(msg) => KinError::Network(msg),
            GatewayError::Decode(msg) => KinError::Internal {
                code: "decode".to_string(),
                detail: msg,
            },
            GatewayError::UnexpectedStatus { status, body } if status >= 500 => {
                KinError::Server(format!("HTTP {}: {}", status, body))
            }
            GatewayError::UnexpectedStatus { status, body } => KinError::Internal {
                code: status.to_string(),
                detail: body,
            },
            GatewayError::Horizon(problem) => translate_problem(&problem),
        }
    }
}

/// Same as the plain conversion but fills in which account was involved
/// and turns a bare 404 into `AccountNotFound`.
pub fn account_error(err: GatewayError, address: &str) -> KinError {
    match KinError::from(err) {
        KinError::ResourceNotFound(code) => KinError::AccountNotFound {
            address: Some(address.to_string()),
            code: Some(code),
        },
        KinError::AccountNotFound { address: None, code } => KinError::AccountNotFound {
            address: Some(address.to_string()),
            code,
        },
        KinError::AccountNotActivated {
            address: None,
            code,
        } => KinError::AccountNotActivated {
            address: Some(address.to_string()),
            code,
        },
        other => other,
    }
}

fn translate_problem(problem: &HorizonProblem) -> KinError {
    let kind = problem.kind();
    match kind {
        problem_types::TRANSACTION_FAILED => translate_result_codes(problem),
        problem_types::NOT_FOUND => KinError::ResourceNotFound(kind.to_string()),
        problem_types::BAD_REQUEST
        | problem_types::FORBIDDEN
        | problem_types::NOT_ACCEPTABLE
        | problem_types::UNSUPPORTED_MEDIA_TYPE
        | problem_types::NOT_IMPLEMENTED
        | problem_types::BEFORE_HISTORY
        | problem_types::STALE_HISTORY
        | problem_types::TRANSACTION_MALFORMED => KinError::Request {
            code: kind.to_string(),
            invalid_field: problem.invalid_field().map(str::to_string),
        },
        problem_types::RATE_LIMIT_EXCEEDED
        | problem_types::SERVER_OVER_CAPACITY
        | problem_types::TIMEOUT => KinError::Server(kind.to_string()),
        _ => KinError::Internal {
            code: kind.to_string(),
            detail: problem.detail.clone().unwrap_or_else(|| problem.title.clone()),
        },
    }
}

fn translate_result_codes(problem: &HorizonProblem) -> KinError {
    let tx_code = problem.transaction_code().unwrap_or(tx_codes::FAILED);
    let op_code = problem.operation_codes().iter().find(|c| *c != "op_success");

    if tx_code == tx_codes::FAILED {
        if let Some(op_code) = op_code {
            return translate_op_code(op_code);
        }
    }
    translate_tx_code(tx_code)
}

fn translate_tx_code(code: &str) -> KinError {
    let owned = Some(code.to_string());
    match code {
        tx_codes::TOO_EARLY
        | tx_codes::TOO_LATE
        | tx_codes::MISSING_OPERATION
        | tx_codes::BAD_SEQUENCE
        | tx_codes::BAD_AUTH
        | tx_codes::BAD_AUTH_EXTRA
        | tx_codes::INSUFFICIENT_FEE => KinError::Request {
            code: code.to_string(),
            invalid_field: None,
        },
        tx_codes::INSUFFICIENT_BALANCE => KinError::LowBalance(code.to_string()),
        tx_codes::NO_ACCOUNT => KinError::AccountNotFound {
            address: None,
            code: owned,
        },
        _ => KinError::Internal {
            code: code.to_string(),
            detail: "transaction failed".to_string(),
        },
    }
}

fn translate_op_code(code: &str) -> KinError {
    let owned = Some(code.to_string());
    match code {
        op_codes::BAD_AUTH
        | op_codes::MALFORMED
        | op_codes::NO_ISSUER
        | op_codes::LINE_FULL
        | op_codes::INVALID_LIMIT => KinError::Request {
            code: code.to_string(),
            invalid_field: None,
        },
        op_codes::NO_ACCOUNT | op_codes::NO_DESTINATION => KinError::AccountNotFound {
            address: None,
            code: owned,
        },
        op_codes::ALREADY_EXISTS => KinError::AccountExists {
            address: None,
            code: owned,
        },
        op_codes::LOW_RESERVE | op_codes::UNDERFUNDED => KinError::LowBalance(code.to_string()),
        op_codes::NO_TRUST
        | op_codes::SRC_NO_TRUST
        | op_codes::NOT_AUTHORIZED
        | op_codes::SRC_NOT_AUTHORIZED => KinError::AccountNotActivated {
            address: None,
            code: owned,
        },
        _ => KinError::Internal {
            code: code.to_string(),
            detail: "operation failed".to_string(),
        },
    }
}
