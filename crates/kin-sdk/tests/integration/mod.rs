//! Integration Tests Module
//!
//! Test categories:
//! - `builder_flow`: transaction builder against the ledger (sequence, clear, memo)
//! - `channel_flow`: channel manager (exclusivity, release, top-up, busy pool)
//! - `account_flow`: account facade (sends, validation, whitelisting, status)
//! - `client_flow`: queries, history paging, friendbot, HD channels
//! - `monitor_flow`: payment monitors over the event stream


mod builder_flow;
mod channel_flow;
mod monitor_flow;

use kin_sdk::{Environment, Keypair, KinClient, LedgerGateway};
use mock_ledger::MockLedger;
use std::sync::Arc;

pub const TEST_PASSPHRASE: &str = "Kin Test Network ; October 2018";

pub fn test_environment() -> Environment {
    Environment::new(
        "test",
        "http://horizon.test",
        TEST_PASSPHRASE,
        Some("http://friendbot.test"),
    )
    .expect("valid test environment")
}

/// Honours RUST_LOG; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub environment: Environment,
    pub ledger: Arc<MockLedger>,
    pub client: KinClient,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let environment = test_environment();
        let ledger = Arc::new(MockLedger::new(&environment));
        let client = KinClient::with_gateway(environment.clone(), ledger.clone());
        Self {
            environment,
            ledger,
            client,
        }
    }

    pub fn gateway(&self) -> Arc<dyn LedgerGateway> {
        self.ledger.clone()
    }

    /// Random keypair whose account holds `kin`
    pub fn funded(&self, kin: i64) -> Keypair {
        let keypair = Keypair::random();
        self.ledger.fund(keypair.public_address(), kin);
        keypair
    }

    /// Random keypairs for `count` channel accounts holding `kin` each
    pub fn channels(&self, count: usize, kin: i64) -> Vec<Keypair> {
        (0..count).map(|_| self.funded(kin)).collect()
    }
}

pub fn seeds(keypairs: &[Keypair]) -> Vec<String> {
    keypairs.iter().map(|k| k.secret_seed().to_string()).collect()
}
