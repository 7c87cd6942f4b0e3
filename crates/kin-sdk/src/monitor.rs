// ============================================================================
// KIN-SDK - Payment Monitor
// ============================================================================
// Watches the gateway's transaction stream and hands every simple KIN
// payment touching a watched address to a callback. Runs on its own task;
// `stop()` (or dropping the monitor) ends it.
//
// Two flavours:
// - account: streams one account's transactions
// - ledger-wide: streams every transaction, filters on a mutable address set.
//   A payment between two watched addresses is delivered once per side.
// ============================================================================

use crate::error::KinError;
use crate::horizon::{LedgerGateway, TransactionRecord};
use crate::strkey::is_valid_address;
use crate::transactions::{OperationType, RawTransaction, SimplifiedTransaction};
use crate::Result;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Called with (watched address, payment)
pub type PaymentCallback = Arc<dyn Fn(&str, &SimplifiedTransaction) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Account,
    Ledger,
}

pub struct PaymentMonitor {
    scope: Scope,
    addresses: Arc<RwLock<HashSet<String>>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PaymentMonitor {
    /// Watch payments to or from one account
    pub async fn account(
        gateway: Arc<dyn LedgerGateway>,
        address: &str,
        callback: PaymentCallback,
    ) -> Result<Self> {
        validate(address)?;
        let stream = gateway
            .stream_transactions(Some(address), None)
            .await
            .map_err(KinError::from)?;

        info!(address = %address, "Monitoring account payments");
        Ok(Self::spawn(
            Scope::Account,
            HashSet::from([address.to_string()]),
            stream,
            callback,
        ))
    }

    /// Watch payments touching any of `addresses`, ledger-wide
    pub async fn accounts(
        gateway: Arc<dyn LedgerGateway>,
        addresses: &[String],
        callback: PaymentCallback,
    ) -> Result<Self> {
        for address in addresses {
            validate(address)?;
        }
        let stream = gateway
            .stream_transactions(None, None)
            .await
            .map_err(KinError::from)?;

        info!(count = addresses.len(), "Monitoring payments for multiple accounts");
        Ok(Self::spawn(
            Scope::Ledger,
            addresses.iter().cloned().collect(),
            stream,
            callback,
        ))
    }

    fn spawn(
        scope: Scope,
        addresses: HashSet<String>,
        mut stream: crate::horizon::TransactionStream,
        callback: PaymentCallback,
    ) -> Self {
        let addresses = Arc::new(RwLock::new(addresses));
        let (stop, mut stopped) = watch::channel(false);

        let watched = addresses.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    // Also fires when the monitor is dropped
                    _ = stopped.changed() => break,
                    next = stream.next() => match next {
                        Some(Ok(record)) => dispatch(scope, &watched, &record, &callback),
                        Some(Err(e)) => warn!("Monitor stream error: {}", e),
                        None => {
                            debug!("Monitor stream ended");
                            break;
                        }
                    },
                }
            }
            debug!("Monitor task finished");
        });

        Self {
            scope,
            addresses,
            stop,
            task: Some(task),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Currently watched addresses
    pub fn addresses(&self) -> Vec<String> {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Start watching another address (ledger-wide monitors only)
    pub fn add_address(&self, address: &str) -> Result<()> {
        self.check_mutable()?;
        validate(address)?;
        self.addresses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string());
        debug!(address = %address, "Monitor address added");
        Ok(())
    }

    /// Stop watching an address (ledger-wide monitors only)
    pub fn remove_address(&self, address: &str) -> Result<()> {
        self.check_mutable()?;
        self.addresses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
        debug!(address = %address, "Monitor address removed");
        Ok(())
    }

    /// Stop the monitor and wait for its task to finish
    pub async fn stop(&mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Monitor task failed: {}", e);
            }
        }
        info!("Monitor stopped");
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(KinError::StoppedMonitor);
        }
        if self.scope == Scope::Account {
            return Err(KinError::Configuration(
                "an account monitor watches a fixed address".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for PaymentMonitor {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

impl std::fmt::Debug for PaymentMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentMonitor")
            .field("scope", &self.scope)
            .field("addresses", &self.addresses())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn validate(address: &str) -> Result<()> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(KinError::InvalidAddress(address.to_string()))
    }
}

fn dispatch(
    scope: Scope,
    watched: &RwLock<HashSet<String>>,
    record: &TransactionRecord,
    callback: &PaymentCallback,
) {
    let Some(tx) = simplify(record) else {
        return;
    };
    let destination = tx.operation.destination.as_deref().unwrap_or_default();

    let targets: Vec<String> = {
        let watched = watched.read().unwrap_or_else(PoisonError::into_inner);
        match scope {
            // The account stream only carries this account's transactions
            Scope::Account => watched.iter().take(1).cloned().collect(),
            Scope::Ledger => [tx.source.as_str(), destination]
                .into_iter()
                .filter(|a| watched.contains(*a))
                .map(str::to_string)
                .collect(),
        }
    };

    for address in targets {
        callback(&address, &tx);
    }
}

/// Payments only; anything else is skipped
fn simplify(record: &TransactionRecord) -> Option<SimplifiedTransaction> {
    let raw = match RawTransaction::try_from(record) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(hash = %record.hash, "Undecodable stream transaction skipped: {}", e);
            return None;
        }
    };
    let tx = match SimplifiedTransaction::try_from(&raw) {
        Ok(tx) => tx,
        Err(e) => {
            debug!(hash = %record.hash, "Stream transaction couldn't be simplified: {}", e);
            return None;
        }
    };
    if tx.operation.op_type != OperationType::Payment {
        debug!(hash = %record.hash, "Non-payment stream transaction skipped");
        return None;
    }
    Some(tx)
}
