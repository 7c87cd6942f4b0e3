// ============================================================================
// KIN-SDK - Channel Manager
// ============================================================================
// Sends transactions through the channel pool:
//
//   1. lease a FREE channel (or fail with ChannelsBusy)
//   2. build on that channel's builder; when the channel isn't the base
//      account, operations are sourced from the base account
//   3. sign with the channel key, co-sign with the base key
//   4. submit once; if the channel can't pay the fee, top it up from the
//      base account and resubmit the same envelope
//   5. clear the builder and release the channel, always
//
// Top-ups share one base-account builder and are serialised by its lock.
// ============================================================================

use crate::amount;
use crate::builder::TransactionBuilder;
use crate::channels::{ChannelLease, ChannelPool, PoolStatus};
use crate::config::{ChannelOptions, Environment};
use crate::error::{GatewayError, KinError};
use crate::horizon::{LedgerGateway, SubmitResponse};
use crate::keypair::Keypair;
use crate::xdr::Asset;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub struct ChannelManager {
    gateway: Arc<dyn LedgerGateway>,
    base: Keypair,
    pool: ChannelPool,
    /// Index-aligned with the pool's channels
    builders: Vec<Arc<Mutex<TransactionBuilder>>>,
    /// Used only for top-ups
    base_builder: Mutex<TransactionBuilder>,
    options: ChannelOptions,
}

/// Result of one submission attempt
enum SubmitOutcome {
    Accepted(SubmitResponse),
    ChannelUnderfunded(GatewayError),
    Rejected(GatewayError),
}

impl ChannelManager {
    /// With no channel seeds the base account is its own single channel
    pub fn new(
        environment: &Environment,
        gateway: Arc<dyn LedgerGateway>,
        base: Keypair,
        channel_seeds: &[String],
        fee: u32,
        options: ChannelOptions,
    ) -> Result<Self> {
        let seeds = if channel_seeds.is_empty() {
            vec![base.secret_seed().to_string()]
        } else {
            channel_seeds.to_vec()
        };
        let pool = ChannelPool::new(&seeds)?;

        // Top-ups sign with the base account outside the pool, so the base
        // can only be a channel when it is the only one
        if pool.size() > 1
            && pool
                .channels()
                .iter()
                .any(|c| c.address() == base.public_address())
        {
            return Err(KinError::Configuration(
                "the base account can't share the pool with other channels".to_string(),
            ));
        }

        let builders = pool
            .channels()
            .iter()
            .map(|channel| {
                TransactionBuilder::new(environment, gateway.clone(), fee, channel.seed())
                    .map(|b| Arc::new(Mutex::new(b)))
            })
            .collect::<Result<Vec<_>>>()?;
        let base_builder =
            TransactionBuilder::new(environment, gateway.clone(), fee, base.secret_seed())?;

        info!(
            base = %base.public_address(),
            channels = pool.size(),
            "Channel manager ready"
        );

        Ok(Self {
            gateway,
            base,
            pool,
            builders,
            base_builder: Mutex::new(base_builder),
            options,
        })
    }

    pub fn base_address(&self) -> &str {
        self.base.public_address()
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn get_status(&self, verbose: bool) -> PoolStatus {
        self.pool.status_snapshot(verbose)
    }

    // ==================== Building ====================

    /// Lease a channel and build a signed transaction on it.
    ///
    /// `attach` adds operations to the builder. Its second argument is the
    /// source every operation must use: the base address when the channel
    /// is a separate account, `None` when the base account is the channel.
    /// The channel stays leased until the returned transaction is submitted
    /// or dropped.
    pub async fn build_transaction<F>(
        &self,
        attach: F,
        fee: u32,
        memo: Option<&str>,
    ) -> Result<PreparedTransaction<'_>>
    where
        F: FnOnce(&mut TransactionBuilder, Option<&str>) -> Result<()> + Send,
    {
        let lease = self.pool.acquire(self.options.acquire_timeout).await?;
        let builder = self.builders[lease.channel().index()]
            .clone()
            .lock_owned()
            .await;

        let mut prepared = PreparedTransaction {
            manager: self,
            builder,
            lease,
            hash: String::new(),
        };
        prepared.builder.clear();
        prepared.builder.set_fee(fee);

        let source = prepared.operation_source();
        attach(&mut *prepared.builder, source)?;
        if let Some(memo) = memo {
            prepared.builder.add_text_memo(memo)?;
        }

        prepared.builder.sign().await?;
        if source.is_some() {
            prepared.builder.sign_with(&self.base)?;
        }
        prepared.hash = prepared.builder.hash()?;

        debug!(
            channel = %prepared.channel_address(),
            hash = %prepared.hash,
            "Transaction built"
        );
        Ok(prepared)
    }

    /// Build and submit in one go; the channel is released either way
    pub async fn send_transaction<F>(
        &self,
        attach: F,
        fee: u32,
        memo: Option<&str>,
    ) -> Result<SubmitResponse>
    where
        F: FnOnce(&mut TransactionBuilder, Option<&str>) -> Result<()> + Send,
    {
        self.build_transaction(attach, fee, memo)
            .await?
            .submit()
            .await
    }

    // ==================== Submission ====================

    async fn submit_on_channel(
        &self,
        lease: &ChannelLease,
        builder: &TransactionBuilder,
    ) -> Result<SubmitResponse> {
        let envelope = builder.envelope_xdr()?;
        let channel = lease.channel().address();
        let mut top_ups = 0;

        loop {
            match self.attempt(&envelope).await {
                SubmitOutcome::Accepted(response) => {
                    debug!(channel = %channel, hash = %response.hash, "Transaction accepted");
                    return Ok(response);
                }
                SubmitOutcome::Rejected(err) => return Err(err.into()),
                SubmitOutcome::ChannelUnderfunded(err) => {
                    // The base account paying its own fee can't be topped up
                    if channel == self.base.public_address() {
                        return Err(err.into());
                    }
                    if top_ups >= self.options.max_top_ups {
                        warn!(channel = %channel, top_ups, "Channel still underfunded, giving up");
                        return Err(err.into());
                    }
                    top_ups += 1;

                    lease.mark_underfunded();
                    let topped = self.top_up(channel, builder.fee()).await;
                    lease.mark_taken();
                    topped?;
                }
            }
        }
    }

    async fn attempt(&self, envelope: &str) -> SubmitOutcome {
        match self.gateway.submit(envelope).await {
            Ok(response) => SubmitOutcome::Accepted(response),
            Err(err) if err.is_insufficient_balance() => SubmitOutcome::ChannelUnderfunded(err),
            Err(err) => SubmitOutcome::Rejected(err),
        }
    }

    /// Pay `fee * top_up_transactions` from the base account to `channel`
    async fn top_up(&self, channel: &str, fee: u32) -> Result<()> {
        let amount = amount::from_stroops(i64::from(fee) * self.options.top_up_transactions);
        info!(channel = %channel, amount = %amount, "Topping up channel");

        let mut builder = self.base_builder.lock().await;
        builder.clear();
        let result: Result<SubmitResponse> = async {
            builder.append_payment_op(channel, &amount, Asset::Native, None)?;
            builder.sign().await?;
            let xdr = builder.envelope_xdr()?;
            self.gateway.submit(&xdr).await.map_err(KinError::from)
        }
        .await;
        builder.clear();

        match result {
            Ok(response) => {
                debug!(channel = %channel, hash = %response.hash, "Top-up accepted");
                Ok(())
            }
            Err(err) => {
                warn!(channel = %channel, error = %err, "Top-up failed");
                Err(err)
            }
        }
    }
}

// ============================================================================
// PREPARED TRANSACTION
// ============================================================================

/// A signed transaction holding its channel. Dropping it without submitting
/// clears the builder and frees the channel.
pub struct PreparedTransaction<'a> {
    manager: &'a ChannelManager,
    // Dropped before the lease so the next holder finds the builder unlocked
    builder: OwnedMutexGuard<TransactionBuilder>,
    lease: ChannelLease,
    hash: String,
}

impl<'a> PreparedTransaction<'a> {
    /// Hex transaction hash
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn channel_address(&self) -> &str {
        self.lease.channel().address()
    }

    pub fn envelope_xdr(&self) -> Result<String> {
        self.builder.envelope_xdr()
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    /// Submit, topping up the channel if needed, then release it
    pub async fn submit(self) -> Result<SubmitResponse> {
        self.manager
            .submit_on_channel(&self.lease, &self.builder)
            .await
    }

    /// Give the channel back without submitting
    pub fn release(self) {}

    fn operation_source(&self) -> Option<&'a str> {
        let base = self.manager.base.public_address();
        (self.lease.channel().address() != base).then_some(base)
    }
}

impl Drop for PreparedTransaction<'_> {
    fn drop(&mut self) {
        self.builder.clear();
    }
}

impl std::fmt::Debug for PreparedTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTransaction")
            .field("hash", &self.hash)
            .field("channel", &self.channel_address())
            .finish()
    }
}
