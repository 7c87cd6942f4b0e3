// ============================================================================
// KIN-SDK - Channel Pool
// ============================================================================
// A fixed set of channel accounts, each FREE, TAKEN or UNDERFUNDED.
//
// `acquire` hands out a random FREE channel wrapped in a `ChannelLease`. The
// lease puts the channel back to FREE exactly once: on `release` or when it
// is dropped, whatever path the caller took. Waiters sleep on a `Notify`
// that every release wakes.
// ============================================================================

use crate::error::KinError;
use crate::keypair::Keypair;
use crate::Result;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Free,
    Taken,
    /// Taken, and being topped up by the base account
    Underfunded,
}

#[derive(Debug, Clone)]
pub struct Channel {
    index: usize,
    keypair: Keypair,
}

impl Channel {
    /// Position in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn address(&self) -> &str {
        self.keypair.public_address()
    }

    pub fn seed(&self) -> &str {
        self.keypair.secret_seed()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

/// Pool snapshot. Lists addresses, never seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_channels: usize,
    pub free_channels: usize,
    pub non_free_channels: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelState>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub address: String,
    pub status: ChannelStatus,
}

struct PoolInner {
    channels: Vec<Channel>,
    statuses: Mutex<Vec<ChannelStatus>>,
    released: Notify,
}

impl PoolInner {
    fn statuses(&self) -> MutexGuard<'_, Vec<ChannelStatus>> {
        // Nothing panics while holding the lock; recover the data regardless
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a random FREE channel, if any
    fn try_take(&self) -> Option<usize> {
        let mut statuses = self.statuses();
        let free: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == ChannelStatus::Free)
            .map(|(i, _)| i)
            .collect();
        let index = *free.choose(&mut rand::thread_rng())?;
        statuses[index] = ChannelStatus::Taken;
        Some(index)
    }

    fn set(&self, index: usize, status: ChannelStatus) {
        self.statuses()[index] = status;
    }

    fn release(&self, index: usize) {
        {
            let mut statuses = self.statuses();
            if statuses[index] == ChannelStatus::Free {
                warn!(
                    channel = %self.channels[index].address(),
                    "Released a channel that was already free"
                );
            }
            statuses[index] = ChannelStatus::Free;
        }
        self.released.notify_waiters();
    }
}

#[derive(Clone)]
pub struct ChannelPool {
    inner: Arc<PoolInner>,
}

impl ChannelPool {
    /// Build a pool from channel seeds, all FREE
    pub fn new(seeds: &[String]) -> Result<Self> {
        if seeds.is_empty() {
            return Err(KinError::Configuration(
                "channel pool needs at least one seed".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut channels = Vec::with_capacity(seeds.len());
        for (index, seed) in seeds.iter().enumerate() {
            if !seen.insert(seed.as_str()) {
                return Err(KinError::Configuration(format!(
                    "duplicate channel seed at index {}",
                    index
                )));
            }
            let keypair = Keypair::from_seed(seed).map_err(|_| {
                KinError::Configuration(format!("invalid channel seed at index {}", index))
            })?;
            channels.push(Channel { index, keypair });
        }

        let statuses = vec![ChannelStatus::Free; channels.len()];
        Ok(Self {
            inner: Arc::new(PoolInner {
                channels,
                statuses: Mutex::new(statuses),
                released: Notify::new(),
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.inner.channels
    }

    pub fn free_count(&self) -> usize {
        self.inner
            .statuses()
            .iter()
            .filter(|s| **s == ChannelStatus::Free)
            .count()
    }

    pub fn status_of(&self, index: usize) -> Option<ChannelStatus> {
        self.inner.statuses().get(index).copied()
    }

    /// Take a FREE channel without waiting
    pub fn try_acquire(&self) -> Option<ChannelLease> {
        let index = self.inner.try_take()?;
        Some(self.lease(index))
    }

    /// Wait up to `timeout` for a FREE channel
    pub async fn acquire(&self, timeout: Duration) -> Result<ChannelLease> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before looking, so a release between the
            // check and the wait isn't lost
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(index) = self.inner.try_take() {
                return Ok(self.lease(index));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(timeout = ?timeout, "No channel freed up in time");
                return Err(KinError::ChannelsBusy);
            }
        }
    }

    fn lease(&self, index: usize) -> ChannelLease {
        debug!(channel = %self.inner.channels[index].address(), "Channel acquired");
        ChannelLease {
            pool: self.inner.clone(),
            index,
            released: false,
        }
    }

    pub fn status_snapshot(&self, verbose: bool) -> PoolStatus {
        let statuses = self.inner.statuses().clone();
        let free_channels = statuses
            .iter()
            .filter(|s| **s == ChannelStatus::Free)
            .count();

        PoolStatus {
            total_channels: statuses.len(),
            free_channels,
            non_free_channels: statuses.len() - free_channels,
            channels: verbose.then(|| {
                self.inner
                    .channels
                    .iter()
                    .zip(statuses.iter())
                    .map(|(channel, status)| ChannelState {
                        address: channel.address().to_string(),
                        status: *status,
                    })
                    .collect()
            }),
        }
    }
}

// ============================================================================
// LEASE
// ============================================================================

/// Exclusive use of one channel until released or dropped
pub struct ChannelLease {
    pool: Arc<PoolInner>,
    index: usize,
    released: bool,
}

impl ChannelLease {
    pub fn channel(&self) -> &Channel {
        &self.pool.channels[self.index]
    }

    pub fn status(&self) -> ChannelStatus {
        self.pool.statuses()[self.index]
    }

    pub fn mark_underfunded(&self) {
        self.pool.set(self.index, ChannelStatus::Underfunded);
    }

    pub fn mark_taken(&self) {
        self.pool.set(self.index, ChannelStatus::Taken);
    }

    /// Return the channel to the pool as FREE
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            debug!(channel = %self.channel().address(), "Channel released");
            self.pool.release(self.index);
        }
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLease")
            .field("channel", &self.channel().address())
            .field("released", &self.released)
            .finish()
    }
}
