// ============================================================================
// KIN-SDK - Channel Helpers
// ============================================================================
// Deterministic ("HD") channel seeds derived from a master seed and a salt,
// and a helper that creates whichever of them don't exist yet.

use crate::builder::TransactionBuilder;
use crate::client::KinClient;
use crate::config::MAX_HD_CHANNELS;
use crate::error::KinError;
use crate::keypair::Keypair;
use crate::Result;
use sha2::{Digest, Sha256};
use tracing::info;

/// Derive `amount` channel seeds from `master_seed` and `salt`
pub fn get_hd_channels(master_seed: &str, salt: &str, amount: usize) -> Result<Vec<String>> {
    if amount > MAX_HD_CHANNELS {
        return Err(KinError::Configuration(format!(
            "only up to {} channels can be derived from one seed and salt",
            MAX_HD_CHANNELS
        )));
    }
    let hashed_salt = hex::encode(Sha256::digest(salt.as_bytes()));

    Ok((0..amount)
        .map(|index| Keypair::generate_hd_seed(master_seed, &format!("{}{}", hashed_salt, index)))
        .collect())
}

/// Derive channel seeds and create the missing channel accounts from the
/// master account in a single transaction. Returns every derived seed.
///
/// Channels are assumed to be created in order, so the first missing one
/// and everything after it are created.
pub async fn create_channels(
    client: &KinClient,
    master_seed: &str,
    amount: usize,
    starting_balance: &str,
    salt: &str,
) -> Result<Vec<String>> {
    let channels = get_hd_channels(master_seed, salt, amount)?;
    let master = Keypair::from_seed(master_seed)?;
    if !client.does_account_exist(master.public_address()).await? {
        return Err(KinError::AccountNotFound {
            address: Some(master.public_address().to_string()),
            code: None,
        });
    }

    let addresses = channels
        .iter()
        .map(|seed| Keypair::address_from_seed(seed))
        .collect::<Result<Vec<_>>>()?;

    let mut first_missing = None;
    for (index, address) in addresses.iter().enumerate().rev() {
        if client.does_account_exist(address).await? {
            break;
        }
        first_missing = Some(index);
    }
    let Some(first_missing) = first_missing else {
        return Ok(channels);
    };

    let fee = client.get_minimum_fee().await?;
    let mut builder =
        TransactionBuilder::new(client.environment(), client.gateway().clone(), fee, master_seed)?;
    for address in &addresses[first_missing..] {
        builder.append_create_account_op(address, starting_balance, None)?;
    }
    builder.sign().await?;
    let response = builder.submit().await?;

    info!(
        created = addresses.len() - first_missing,
        hash = %response.hash,
        "Channel accounts created"
    );
    Ok(channels)
}
