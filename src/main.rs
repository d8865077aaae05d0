//! Trove watcher
//!
//! Follows a trove protocol deployment block by block and logs every state
//! change: price, system totals, fees and, when an address is given, that
//! owner's trove, balances and stability deposit.

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trove_chain::{AlloyReader, BlockWatcher};
use trove_core::{
    BlockPolledExtra, BlockPolledStrategy, ClientConfig, ClientError, DeploymentRegistry,
    ReadableTroves, ResolvedDeployment, StateStore, StoreChange, TroveStatus,
};

/// Environment variable names.
mod env {
    pub const DEPLOYMENTS: &str = "TROVE_DEPLOYMENTS";
    pub const NETWORK: &str = "TROVE_NETWORK";
    pub const CHAIN_ID: &str = "TROVE_CHAIN_ID";
    pub const WATCH_ADDRESS: &str = "TROVE_WATCH_ADDRESS";
}

const DEFAULT_DEPLOYMENTS: &str = "deployments.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,trove_core=debug,trove_chain=debug")),
        )
        .init();

    // TROVE_PROFILE selects testing, production, or a config file path
    let config = ClientConfig::from_env();
    config.log_config();

    let deployment = load_deployment()?;
    info!(
        network = %deployment.network,
        chain_id = deployment.chain_id,
        rpc = %deployment.rpc_http,
        "Using deployment"
    );

    let reader = AlloyReader::connect(&deployment.rpc_http, deployment.addresses).await?;
    let chain_id = reader.chain_id().await?;
    if chain_id != deployment.chain_id {
        return Err(ClientError::UnsupportedNetwork { chain_id }.into());
    }

    let tracked = watch_address()?;
    let blocks = match deployment.rpc_ws.as_deref() {
        Some(ws) => BlockWatcher::connect_ws(ws).await?,
        None => BlockWatcher::poll_http(&deployment.rpc_http, config.store.block_poll_interval())?,
    };

    let mut strategy = BlockPolledStrategy::new(ReadableTroves::new(Arc::new(reader)), tracked);
    if let Some(tag) = deployment.frontend_tag {
        strategy = strategy.with_frontend_tag(tag);
    }
    let store = StateStore::from_config(strategy, &config.store);
    store.subscribe(log_change);

    let handle = store.start(&blocks);
    let snapshot = store.wait_until_loaded().await;
    info!(block = snapshot.block_tag, "Initial state loaded");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.stop();
    Ok(())
}

fn load_deployment() -> Result<ResolvedDeployment> {
    let path = std::env::var(env::DEPLOYMENTS).unwrap_or_else(|_| DEFAULT_DEPLOYMENTS.to_string());
    let registry = DeploymentRegistry::from_file(&path)?;

    let deployment = match (std::env::var(env::NETWORK), std::env::var(env::CHAIN_ID)) {
        (Ok(network), _) => registry.resolve_network(&network)?,
        (Err(_), Ok(chain_id)) => {
            let chain_id = chain_id
                .parse()
                .with_context(|| format!("Invalid {}: {chain_id}", env::CHAIN_ID))?;
            registry.resolve(chain_id)?
        }
        (Err(_), Err(_)) => {
            anyhow::bail!("Set {} or {} to pick a deployment", env::NETWORK, env::CHAIN_ID)
        }
    };
    Ok(deployment)
}

fn watch_address() -> Result<Option<Address>> {
    match std::env::var(env::WATCH_ADDRESS) {
        Ok(address) => {
            let address = address
                .parse()
                .with_context(|| format!("Invalid {}: {address}", env::WATCH_ADDRESS))?;
            Ok(Some(address))
        }
        Err(_) => Ok(None),
    }
}

fn log_change(change: &StoreChange<BlockPolledExtra>) {
    let new = &change.new;
    let base = &new.base;
    let fields = &change.change;

    if let Some(old) = &change.old {
        if new.block_tag < old.block_tag {
            warn!(block = new.block_tag, previous = old.block_tag, "Applied an older block");
        }
        if let Some(price) = fields.price {
            info!(old = %old.base.price, new = %price, "Price changed");
        }
    }

    if fields.block_tag.is_none() {
        // re-derived between blocks
        if let Some(rate) = fields.borrowing_rate {
            info!(borrowing_rate = %rate, redemption_rate = %new.derived.redemption_rate, "Rates decayed");
        }
        return;
    }

    info!(
        block = new.block_tag,
        price = %base.price,
        troves = base.number_of_troves,
        collateral = %base.total.collateral,
        debt = %base.total.debt,
        borrowing_rate = %new.derived.borrowing_rate,
        redemption_rate = %new.derived.redemption_rate,
        recovery_mode = new.derived.fees.recovery_mode(),
        in_stability_pool = %base.debt_in_stability_pool,
        staked = %base.total_staked,
        updates = new.extra.applied_updates,
        "State"
    );

    if fields.have_undercollateralized_troves == Some(true) {
        warn!(
            riskiest = %base.riskiest_trove_before_redistribution.user_trove.owner,
            "Undercollateralized troves present"
        );
    }

    if !base.stability_deposit.is_empty() {
        info!(
            current = %base.stability_deposit.current,
            collateral_gain = %base.stability_deposit.collateral_gain,
            reward = %base.stability_deposit.governance_token_reward,
            "Stability deposit"
        );
    }

    if base.trove.status != TroveStatus::NonExistent {
        info!(
            owner = %base.trove.owner,
            status = ?base.trove.status,
            collateral = %base.trove.trove.collateral,
            debt = %base.trove.trove.debt,
            debt_token = %base.debt_token_balance,
            surplus = %base.collateral_surplus_balance,
            "Trove"
        );
    }
}
