//! Protocol deployments per network.
//!
//! Deployments are plain configuration values: a table of networks, each
//! with its chain id, RPC endpoints and contract addresses. Address and URL
//! strings may reference environment variables as `${VAR}`. A deployment is
//! resolved once, when a client is built, and passed on from there.

use std::collections::BTreeMap;
use std::path::Path;

use alloy::primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use trove_chain::ProtocolAddresses;

use crate::error::ClientError;

/// All known deployments, keyed by network name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRegistry {
    #[serde(default)]
    pub networks: BTreeMap<String, DeploymentConfig>,
}

/// One deployment, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub chain_id: u64,
    /// First block with protocol activity
    #[serde(default)]
    pub start_block: u64,
    /// The price feed accepts `setPrice`
    #[serde(default)]
    pub price_feed_is_testnet: bool,
    /// Frontend credited for stability deposits and used by the store
    #[serde(default)]
    pub frontend_tag: Option<String>,
    pub rpc: RpcConfig,
    pub contracts: ContractsConfig,
}

/// RPC endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub http: String,
    /// WebSocket endpoint for block subscriptions
    #[serde(default)]
    pub ws: Option<String>,
}

/// Contract address strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub borrower_operations: String,
    pub trove_manager: String,
    pub sorted_troves: String,
    pub hint_helpers: String,
    pub price_feed: String,
    pub debt_token: String,
    pub active_pool: String,
    pub coll_surplus_pool: String,
    pub stability_pool: String,
    pub staking: String,
    pub governance_token: String,
}

/// Deployment with environment expanded and addresses parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeployment {
    pub network: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub price_feed_is_testnet: bool,
    pub frontend_tag: Option<Address>,
    pub rpc_http: String,
    pub rpc_ws: Option<String>,
    pub addresses: ProtocolAddresses,
}

impl DeploymentRegistry {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse deployment TOML")
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("Failed to parse deployment JSON")
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let registry = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };

        info!(
            path = %path.display(),
            networks = registry.networks.len(),
            "Loaded deployments"
        );
        Ok(registry)
    }

    pub fn insert(&mut self, network: impl Into<String>, deployment: DeploymentConfig) {
        self.networks.insert(network.into(), deployment);
    }

    /// Deployment for `chain_id`.
    pub fn resolve(&self, chain_id: u64) -> Result<ResolvedDeployment, ClientError> {
        self.networks
            .iter()
            .find(|(_, deployment)| deployment.chain_id == chain_id)
            .ok_or(ClientError::UnsupportedNetwork { chain_id })
            .and_then(|(network, deployment)| deployment.resolve(network))
    }

    /// Deployment by network name.
    pub fn resolve_network(&self, network: &str) -> Result<ResolvedDeployment, ClientError> {
        let deployment = self.networks.get(network).ok_or_else(|| {
            ClientError::InvalidDeployment(format!("no deployment named '{network}'"))
        })?;
        deployment.resolve(network)
    }
}

impl DeploymentConfig {
    pub fn resolve(&self, network: &str) -> Result<ResolvedDeployment, ClientError> {
        let contracts = &self.contracts;
        let addresses = ProtocolAddresses {
            borrower_operations: parse_address("borrower_operations", &contracts.borrower_operations)?,
            trove_manager: parse_address("trove_manager", &contracts.trove_manager)?,
            sorted_troves: parse_address("sorted_troves", &contracts.sorted_troves)?,
            hint_helpers: parse_address("hint_helpers", &contracts.hint_helpers)?,
            price_feed: parse_address("price_feed", &contracts.price_feed)?,
            debt_token: parse_address("debt_token", &contracts.debt_token)?,
            active_pool: parse_address("active_pool", &contracts.active_pool)?,
            coll_surplus_pool: parse_address("coll_surplus_pool", &contracts.coll_surplus_pool)?,
            stability_pool: parse_address("stability_pool", &contracts.stability_pool)?,
            staking: parse_address("staking", &contracts.staking)?,
            governance_token: parse_address("governance_token", &contracts.governance_token)?,
        };
        let frontend_tag = self
            .frontend_tag
            .as_deref()
            .map(|tag| parse_address("frontend_tag", tag))
            .transpose()?
            .filter(|tag| !tag.is_zero());

        Ok(ResolvedDeployment {
            network: network.to_string(),
            chain_id: self.chain_id,
            start_block: self.start_block,
            price_feed_is_testnet: self.price_feed_is_testnet,
            frontend_tag,
            rpc_http: expand_env(&self.rpc.http),
            // An unset variable disables the subscription
            rpc_ws: self
                .rpc
                .ws
                .as_deref()
                .map(expand_env)
                .filter(|ws| !ws.is_empty() && !ws.contains("${")),
            addresses,
        })
    }
}

fn parse_address(name: &str, value: &str) -> Result<Address, ClientError> {
    let expanded = expand_env(value);
    expanded
        .trim()
        .parse()
        .map_err(|e| ClientError::InvalidDeployment(format!("{name} = '{expanded}': {e}")))
}

/// Expand `${VAR_NAME}` patterns with environment variable values. Unset
/// variables are left as written.
pub fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    re.replace_all(s, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
