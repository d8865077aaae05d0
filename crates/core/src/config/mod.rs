//! Configuration for the trove client.
//!
//! - Client runtime configuration (hint search, gas, fee slippage, store, transactions)
//! - Deployments per network (chain id, RPC endpoints, contract addresses)

mod client;
mod deployment;

pub use client::{
    ApplyOrder, ClientConfig, FeeSlippageConfig, GasConfig, HintsConfig, StoreConfig,
    TransactionConfig,
};

pub use deployment::{
    expand_env, ContractsConfig, DeploymentConfig, DeploymentRegistry, ResolvedDeployment,
    RpcConfig,
};
