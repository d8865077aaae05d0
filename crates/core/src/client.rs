//! Client façade: reads, populated operations, and send-and-wait.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::info;
use trove_chain::{
    AlloyReader, AlloySubmitterBuilder, ProtocolReader, TransactionSubmitter,
};

use crate::cached::CachedReader;
use crate::config::{ClientConfig, DeploymentRegistry, ResolvedDeployment};
use crate::decimal::Decimal;
use crate::details::{
    CollateralGainTransferDetails, LiquidationDetails, RedemptionDetails,
    StabilityDepositChangeDetails, StabilityPoolGainsWithdrawalDetails, TroveAdjustmentDetails,
    TroveClosureDetails, TroveCreationDetails,
};
use crate::error::{ClientError, ClientResult};
use crate::hints::HintFinder;
use crate::populatable::{PopulatableTroves, PopulateOptions};
use crate::readable::ReadableTroves;
use crate::store::{BlockPolledStrategy, StateStore};
use crate::transaction::{MinedReceipt, PopulatedTransaction, SentTransaction};
use crate::trove::{TroveAdjustmentParams, TroveCreationParams};

/// One deployment, one sender.
pub struct TroveClient {
    deployment: ResolvedDeployment,
    config: ClientConfig,
    submitter: Arc<dyn TransactionSubmitter>,
    readable: ReadableTroves,
    populatable: PopulatableTroves,
    store: Option<StateStore<BlockPolledStrategy>>,
}

impl TroveClient {
    /// Connect to the deployment's RPC endpoint. Fails with
    /// [`ClientError::UnsupportedNetwork`] if the endpoint serves another
    /// chain.
    pub async fn connect(
        deployment: ResolvedDeployment,
        private_key: Option<&str>,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let reader = AlloyReader::connect(&deployment.rpc_http, deployment.addresses).await?;
        let chain_id = reader.chain_id().await?;
        if chain_id != deployment.chain_id {
            return Err(ClientError::UnsupportedNetwork { chain_id });
        }
        Self::connect_with_reader(reader, deployment, private_key, config).await
    }

    /// Connect to `rpc_url` and pick the deployment for the chain it serves.
    pub async fn connect_to(
        rpc_url: &str,
        registry: &DeploymentRegistry,
        private_key: Option<&str>,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let unbound = AlloyReader::connect(rpc_url, Default::default()).await?;
        let chain_id = unbound.chain_id().await?;
        let mut deployment = registry.resolve(chain_id)?;
        deployment.rpc_http = rpc_url.to_string();

        let reader = AlloyReader::with_provider(unbound.provider().clone(), deployment.addresses);
        Self::connect_with_reader(reader, deployment, private_key, config).await
    }

    async fn connect_with_reader(
        reader: AlloyReader,
        deployment: ResolvedDeployment,
        private_key: Option<&str>,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let submitter = AlloySubmitterBuilder::new(deployment.rpc_http.clone(), deployment.chain_id)
            .poll_interval(config.transactions.receipt_poll_interval())
            .build(private_key)
            .await?;

        info!(
            network = %deployment.network,
            chain_id = deployment.chain_id,
            sender = ?submitter.sender_address(),
            "Trove client connected"
        );
        Ok(Self::from_parts(
            Arc::new(reader),
            Arc::new(submitter),
            deployment,
            config,
        ))
    }

    /// Client without a state store; every read goes to `reader`.
    pub fn from_parts(
        reader: Arc<dyn ProtocolReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        deployment: ResolvedDeployment,
        config: ClientConfig,
    ) -> Self {
        Self::build(reader, submitter, deployment, config, None)
    }

    /// Client whose reads go through a block-polled store tracking the
    /// sender and the deployment's frontend. The store still has to be
    /// started with [`StateStore::start`].
    pub fn with_store(
        reader: Arc<dyn ProtocolReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        deployment: ResolvedDeployment,
        config: ClientConfig,
    ) -> Self {
        let mut strategy =
            BlockPolledStrategy::new(ReadableTroves::new(reader.clone()), submitter.sender_address());
        if let Some(tag) = deployment.frontend_tag {
            strategy = strategy.with_frontend_tag(tag);
        }
        let store = StateStore::from_config(strategy, &config.store);
        let cached: Arc<dyn ProtocolReader> = Arc::new(CachedReader::new(reader, store.clone()));

        Self::build(cached, submitter, deployment, config, Some(store))
    }

    fn build(
        reader: Arc<dyn ProtocolReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        deployment: ResolvedDeployment,
        config: ClientConfig,
        store: Option<StateStore<BlockPolledStrategy>>,
    ) -> Self {
        let readable = ReadableTroves::new(reader.clone());
        let mut populatable = PopulatableTroves::new(
            readable.clone(),
            HintFinder::new(reader, config.hints.clone()),
            submitter.clone(),
            deployment.addresses,
            deployment.price_feed_is_testnet,
            config.clone(),
        );
        if let Some(tag) = deployment.frontend_tag {
            populatable = populatable.with_frontend_tag(tag);
        }

        Self {
            deployment,
            config,
            submitter,
            readable,
            populatable,
            store,
        }
    }

    pub fn deployment(&self) -> &ResolvedDeployment {
        &self.deployment
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sender_address(&self) -> Option<Address> {
        self.submitter.sender_address()
    }

    pub fn readable(&self) -> &ReadableTroves {
        &self.readable
    }

    pub fn populate(&self) -> &PopulatableTroves {
        &self.populatable
    }

    pub fn store(&self) -> Option<&StateStore<BlockPolledStrategy>> {
        self.store.as_ref()
    }

    pub async fn send<D>(&self, populated: PopulatedTransaction<D>) -> ClientResult<SentTransaction<D>> {
        populated.send().await
    }

    /// Send and wait for the receipt. A revert is returned as
    /// [`ClientError::TransactionReverted`].
    pub async fn transact<D: Clone>(&self, populated: PopulatedTransaction<D>) -> ClientResult<D> {
        let sent = populated.send().await?;
        match sent.wait_for_receipt().await? {
            MinedReceipt::Succeeded(receipt) => Ok(receipt.details().clone()),
            MinedReceipt::Failed(receipt) => Err(ClientError::TransactionReverted {
                receipt: Box::new(receipt.into_raw()),
            }),
        }
    }

    pub async fn open_trove(&self, params: TroveCreationParams) -> ClientResult<TroveCreationDetails> {
        let populated = self
            .populatable
            .open_trove(params, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn adjust_trove(
        &self,
        params: TroveAdjustmentParams,
    ) -> ClientResult<TroveAdjustmentDetails> {
        let populated = self
            .populatable
            .adjust_trove(params, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn close_trove(&self) -> ClientResult<TroveClosureDetails> {
        let populated = self.populatable.close_trove(PopulateOptions::default()).await?;
        self.transact(populated).await
    }

    pub async fn liquidate(&self, borrowers: &[Address]) -> ClientResult<LiquidationDetails> {
        let populated = self
            .populatable
            .liquidate(borrowers, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    /// Redeem up to `amount`; a truncated redemption redeems only what can
    /// be redeemed cleanly.
    pub async fn redeem(
        &self,
        amount: Decimal,
        max_redemption_rate: Option<Decimal>,
    ) -> ClientResult<RedemptionDetails> {
        let redemption = self
            .populatable
            .redeem(amount, max_redemption_rate, PopulateOptions::default())
            .await?;
        self.transact(redemption.into_populated()).await
    }

    pub async fn deposit_debt_in_stability_pool(
        &self,
        amount: Decimal,
    ) -> ClientResult<StabilityDepositChangeDetails> {
        let populated = self
            .populatable
            .deposit_debt_in_stability_pool(amount, None, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn withdraw_debt_from_stability_pool(
        &self,
        amount: Decimal,
    ) -> ClientResult<StabilityDepositChangeDetails> {
        let populated = self
            .populatable
            .withdraw_debt_from_stability_pool(amount, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn withdraw_gains_from_stability_pool(
        &self,
    ) -> ClientResult<StabilityPoolGainsWithdrawalDetails> {
        let populated = self
            .populatable
            .withdraw_gains_from_stability_pool(PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn transfer_collateral_gain_to_trove(
        &self,
    ) -> ClientResult<CollateralGainTransferDetails> {
        let populated = self
            .populatable
            .transfer_collateral_gain_to_trove(PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn send_debt_token(&self, to: Address, amount: Decimal) -> ClientResult<()> {
        let populated = self
            .populatable
            .send_debt_token(to, amount, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn send_governance_token(&self, to: Address, amount: Decimal) -> ClientResult<()> {
        let populated = self
            .populatable
            .send_governance_token(to, amount, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn stake(&self, amount: Decimal) -> ClientResult<()> {
        let populated = self.populatable.stake(amount, PopulateOptions::default()).await?;
        self.transact(populated).await
    }

    pub async fn unstake(&self, amount: Decimal) -> ClientResult<()> {
        let populated = self.populatable.unstake(amount, PopulateOptions::default()).await?;
        self.transact(populated).await
    }

    pub async fn withdraw_gains_from_staking(&self) -> ClientResult<()> {
        let populated = self
            .populatable
            .withdraw_gains_from_staking(PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }

    pub async fn register_frontend(&self, kickback_rate: Decimal) -> ClientResult<()> {
        let populated = self
            .populatable
            .register_frontend(kickback_rate, PopulateOptions::default())
            .await?;
        self.transact(populated).await
    }
}

impl std::fmt::Debug for TroveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TroveClient")
            .field("network", &self.deployment.network)
            .field("chain_id", &self.deployment.chain_id)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
