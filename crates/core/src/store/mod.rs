//! Block-synchronized mirror of protocol state.
//!
//! A [`StateStore`] owns one immutable [`Snapshot`] per block behind an
//! `Arc`. On every new block the store spawns a fetch of the whole state
//! at that block; when a fetch completes its snapshot replaces the current
//! one wholesale and listeners are notified. Readers never observe a mix of
//! two blocks.
//!
//! Between blocks the store re-derives time-dependent values (decaying
//! fees) on a timer and notifies only if something moved.
//!
//! How state is fetched, and how the strategy-specific part of a snapshot
//! is merged, is up to a [`StoreStrategy`].

mod block_polled;
mod derived;

pub use block_polled::{BlockPolledExtra, BlockPolledStrategy};
pub use derived::{DerivedState, StateChange};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use trove_chain::{BlockSource, BlockTag, FeeParams};

use crate::config::{ApplyOrder, StoreConfig};
use crate::decimal::Decimal;
use crate::error::ClientResult;
use crate::stability::{FrontendStatus, Stake, StabilityDeposit};
use crate::trove::{Trove, TroveWithPendingRedistribution, UserTrove};

/// State every strategy provides.
///
/// Fields scoped to the tracked address stay at their defaults when the
/// store tracks nobody.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseState {
    pub price: Decimal,
    pub number_of_troves: u64,
    pub total: Trove,
    pub total_redistributed: Trove,
    pub fee_params: FeeParams,
    /// Tail of the sorted list, as stored on chain
    pub riskiest_trove_before_redistribution: TroveWithPendingRedistribution,
    pub debt_in_stability_pool: Decimal,
    pub total_staked: Decimal,
    /// Status of the frontend deposits are tagged with
    pub frontend: FrontendStatus,

    /// Tracked address's trove as stored on chain
    pub trove_before_redistribution: TroveWithPendingRedistribution,
    /// Tracked address's trove with redistribution applied
    pub trove: UserTrove,
    pub debt_token_balance: Decimal,
    pub native_balance: Decimal,
    pub collateral_surplus_balance: Decimal,
    pub governance_token_balance: Decimal,
    pub stability_deposit: StabilityDeposit,
    pub stake: Stake,
    /// Status of the tracked address as a frontend
    pub own_frontend: FrontendStatus,
}

/// Everything known at one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<E> {
    pub base: BaseState,
    pub derived: DerivedState,
    pub extra: E,
    pub block_tag: u64,
    /// Unix seconds
    pub block_timestamp: u64,
}

/// Result of one fetch, before merging.
#[derive(Debug, Clone)]
pub struct StoreUpdate<E> {
    pub base: BaseState,
    pub extra: E,
    pub block_tag: u64,
    pub block_timestamp: u64,
}

/// What listeners receive: both snapshots and the fields that differ.
#[derive(Debug, Clone)]
pub struct StoreChange<E> {
    pub old: Option<Arc<Snapshot<E>>>,
    pub new: Arc<Snapshot<E>>,
    pub change: StateChange,
}

/// How a store obtains state.
#[async_trait]
pub trait StoreStrategy: Send + Sync + 'static {
    type Extra: Clone + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Address whose trove and balances are mirrored.
    fn tracked_address(&self) -> Option<Address>;

    /// Frontend whose status is mirrored, if any.
    fn frontend_tag(&self) -> Option<Address> {
        None
    }

    /// Fetch the complete state at `block`. `Latest` must be resolved to a
    /// concrete block number.
    async fn fetch(&self, block: BlockTag) -> ClientResult<StoreUpdate<Self::Extra>>;

    /// Merge the extra part of an update into the current one.
    fn reduce_extra(&self, old: &Self::Extra, update: Self::Extra) -> Self::Extra;
}

/// Wall clock used to evaluate time-dependent state.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&StoreChange<E>) + Send + Sync>;

struct StoreInner<S: StoreStrategy> {
    strategy: S,
    apply_order: ApplyOrder,
    self_update_interval: Option<Duration>,
    block_debounce: Option<Duration>,
    clock: Clock,
    state: RwLock<Option<Arc<Snapshot<S::Extra>>>>,
    listeners: DashMap<ListenerId, Listener<S::Extra>>,
    next_listener_id: AtomicU64,
    loaded: watch::Sender<bool>,
}

impl<S: StoreStrategy> StoreInner<S> {
    async fn refresh(self: Arc<Self>, block: BlockTag) {
        match self.strategy.fetch(block).await {
            Ok(update) => self.apply(update, false),
            Err(e) => {
                warn!(strategy = self.strategy.name(), ?block, error = %e, "State fetch failed");
            }
        }
    }

    /// First fetch at the latest block. Its result only counts while the
    /// store is still empty; a block notification may have won the race.
    async fn load_initial(self: Arc<Self>) {
        match self.strategy.fetch(BlockTag::Latest).await {
            Ok(update) => self.apply(update, true),
            Err(e) => {
                warn!(strategy = self.strategy.name(), error = %e, "Initial state fetch failed");
            }
        }
    }

    fn apply(&self, update: StoreUpdate<S::Extra>, only_if_unloaded: bool) {
        let mut state = self.state.write();

        if let Some(current) = state.as_ref() {
            if only_if_unloaded {
                debug!(
                    block = update.block_tag,
                    current = current.block_tag,
                    "Discarding initial state, store already loaded"
                );
                return;
            }
            if self.apply_order == ApplyOrder::MonotonicBlock && update.block_tag < current.block_tag
            {
                debug!(
                    block = update.block_tag,
                    current = current.block_tag,
                    "Discarding stale state"
                );
                return;
            }
        }

        let extra = match state.as_ref() {
            Some(current) => self.strategy.reduce_extra(&current.extra, update.extra),
            None => update.extra,
        };
        let derived = DerivedState::compute(&update.base, update.block_timestamp, (self.clock)());
        let new = Arc::new(Snapshot {
            base: update.base,
            derived,
            extra,
            block_tag: update.block_tag,
            block_timestamp: update.block_timestamp,
        });
        let old = state.replace(new.clone());
        drop(state);

        debug!(block = new.block_tag, "State updated");
        self.loaded.send_replace(true);
        self.notify(old, new);
    }

    /// Recompute derived state at the current time, keeping everything
    /// fetched. Listeners hear about it only if a value moved.
    fn rederive(&self) {
        let mut state = self.state.write();
        let Some(current) = state.as_ref() else {
            return;
        };

        let derived = DerivedState::compute(&current.base, current.block_timestamp, (self.clock)());
        if derived == current.derived {
            return;
        }

        let new = Arc::new(Snapshot {
            derived,
            ..Snapshot::clone(current)
        });
        let old = state.replace(new.clone());
        drop(state);

        debug!(
            block = new.block_tag,
            borrowing_rate = %new.derived.borrowing_rate,
            "Derived state updated"
        );
        self.notify(old, new);
    }

    fn notify(&self, old: Option<Arc<Snapshot<S::Extra>>>, new: Arc<Snapshot<S::Extra>>) {
        let change = StoreChange {
            change: StateChange::between(old.as_deref(), &new),
            old,
            new,
        };

        // Copy first so listeners may (un)subscribe from inside a callback
        let mut listeners: Vec<(ListenerId, Listener<S::Extra>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (id, listener) in listeners {
            if self.listeners.contains_key(&id) {
                listener(&change);
            }
        }
    }

    fn clear(&self) {
        *self.state.write() = None;
        self.loaded.send_replace(false);
    }
}

/// Mirror of protocol state, refreshed on every block.
pub struct StateStore<S: StoreStrategy> {
    inner: Arc<StoreInner<S>>,
}

impl<S: StoreStrategy> Clone for StateStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: StoreStrategy> StateStore<S> {
    /// Store with default timing and the given apply order.
    pub fn new(strategy: S, apply_order: ApplyOrder) -> Self {
        let config = StoreConfig {
            apply_order,
            ..Default::default()
        };
        Self::from_config(strategy, &config)
    }

    pub fn from_config(strategy: S, config: &StoreConfig) -> Self {
        Self::with_clock(strategy, config, Arc::new(Utc::now))
    }

    pub fn with_clock(strategy: S, config: &StoreConfig, clock: Clock) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            inner: Arc::new(StoreInner {
                strategy,
                apply_order: config.apply_order,
                self_update_interval: config.self_update_interval(),
                block_debounce: config.block_debounce(),
                clock,
                state: RwLock::new(None),
                listeners: DashMap::new(),
                next_listener_id: AtomicU64::new(0),
                loaded,
            }),
        }
    }

    pub fn strategy(&self) -> &S {
        &self.inner.strategy
    }

    pub fn tracked_address(&self) -> Option<Address> {
        self.inner.strategy.tracked_address()
    }

    pub fn frontend_tag(&self) -> Option<Address> {
        self.inner.strategy.frontend_tag()
    }

    /// Current snapshot; `None` until the first fetch completes.
    pub fn state(&self) -> Option<Arc<Snapshot<S::Extra>>> {
        self.inner.state.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.read().is_some()
    }

    /// Resolves with the first available snapshot.
    pub async fn wait_until_loaded(&self) -> Arc<Snapshot<S::Extra>> {
        let mut loaded = self.inner.loaded.subscribe();
        loop {
            if let Some(state) = self.state() {
                return state;
            }
            // The sender lives in `inner`, which `self` keeps alive
            if loaded.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&StoreChange<S::Extra>) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(&id).is_some()
    }

    /// Start following `blocks`. The first fetch runs at the latest block
    /// and is dropped if a block's fetch lands before it.
    ///
    /// Without debouncing every new block spawns its own fetch; a newer
    /// block never cancels an older fetch. With debouncing, blocks arriving
    /// within the window collapse into one fetch of the highest. Dropping
    /// the handle stops the store and clears its state.
    pub fn start(&self, blocks: &dyn BlockSource) -> StoreHandle {
        let mut new_blocks = blocks.subscribe();
        let inner = self.inner.clone();
        info!(
            strategy = inner.strategy.name(),
            self_update = ?inner.self_update_interval,
            debounce = ?inner.block_debounce,
            "Starting state store"
        );

        let task = tokio::spawn(async move {
            let mut fetches = JoinSet::new();
            fetches.spawn(inner.clone().load_initial());

            let idle_period = inner.self_update_interval.unwrap_or_default();
            let idle = sleep(idle_period);
            tokio::pin!(idle);

            let debounce_period = inner.block_debounce.unwrap_or_default();
            let debounce = sleep(debounce_period);
            tokio::pin!(debounce);
            let mut pending: Option<u64> = None;

            loop {
                tokio::select! {
                    received = new_blocks.recv() => match received {
                        Ok(block) => {
                            idle.as_mut().reset(Instant::now() + idle_period);
                            if inner.block_debounce.is_some() {
                                pending = Some(pending.map_or(block.number, |p| p.max(block.number)));
                                debounce.as_mut().reset(Instant::now() + debounce_period);
                            } else {
                                fetches.spawn(inner.clone().refresh(BlockTag::Number(block.number)));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Store fell behind the block source");
                            fetches.spawn(inner.clone().refresh(BlockTag::Latest));
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Block source closed");
                            break;
                        }
                    },
                    () = &mut debounce, if pending.is_some() => {
                        if let Some(number) = pending.take() {
                            fetches.spawn(inner.clone().refresh(BlockTag::Number(number)));
                        }
                    }
                    () = &mut idle, if inner.self_update_interval.is_some() => {
                        inner.rederive();
                        idle.as_mut().reset(Instant::now() + idle_period);
                    }
                    Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                warn!(error = %e, "State fetch panicked");
                            }
                        }
                    }
                }
            }

            while fetches.join_next().await.is_some() {}
        });

        let inner = self.inner.clone();
        StoreHandle {
            task,
            on_stop: Some(Box::new(move || inner.clear())),
        }
    }
}

impl<S: StoreStrategy> fmt::Debug for StateStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("strategy", &self.inner.strategy.name())
            .field("apply_order", &self.inner.apply_order)
            .field("block", &self.state().map(|s| s.block_tag))
            .finish()
    }
}

/// Running store. Stopping aborts in-flight fetches and drops the state.
pub struct StoreHandle {
    task: JoinHandle<()>,
    on_stop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl StoreHandle {
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use crate::fees::unix_to_datetime;
    use crate::mock::d;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::{mpsc, oneshot};
    use trove_chain::{BlockWatcher, ChainError, NewBlock};

    const INITIAL_BLOCK: u64 = 99;
    const FAILING_BLOCK: u64 = 13;

    /// Fetches wait for their block's gate, if one is registered.
    #[derive(Default)]
    struct GatedStrategy {
        gates: Mutex<HashMap<u64, oneshot::Receiver<()>>>,
        fetched: Mutex<Option<mpsc::UnboundedSender<u64>>>,
        fee_params: FeeParams,
    }

    impl GatedStrategy {
        fn gate(&self, block: u64) -> oneshot::Sender<()> {
            let (open, gate) = oneshot::channel();
            self.gates.lock().insert(block, gate);
            open
        }
    }

    #[async_trait]
    impl StoreStrategy for GatedStrategy {
        type Extra = u64;

        fn name(&self) -> &'static str {
            "gated"
        }

        fn tracked_address(&self) -> Option<Address> {
            None
        }

        async fn fetch(&self, block: BlockTag) -> ClientResult<StoreUpdate<u64>> {
            let number = block.number().unwrap_or(INITIAL_BLOCK);
            let gate = self.gates.lock().remove(&number);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if let Some(fetched) = self.fetched.lock().as_ref() {
                let _ = fetched.send(number);
            }
            if number == FAILING_BLOCK {
                return Err(ChainError::Other("header not found".into()).into());
            }

            Ok(StoreUpdate {
                base: BaseState {
                    price: Decimal::from_int(number),
                    fee_params: self.fee_params,
                    ..Default::default()
                },
                extra: 1,
                block_tag: number,
                block_timestamp: number * 12,
            })
        }

        fn reduce_extra(&self, old: &u64, update: u64) -> u64 {
            old + update
        }
    }

    fn block(number: u64) -> NewBlock {
        NewBlock {
            number,
            timestamp: number * 12,
        }
    }

    fn applied_blocks(store: &StateStore<GatedStrategy>) -> mpsc::UnboundedReceiver<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        store.subscribe(move |change| {
            let _ = tx.send(change.new.block_tag);
        });
        rx
    }

    #[tokio::test]
    async fn test_last_completed_fetch_wins() {
        let strategy = GatedStrategy::default();
        let open_100 = strategy.gate(100);
        let open_101 = strategy.gate(101);
        let store = StateStore::new(strategy, ApplyOrder::LastCompleted);
        let mut applied = applied_blocks(&store);

        let (watcher, blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);
        assert_eq!(applied.recv().await, Some(INITIAL_BLOCK));

        blocks.send(block(100)).unwrap();
        blocks.send(block(101)).unwrap();

        open_101.send(()).unwrap();
        assert_eq!(applied.recv().await, Some(101));
        open_100.send(()).unwrap();
        assert_eq!(applied.recv().await, Some(100));

        let state = store.state().unwrap();
        assert_eq!(state.block_tag, 100);
        assert_eq!(state.base.price, Decimal::from_int(100));
        // initial + 101 + 100
        assert_eq!(state.extra, 3);
    }

    #[tokio::test]
    async fn test_initial_fetch_does_not_overwrite_newer_block() {
        let strategy = GatedStrategy::default();
        let open_initial = strategy.gate(INITIAL_BLOCK);
        let (fetched_tx, mut fetched) = mpsc::unbounded_channel();
        *strategy.fetched.lock() = Some(fetched_tx);
        let store = StateStore::new(strategy, ApplyOrder::LastCompleted);
        let mut applied = applied_blocks(&store);

        let (watcher, blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);

        blocks.send(block(100)).unwrap();
        assert_eq!(applied.recv().await, Some(100));

        open_initial.send(()).unwrap();
        while fetched.recv().await != Some(INITIAL_BLOCK) {}
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = store.state().unwrap();
        assert_eq!(state.block_tag, 100);
        assert_eq!(state.extra, 1);
        assert!(applied.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listeners_receive_field_changes() {
        let store = StateStore::new(GatedStrategy::default(), ApplyOrder::LastCompleted);
        let (tx, mut changes) = mpsc::unbounded_channel();
        store.subscribe(move |change| {
            let _ = tx.send(change.change.clone());
        });

        let (watcher, blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);

        let first = changes.recv().await.unwrap();
        assert_eq!(first.block_tag, Some(INITIAL_BLOCK));
        assert_eq!(first.price, Some(Decimal::from_int(INITIAL_BLOCK)));

        blocks.send(block(100)).unwrap();
        let second = changes.recv().await.unwrap();
        assert_eq!(second.block_tag, Some(100));
        assert_eq!(second.price, Some(Decimal::from_int(100)));
        assert_eq!(second.total, None);
        assert_eq!(second.borrowing_rate, None);
    }

    #[tokio::test]
    async fn test_rates_rederived_without_new_blocks() {
        // 2% base rate, last touched at the initial block's timestamp
        let strategy = GatedStrategy {
            fee_params: FeeParams {
                base_rate: d("0.02").raw(),
                minute_decay_factor: d("0.9").raw(),
                beta: d("2").raw(),
                last_fee_operation_time: INITIAL_BLOCK * 12,
            },
            ..Default::default()
        };
        let now = Arc::new(AtomicU64::new(INITIAL_BLOCK * 12));
        let clock_now = now.clone();
        let config = StoreConfig {
            self_update_interval_ms: 20,
            ..Default::default()
        };
        let store = StateStore::with_clock(
            strategy,
            &config,
            Arc::new(move || unix_to_datetime(clock_now.load(Ordering::SeqCst))),
        );
        let (tx, mut changes) = mpsc::unbounded_channel();
        store.subscribe(move |change: &StoreChange<u64>| {
            let _ = tx.send(change.clone());
        });

        let (watcher, _blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);
        let loaded = changes.recv().await.unwrap();
        assert_eq!(loaded.new.derived.borrowing_rate, d("0.025"));

        // clock unchanged: ticks recompute but stay quiet
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(changes.try_recv().is_err());

        now.fetch_add(60, Ordering::SeqCst);
        let rederived = changes.recv().await.unwrap();
        assert_eq!(rederived.change.borrowing_rate, Some(d("0.023")));
        assert_eq!(rederived.change.block_tag, None);
        assert_eq!(rederived.change.price, None);
        assert_eq!(rederived.new.block_tag, INITIAL_BLOCK);
        // nothing fetched, nothing merged
        assert_eq!(rederived.new.extra, 1);
    }

    #[tokio::test]
    async fn test_debounce_fetches_highest_block_once() {
        let strategy = GatedStrategy::default();
        let (fetched_tx, mut fetched) = mpsc::unbounded_channel();
        *strategy.fetched.lock() = Some(fetched_tx);
        let config = StoreConfig {
            block_debounce_ms: 30,
            ..Default::default()
        };
        let store = StateStore::from_config(strategy, &config);
        let mut applied = applied_blocks(&store);

        let (watcher, blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);
        assert_eq!(applied.recv().await, Some(INITIAL_BLOCK));
        assert_eq!(fetched.recv().await, Some(INITIAL_BLOCK));

        blocks.send(block(101)).unwrap();
        blocks.send(block(103)).unwrap();
        blocks.send(block(102)).unwrap();

        assert_eq!(applied.recv().await, Some(103));
        assert_eq!(fetched.recv().await, Some(103));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fetched.try_recv().is_err());
        assert!(applied.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_monotonic_order_discards_stale_fetch() {
        let strategy = GatedStrategy::default();
        let open_100 = strategy.gate(100);
        let (fetched_tx, mut fetched) = mpsc::unbounded_channel();
        *strategy.fetched.lock() = Some(fetched_tx);
        let store = StateStore::new(strategy, ApplyOrder::MonotonicBlock);
        let mut applied = applied_blocks(&store);

        let (watcher, blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);
        assert_eq!(applied.recv().await, Some(INITIAL_BLOCK));

        blocks.send(block(100)).unwrap();
        blocks.send(block(101)).unwrap();
        assert_eq!(applied.recv().await, Some(101));

        open_100.send(()).unwrap();
        while fetched.recv().await != Some(100) {}
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.state().unwrap().block_tag, 101);
        assert!(applied.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_skipped() {
        let store = StateStore::new(GatedStrategy::default(), ApplyOrder::LastCompleted);
        let mut applied = applied_blocks(&store);

        let (watcher, blocks) = BlockWatcher::manual();
        let handle = store.start(&watcher);
        assert_eq!(applied.recv().await, Some(INITIAL_BLOCK));

        blocks.send(block(FAILING_BLOCK)).unwrap();
        blocks.send(block(14)).unwrap();
        assert_eq!(applied.recv().await, Some(14));
        assert!(handle.is_running());
    }

    #[tokio::test]
    async fn test_wait_until_loaded_and_stop() {
        let store = StateStore::new(GatedStrategy::default(), ApplyOrder::LastCompleted);
        assert!(store.state().is_none());

        let (watcher, _blocks) = BlockWatcher::manual();
        let handle = store.start(&watcher);

        let snapshot = store.wait_until_loaded().await;
        assert_eq!(snapshot.block_tag, INITIAL_BLOCK);
        assert!(store.is_loaded());

        handle.stop();
        assert!(store.state().is_none());
        assert!(!store.is_loaded());
    }

    #[tokio::test]
    async fn test_listener_removed_during_notification_is_skipped() {
        let store = StateStore::new(GatedStrategy::default(), ApplyOrder::LastCompleted);
        let second_called = Arc::new(AtomicBool::new(false));
        let second_id = Arc::new(Mutex::new(None::<ListenerId>));

        let remover = store.clone();
        let to_remove = second_id.clone();
        store.subscribe(move |_| {
            if let Some(id) = *to_remove.lock() {
                remover.unsubscribe(id);
            }
        });

        let called = second_called.clone();
        let id = store.subscribe(move |_| called.store(true, Ordering::SeqCst));
        *second_id.lock() = Some(id);

        let (watcher, _blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);
        store.wait_until_loaded().await;

        assert!(!second_called.load(Ordering::SeqCst));
        assert!(!store.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_not_called() {
        let store = StateStore::new(GatedStrategy::default(), ApplyOrder::LastCompleted);
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let id = store.subscribe(move |_| flag.store(true, Ordering::SeqCst));
        assert!(store.unsubscribe(id));

        let (watcher, _blocks) = BlockWatcher::manual();
        let _handle = store.start(&watcher);
        store.wait_until_loaded().await;

        assert!(!called.load(Ordering::SeqCst));
    }
}
