//! Explicitly constructed dependencies of the sync engine.
//!
//! Nothing in this crate reaches for process-wide state: the store, queue,
//! logs, collaborators and clock are built once here and handed to whoever
//! needs them.

use crate::config::SyncConfig;
use crate::db::{ConflictLog, Pool, SyncMeta};
use crate::error::Result;
use crate::queue::SyncQueue;
use crate::remote::RemoteApi;
use crate::scheduler::{Scheduler, SystemScheduler};
use crate::store::LocalStore;
use ferry_engine::{
    CollectionName, ConflictResolver, JsonCodec, PayloadCodec, ReplicaId, Strategy,
};
use std::sync::Arc;

/// Everything a sync cycle touches.
#[derive(Clone)]
pub struct SyncContext {
    pub store: LocalStore,
    pub queue: SyncQueue,
    pub conflicts: ConflictLog,
    pub meta: SyncMeta,
    pub remote: Arc<dyn RemoteApi>,
    pub resolver: Arc<ConflictResolver>,
    pub scheduler: Arc<dyn Scheduler>,
    pub config: SyncConfig,
    pub replica_id: ReplicaId,
}

impl SyncContext {
    pub fn builder(pool: Pool, remote: Arc<dyn RemoteApi>) -> SyncContextBuilder {
        SyncContextBuilder::new(pool, remote)
    }
}

/// Builder for [`SyncContext`].
pub struct SyncContextBuilder {
    pool: Pool,
    remote: Arc<dyn RemoteApi>,
    config: SyncConfig,
    scheduler: Arc<dyn Scheduler>,
    codec: Arc<dyn PayloadCodec>,
    default_strategy: Strategy,
    strategies: Vec<(CollectionName, Strategy)>,
}

impl SyncContextBuilder {
    pub fn new(pool: Pool, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            pool,
            remote,
            config: SyncConfig::default(),
            scheduler: Arc::new(SystemScheduler),
            codec: Arc::new(JsonCodec),
            default_strategy: Strategy::default(),
            strategies: Vec::new(),
        }
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Transform applied to payloads before they reach disk.
    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Strategy for collections without one of their own.
    pub fn default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn strategy(mut self, collection: impl Into<CollectionName>, strategy: Strategy) -> Self {
        self.strategies.push((collection.into(), strategy));
        self
    }

    /// Open the durable components and load the device's replica id.
    ///
    /// Migrations must already have run against the pool.
    pub async fn build(self) -> Result<SyncContext> {
        let meta = SyncMeta::new(self.pool.clone());
        let replica_id = meta.replica_id().await?;
        let default_strategy = self.default_strategy.name();

        let resolver = self
            .strategies
            .into_iter()
            .fold(
                ConflictResolver::new(replica_id.clone()).with_default(self.default_strategy),
                |resolver, (collection, strategy)| resolver.with_strategy(collection, strategy),
            );

        let store = LocalStore::open(
            self.pool.clone(),
            self.codec.clone(),
            self.config.cache_budget_bytes,
        )
        .await?;
        let queue = SyncQueue::new(
            self.pool.clone(),
            self.codec.clone(),
            self.config.queue_capacity,
            self.config.backoff,
        );
        let conflicts = ConflictLog::new(self.pool, self.codec);

        tracing::info!(
            replica_id = %replica_id,
            default_strategy,
            "Sync context ready"
        );

        Ok(SyncContext {
            store,
            queue,
            conflicts,
            meta,
            remote: self.remote,
            resolver: Arc::new(resolver),
            scheduler: self.scheduler,
            config: self.config,
            replica_id,
        })
    }
}
