//! # Ferry Client
//!
//! Durable, offline-first synchronization on top of `ferry-engine`.
//!
//! Applications mutate records through a [`SyncEngine`]; every mutation is
//! written to a local SQLite database and queued for the backend. While the
//! device is reachable the engine drains the queue, pulls remote changes and
//! merges them with vector clocks and the configured conflict strategies.
//!
//! ## Components
//!
//! - [`LocalStore`] - records plus a byte-budgeted LRU blob cache
//! - [`SyncQueue`] - FIFO of pending operations with retry/backoff and a
//!   failed-operations log
//! - [`SyncEngine`] - the single sync actor and its background loop
//! - [`RemoteApi`] / [`HttpRemote`] - the backend seam
//! - [`ReachabilityMonitor`] - online/offline signal
//! - [`Scheduler`] - time source, replaceable by [`ManualScheduler`] in tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use ferry_client::{
//!     create_pool, run_migrations, HttpRemote, ReachabilityMonitor, SyncContext, SyncEngine,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool("ferry.db").await?;
//! run_migrations(&pool).await?;
//!
//! let remote = HttpRemote::new("https://api.example.com", Duration::from_secs(15))?;
//! let monitor = ReachabilityMonitor::new();
//! let ctx = SyncContext::builder(pool, Arc::new(remote)).build().await?;
//!
//! let engine = Arc::new(SyncEngine::new(ctx, monitor.subscribe()));
//! engine.recover().await?;
//! let handle = engine.spawn();
//!
//! engine.update("rooms", "room-1", json!({"title": "Kitchen"})).await?;
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod reachability;
pub mod remote;
pub mod scheduler;
pub mod store;

pub use config::{Config, ConfigError, SyncConfig};
pub use context::{SyncContext, SyncContextBuilder};
pub use db::{
    create_memory_pool, create_pool, run_migrations, ConflictLog, PendingConflict, Pool, SyncMeta,
};
pub use engine::{CycleReport, SyncEngine, SyncHandle};
pub use error::{Result, SyncError};
pub use events::{EngineState, SyncEvent};
pub use queue::{Enqueued, FailOutcome, SyncQueue};
pub use reachability::{Reachability, ReachabilityMonitor};
pub use remote::{HttpRemote, RemoteApi, RemoteError};
pub use scheduler::{ManualScheduler, Scheduler, SystemScheduler};
pub use store::LocalStore;
