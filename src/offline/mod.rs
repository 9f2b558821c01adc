pub mod api;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod listener;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出常用类型
pub use api::{HttpRemoteApi, RemoteApi, RemoteEvent};
pub use cache::{CacheManager, EvictionReport};
pub use client::OfflineClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OfflineConfig;
pub use connectivity::{CallbackId, ConnectivityMonitor};
pub use error::{OfflineError, Result};
pub use listener::{EmptyOfflineListener, OfflineListener};
pub use models::{
    CacheStats, CachedEvent, CachedImage, CachedUserDatum, ChangeType, PendingChange,
    SyncFailure, SyncStatus,
};
pub use queue::PendingChangeQueue;
pub use scheduler::Scheduler;
pub use store::{LocalStore, MemoryStore, Region, SqliteStore};
pub use sync::{PreloadReport, SyncEngine};
