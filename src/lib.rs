pub mod offline;

// 重新导出常用类型，方便外部使用
pub use offline::{
    client::OfflineClient,
    config::OfflineConfig,
    error::{OfflineError, Result},
    listener::OfflineListener,
    models::{CacheStats, ChangeType, PendingChange, SyncStatus},
};
