//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：本 crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。
//! 通过 `sqlx::migrate!()` 自动管理 schema 升级。

use crate::offline::error::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::{debug, info};

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

/// 创建 SQLite 连接池并执行所有未执行的迁移
///
/// 内存数据库每个连接各自独立，因此只保留一个常驻连接。
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = if is_memory_url(db_url) {
        debug!("[DB] 使用内存数据库: {}", db_url);
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = options.connect(db_url).await?;

    // 从 `migrations/` 目录读取迁移并执行
    sqlx::migrate!().run(&pool).await?;
    info!("[DB] 数据库已就绪: {}", db_url);

    Ok(pool)
}
