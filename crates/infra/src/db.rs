//! # PostgreSQL データベース接続管理
//!
//! 接続プールの作成とマイグレーションの適用を行う。
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use applytrack_infra::db;
//!
//! let pool = db::create_pool("postgres://localhost/applytrack").await?;
//! db::run_migrations(&pool).await?;
//! ```

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

/// データベースマイグレーションを実行する
///
/// 適用済みのマイグレーションはスキップされる。
/// sqlx が advisory lock を使うため、複数プロセスから同時に呼び出しても安全。
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// PostgreSQL 接続プールを作成する
///
/// アプリケーション起動時に一度だけ呼び出し、プールを全体で共有する。
///
/// - `max_connections(10)`: ワーカーと HTTP ハンドラで共有する
/// - `acquire_timeout(5秒)`: 超過時はエラー
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}
