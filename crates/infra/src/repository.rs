//! # リポジトリ実装
//!
//! トークン状態と追跡レコードの永続化を担当する。
//!
//! - トレイトはユースケース層から `Arc<dyn ...>` で注入される
//! - PostgreSQL 実装は sqlx の実行時クエリを使う
//! - インメモリ実装は [`crate::mock`]（`test-utils` feature）

pub mod token_state_repository;
pub mod tracking_record_repository;

pub use token_state_repository::{PostgresTokenStateRepository, TokenStateRepository};
pub use tracking_record_repository::{
    PostgresTrackingRecordRepository,
    TrackingRecordFilter,
    TrackingRecordRepository,
};
