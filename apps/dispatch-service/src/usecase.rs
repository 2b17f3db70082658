//! # ユースケース層
//!
//! Dispatch Service のビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリと外部サービスを `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラは薄く保ち、ロジックはユースケースに集約
//!
//! ## モジュール構成
//!
//! - [`credential`] - 認証情報の組み立てとリフレッシュ
//! - [`send_pipeline`] - 送信と再試行
//! - [`template_renderer`] - 応募メール本文の生成
//! - [`dispatch`] - 一括送信
//! - [`tracker`] - 配信状況の推定
//! - [`worker`] - 一括送信キュー
//! - [`pacing`] - 待機の抽象化

pub mod credential;
pub mod dispatch;
pub mod pacing;
pub mod send_pipeline;
pub mod template_renderer;
pub mod tracker;
pub mod worker;

pub use credential::{CredentialError, CredentialService};
pub use dispatch::{BulkDispatcher, DispatchError, DispatchRequest};
pub use pacing::{Sleeper, TokioSleeper};
pub use send_pipeline::{RetryPolicy, SendPipeline};
pub use template_renderer::ApplicationRenderer;
pub use tracker::{RefreshOutcome, StatusTracker, SyncSummary, TrackerError, TrackerSettings};
pub use worker::{DispatchQueue, EnqueueError, JobReceipt, spawn_dispatch_worker};
