//! # ApplyTrack インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とマイグレーション
//! - **リポジトリ実装**: トークン状態・追跡レコードの永続化
//! - **メール API クライアント**: Gmail REST v1 による送信とメタデータ取得
//! - **OAuth2**: リフレッシュトークンによるアクセストークンの更新
//! - **添付ストア**: 添付ファイル参照からのペイロード読み出し
//!
//! ## 依存関係
//!
//! ```text
//! dispatch-service → infra → domain
//!                      ↘
//!                       shared
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - リポジトリ実装
//! - [`mail`] - メール API とメッセージ組み立て
//! - [`oauth`] - トークンリフレッシュ
//! - [`attachment_store`] - 添付ペイロードストア

pub mod attachment_store;
pub mod db;
pub mod error;
pub mod mail;
#[cfg(feature = "test-utils")]
pub mod mock;
pub mod oauth;
pub mod repository;

pub use attachment_store::{AttachmentStore, FsAttachmentStore};
pub use error::InfraError;
pub use oauth::{HttpTokenRefresher, TokenRefresher};
