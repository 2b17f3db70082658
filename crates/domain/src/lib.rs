//! # ApplyTrack ドメイン層
//!
//! 応募メールの一括送信と配信状況追跡の中核となるドメインモデルを定義する。
//!
//! ## 依存関係の方向
//!
//! ```text
//! dispatch-service → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、メール API、ファイルシステム）に一切依存しない。
//!
//! ## モジュール構成
//!
//! - [`credential`] - 委任 OAuth2 認証情報の正規化
//! - [`message`] - 送信メッセージと添付ファイル
//! - [`mail_api`] - リモートメール API の結果とエラー分類
//! - [`send`] - 送信結果
//! - [`tracking`] - 追跡レコードと配信ステータスの状態遷移
//! - [`dispatch`] - 一括送信の宛先と結果集計
//! - [`principal`] - プリンシパルとメールアドレス
//! - [`clock`] - 時刻プロバイダ

#[macro_use]
mod macros;

pub mod clock;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod mail_api;
pub mod message;
pub mod principal;
pub mod send;
pub mod tracking;

pub use error::DomainError;
