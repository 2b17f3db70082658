//! # リモートメール API
//!
//! 委任認証情報を使ってメールを送信し、送信済みメッセージとスレッドの
//! メタデータを取得する。
//!
//! - **trait による抽象化**: [`MailApi`] で送信とメタデータ取得を抽象化
//! - **2 つの実装**: Gmail REST v1（本番用）、Noop（ローカル検証用）
//! - **環境変数切替**: `MAIL_BACKEND` でランタイム選択
//!
//! エラーは [`MailApiError`] の閉じた分類で返す。

pub mod composer;
mod gmail;
mod noop;

use applytrack_domain::{
    credential::Credential,
    mail_api::{MailApiError, RemoteMessage, RemoteMessageRef, RemoteThread},
};
use async_trait::async_trait;
pub use composer::RawMessage;
pub use gmail::{DEFAULT_BASE_URL as GMAIL_DEFAULT_BASE_URL, GmailApi};
pub use noop::NoopMailApi;

/// メール API トレイト
///
/// すべての呼び出しで `credential` のベアラートークンを使う。
/// トークンのリフレッシュは呼び出し側の責務。
#[async_trait]
pub trait MailApi: Send + Sync {
    /// 組み立て済みメッセージを送信する
    async fn send_message(
        &self,
        credential: &Credential,
        raw: &RawMessage,
    ) -> Result<RemoteMessageRef, MailApiError>;

    /// メッセージのメタデータを取得する
    async fn get_message(
        &self,
        credential: &Credential,
        message_id: &str,
    ) -> Result<RemoteMessage, MailApiError>;

    /// スレッドのメタデータを取得する
    async fn get_thread(
        &self,
        credential: &Credential,
        thread_id: &str,
    ) -> Result<RemoteThread, MailApiError>;
}
