//! Noop メール API 実装
//!
//! 実際には送信せず、ログ出力のみ行う。
//! 取得系は「送信済み・返信なし」のメッセージを返す。

use applytrack_domain::{
    credential::Credential,
    mail_api::{MailApiError, RemoteMessage, RemoteMessageRef, RemoteThread, label},
};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{MailApi, RawMessage};

/// Noop メール API（ログ出力のみ）
#[derive(Debug, Clone, Default)]
pub struct NoopMailApi;

#[async_trait]
impl MailApi for NoopMailApi {
    async fn send_message(
        &self,
        _credential: &Credential,
        raw: &RawMessage,
    ) -> Result<RemoteMessageRef, MailApiError> {
        let id = format!("noop-{}", Uuid::now_v7());
        tracing::info!(
            message_id = %id,
            size = raw.as_str().len(),
            "Noop: メール送信をスキップ"
        );
        Ok(RemoteMessageRef {
            message_id: id.clone(),
            thread_id:  id,
        })
    }

    async fn get_message(
        &self,
        _credential: &Credential,
        message_id: &str,
    ) -> Result<RemoteMessage, MailApiError> {
        Ok(RemoteMessage {
            id:            message_id.to_string(),
            thread_id:     message_id.to_string(),
            label_ids:     vec![label::SENT.to_string()],
            internal_date: Some(Utc::now()),
        })
    }

    async fn get_thread(
        &self,
        credential: &Credential,
        thread_id: &str,
    ) -> Result<RemoteThread, MailApiError> {
        let message = self.get_message(credential, thread_id).await?;
        Ok(RemoteThread {
            id:       thread_id.to_string(),
            messages: vec![message],
        })
    }
}
