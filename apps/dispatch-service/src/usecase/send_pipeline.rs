//! # 送信パイプライン
//!
//! 組み立て済みメッセージを送信し、失敗を分類して再試行する。
//!
//! | 分類 | 扱い |
//! |------|------|
//! | 成功 | リモート識別子を返す |
//! | RateLimited | 再試行。`base_delay * 2^(n-1)` 待つ |
//! | Timeout / Network | 再試行。同じバックオフを `max_delay` で頭打ち |
//! | Unauthorized | 終端（再認証が必要） |
//! | Forbidden | 終端（スコープ不足） |
//! | その他 | 終端 |
//!
//! `max_attempts` は試行の総数。最後の試行の後には待たない。

use std::{sync::Arc, time::Duration};

use applytrack_domain::{
    credential::Credential,
    mail_api::MailApiErrorKind,
    principal::PrincipalId,
    send::{SendError, SendResult},
};
use applytrack_infra::mail::{MailApi, RawMessage};

use super::{CredentialService, pacing::Sleeper};

/// 再試行ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 試行回数の上限（1 未満は 1 とみなす）
    pub max_attempts: u32,
    pub base_delay:   Duration,
    /// ネットワークエラー時の待機の上限
    pub max_delay:    Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay:   Duration::from_secs(2),
            max_delay:    Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `attempt` 回目（1 始まり）の失敗後の待機時間
    pub fn backoff(&self, attempt: u32, kind: MailApiErrorKind) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        match kind {
            MailApiErrorKind::Timeout | MailApiErrorKind::Network => delay.min(self.max_delay),
            _ => delay,
        }
    }
}

/// 送信パイプライン
pub struct SendPipeline {
    mail_api:    Arc<dyn MailApi>,
    credentials: Arc<CredentialService>,
    sleeper:     Arc<dyn Sleeper>,
    policy:      RetryPolicy,
}

impl SendPipeline {
    pub fn new(
        mail_api: Arc<dyn MailApi>,
        credentials: Arc<CredentialService>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            mail_api,
            credentials,
            sleeper,
            policy,
        }
    }

    /// メッセージを送信する
    ///
    /// 各試行の直前に認証情報の期限を確認し、必要ならリフレッシュする。
    /// リフレッシュの失敗は終端。
    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    pub async fn send(
        &self,
        principal_id: &PrincipalId,
        credential: &mut Credential,
        raw: &RawMessage,
    ) -> SendResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Err(e) = self
                .credentials
                .refresh_if_needed(principal_id, credential)
                .await
            {
                return SendResult::Failed(SendError::Auth(e.into_auth_error()));
            }

            let error = match self.mail_api.send_message(credential, raw).await {
                Ok(remote) => return SendResult::Sent(remote),
                Err(error) => error,
            };

            if !error.kind.is_retryable() {
                tracing::warn!(
                    attempt,
                    kind = %error.kind,
                    "送信に失敗しました（再試行しません）: {}",
                    error.message
                );
                return SendResult::Failed(match error.kind {
                    MailApiErrorKind::Unauthorized => SendError::Unauthorized,
                    MailApiErrorKind::Forbidden => SendError::PermissionDenied,
                    _ => SendError::Rejected(error.message),
                });
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    attempt,
                    kind = %error.kind,
                    "送信の再試行が上限に達しました: {}",
                    error.message
                );
                return SendResult::Failed(match error.kind {
                    MailApiErrorKind::RateLimited => SendError::RateLimitExceeded { attempts: attempt },
                    _ => SendError::NetworkExhausted {
                        attempts: attempt,
                        message:  error.message,
                    },
                });
            }

            let delay = self.policy.backoff(attempt, error.kind);
            tracing::info!(
                attempt,
                kind = %error.kind,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "送信を再試行します"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
