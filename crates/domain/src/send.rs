//! # 送信結果
//!
//! 送信パイプラインの最終結果。成功時はリモート識別子を、失敗時は
//! 分類済みの理由を持つ。識別子は成功時にだけ存在する。

use thiserror::Error;

use crate::{credential::AuthError, mail_api::RemoteMessageRef};

/// 送信失敗の理由
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// 429 が再試行上限まで続いた
    #[error("レート制限を超過しました（{attempts} 回試行）")]
    RateLimitExceeded { attempts: u32 },

    /// 401: プリンシパルの再認証が必要
    #[error("メール API が認証を拒否しました。再認証が必要です")]
    Unauthorized,

    /// 403: 付与されたスコープが不足している
    #[error("メール送信の権限がありません（スコープ不足）")]
    PermissionDenied,

    /// タイムアウト・ネットワークエラーが再試行上限まで続いた
    #[error("ネットワークエラーが続きました（{attempts} 回試行）: {message}")]
    NetworkExhausted { attempts: u32, message: String },

    /// 再試行しない失敗
    #[error("送信に失敗しました: {0}")]
    Rejected(String),

    /// パイプライン内の認証情報リフレッシュに失敗
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// メッセージの組み立てに失敗
    #[error("メッセージを組み立てられませんでした: {0}")]
    Composition(String),

    /// 宛先アドレスの形式が不正
    #[error("メールアドレスの形式が不正です: {0}")]
    InvalidRecipient(String),
}

/// 送信結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent(RemoteMessageRef),
    Failed(SendError),
}

impl SendResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sent(_))
    }

    /// 人間が読めるメッセージ
    pub fn message(&self) -> String {
        match self {
            Self::Sent(_) => "送信しました".to_string(),
            Self::Failed(error) => error.to_string(),
        }
    }

    pub fn remote(&self) -> Option<&RemoteMessageRef> {
        match self {
            Self::Sent(remote) => Some(remote),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SendError> {
        match self {
            Self::Sent(_) => None,
            Self::Failed(error) => Some(error),
        }
    }
}
