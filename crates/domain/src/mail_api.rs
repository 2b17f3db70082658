//! # リモートメール API のドメイン型
//!
//! 送信・メタデータ取得の結果と、トランスポートが返すエラー分類を定義する。
//! エラーは閉じた列挙（[`MailApiErrorKind`]）で返し、送信パイプラインは
//! メッセージ文字列を解釈せずにこの分類だけで再試行を判断する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 送信済みメッセージのリモート識別子
///
/// メッセージ ID とスレッド ID は常に組で存在する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessageRef {
    pub message_id: String,
    pub thread_id:  String,
}

/// リモートメッセージのラベル
pub mod label {
    pub const SENT: &str = "SENT";
    pub const DRAFT: &str = "DRAFT";
}

/// リモートメッセージのメタデータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id:            String,
    pub thread_id:     String,
    pub label_ids:     Vec<String>,
    /// メールボックスが受け付けた時刻
    pub internal_date: Option<DateTime<Utc>>,
}

impl RemoteMessage {
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    pub fn is_draft(&self) -> bool {
        self.has_label(label::DRAFT)
    }

    pub fn is_sent(&self) -> bool {
        self.has_label(label::SENT)
    }
}

/// リモートスレッドのメタデータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteThread {
    pub id:       String,
    pub messages: Vec<RemoteMessage>,
}

impl RemoteThread {
    /// 返信の件数（スレッド内のメッセージ数 - 1）
    pub fn reply_count(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }

    pub fn has_reply(&self) -> bool {
        self.reply_count() > 0
    }

    /// スレッド内で最も新しいメッセージの時刻
    pub fn latest_message_at(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().filter_map(|m| m.internal_date).max()
    }
}

/// メール API エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MailApiErrorKind {
    /// 429 Too Many Requests
    RateLimited,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden（スコープ不足）
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// タイムアウト
    Timeout,
    /// 接続失敗などの一時的なネットワークエラー
    Network,
    /// 上記以外
    Other,
}

impl MailApiErrorKind {
    /// 再試行で回復しうるか
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Network)
    }
}

/// メール API エラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("メール API エラー ({kind}): {message}")]
pub struct MailApiError {
    pub kind:    MailApiErrorKind,
    pub message: String,
}

impl MailApiError {
    pub fn new(kind: MailApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::RateLimited, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::Network, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(MailApiErrorKind::Other, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == MailApiErrorKind::NotFound
    }
}
