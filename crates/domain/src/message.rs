//! # 送信メッセージ
//!
//! 応募メールの送信前の形を定義する。MIME への組み立てと base64url への
//! 符号化はインフラ層（`applytrack_infra::mail::composer`）が行う。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::principal::EmailAddress;

/// 添付ファイル参照
///
/// 添付ペイロードストア上のキーと、受信者に見せるファイル名の組。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub key:      String,
    pub filename: String,
}

/// 解決済みの添付ファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPayload {
    pub filename:     String,
    pub content_type: String,
    pub data:         Vec<u8>,
}

impl AttachmentPayload {
    /// ファイル名の拡張子から Content-Type を決めてペイロードを作る
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = content_type_for(&filename);
        Self {
            filename,
            content_type,
            data,
        }
    }
}

/// 拡張子から Content-Type を推定する
///
/// 不明な拡張子は `application/octet-stream`。
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// メッセージ組み立てエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// アドレスがメールヘッダとして解釈できない
    #[error("アドレスが不正です: {0}")]
    InvalidAddress(String),

    /// MIME の組み立てに失敗
    #[error("メッセージの組み立てに失敗しました: {0}")]
    Build(String),
}

/// 送信準備が整ったメッセージ
///
/// 添付は宣言順を保つ。ペイロードが解決できなかった添付は
/// ここに到達する前に取り除かれている。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub sender:      EmailAddress,
    pub recipient:   EmailAddress,
    pub subject:     String,
    pub body:        String,
    pub attachments: Vec<AttachmentPayload>,
}

impl OutboundMessage {
    pub fn compose(
        sender: EmailAddress,
        recipient: EmailAddress,
        subject: impl Into<String>,
        body: impl Into<String>,
        attachments: Vec<AttachmentPayload>,
    ) -> Self {
        Self {
            sender,
            recipient,
            subject: subject.into(),
            body: body.into(),
            attachments,
        }
    }

    pub fn attachment_filenames(&self) -> Vec<&str> {
        self.attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect()
    }
}
