//! # メッセージ組み立て
//!
//! [`OutboundMessage`] を RFC 5322 の MIME メッセージに組み立て、
//! base64url で符号化する。
//!
//! 構造は `multipart/mixed` で、先頭に本文のテキストパート、続いて
//! 添付ごとに `Content-Disposition: attachment; filename=...` 付きの
//! base64 バイナリパートを置く。

use applytrack_domain::message::{AttachmentPayload, AttachmentRef, ComposeError, OutboundMessage};
use applytrack_shared::event_log::error;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use lettre::message::{
    Attachment,
    Body,
    Mailbox,
    Message,
    MultiPart,
    SinglePart,
    header::{ContentTransferEncoding, ContentType},
};

use crate::attachment_store::AttachmentStore;

/// base64url 符号化済みの RFC 5322 メッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage(String);

impl RawMessage {
    /// 符号化済みの文字列から作る
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 符号化前のバイト列に戻す
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        URL_SAFE.decode(self.0.as_bytes())
    }
}

/// メッセージを組み立てて符号化する
pub fn encode(message: &OutboundMessage) -> Result<RawMessage, ComposeError> {
    let from: Mailbox = message
        .sender
        .as_str()
        .parse()
        .map_err(|e| ComposeError::InvalidAddress(format!("{}: {e}", message.sender)))?;
    let to: Mailbox = message
        .recipient
        .as_str()
        .parse()
        .map_err(|e| ComposeError::InvalidAddress(format!("{}: {e}", message.recipient)))?;

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
    for attachment in &message.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .or_else(|_| ContentType::parse("application/octet-stream"))
            .map_err(|e| ComposeError::Build(e.to_string()))?;
        let body =
            Body::new_with_encoding(attachment.data.clone(), ContentTransferEncoding::Base64)
                .map_err(|_| {
                    ComposeError::Build(format!("{} を符号化できません", attachment.filename))
                })?;
        parts = parts
            .singlepart(Attachment::new(attachment.filename.clone()).body(body, content_type));
    }

    let email = Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .multipart(parts)
        .map_err(|e| ComposeError::Build(e.to_string()))?;

    Ok(RawMessage(URL_SAFE.encode(email.formatted())))
}

/// 添付ファイル参照をペイロードに解決する
///
/// 解決できたペイロードと、スキップした参照を返す。
/// 存在しない参照や読み出しに失敗した参照は警告を出してスキップし、送信は妨げない。
pub async fn resolve_attachments(
    store: &dyn AttachmentStore,
    references: &[AttachmentRef],
) -> (Vec<AttachmentPayload>, Vec<AttachmentRef>) {
    let mut resolved = Vec::with_capacity(references.len());
    let mut skipped = Vec::new();

    for reference in references {
        match store.load(reference).await {
            Ok(Some(data)) => resolved.push(AttachmentPayload::new(reference.filename.clone(), data)),
            Ok(None) => {
                tracing::warn!(
                    key = %reference.key,
                    filename = %reference.filename,
                    "添付ファイルが見つからないためスキップします"
                );
                skipped.push(reference.clone());
            }
            Err(e) => {
                tracing::warn!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::ATTACHMENT,
                    key = %reference.key,
                    "添付ファイルを読み出せないためスキップします: {e}"
                );
                skipped.push(reference.clone());
            }
        }
    }

    (resolved, skipped)
}
