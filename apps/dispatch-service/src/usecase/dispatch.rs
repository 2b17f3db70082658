//! # 一括ディスパッチ
//!
//! プリンシパルの応募メールを複数の宛先へ順番に送信し、宛先ごとの結果を
//! 追跡レコードとして永続化する。
//!
//! - 添付ファイル参照はバッチごとに一度だけ解決する
//! - 失敗以外の追跡レコードが既にある宛先は「応募済み」としてスキップする
//! - 失敗レコードがある宛先は再送し、同じレコードを更新する
//! - 宛先 1 件の失敗でバッチは中断しない。中断するのは送信前の
//!   プリンシパル単位の認証情報エラーだけ
//! - リモート送信の間には一定の待機を挟む

use std::{sync::Arc, time::Duration};

use applytrack_domain::{
    clock::Clock,
    credential::Credential,
    dispatch::{BulkResult, DispatchDetail, DispatchOutcome, Target},
    message::{AttachmentPayload, AttachmentRef, OutboundMessage},
    principal::{EmailAddress, Principal},
    send::{SendError, SendResult},
    tracking::{DeliveryStatus, TrackingRecord},
};
use applytrack_infra::{
    AttachmentStore,
    mail::{RawMessage, composer},
    repository::TrackingRecordRepository,
};
use applytrack_shared::{event_log::event, log_business_event};
use serde::Deserialize;
use thiserror::Error;

use super::{
    ApplicationRenderer,
    CredentialError,
    CredentialService,
    SendPipeline,
    pacing::Sleeper,
};

/// 一括送信の入力
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchRequest {
    pub principal:   Principal,
    pub targets:     Vec<Target>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// バッチ全体を中断するエラー
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// 一括ディスパッチャー
pub struct BulkDispatcher {
    records:     Arc<dyn TrackingRecordRepository>,
    attachments: Arc<dyn AttachmentStore>,
    credentials: Arc<CredentialService>,
    pipeline:    SendPipeline,
    renderer:    ApplicationRenderer,
    sleeper:     Arc<dyn Sleeper>,
    clock:       Arc<dyn Clock>,
    pacing:      Duration,
}

/// 宛先 1 件の処理結果
struct TargetOutcome {
    outcome: DispatchOutcome,
    message: String,
    record:  Option<TrackingRecord>,
}

impl BulkDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Arc<dyn TrackingRecordRepository>,
        attachments: Arc<dyn AttachmentStore>,
        credentials: Arc<CredentialService>,
        pipeline: SendPipeline,
        renderer: ApplicationRenderer,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
        pacing: Duration,
    ) -> Self {
        Self {
            records,
            attachments,
            credentials,
            pipeline,
            renderer,
            sleeper,
            clock,
            pacing,
        }
    }

    /// 宛先リストへ一括送信する
    ///
    /// # Errors
    ///
    /// - `DispatchError::Credential`: トークン状態がない、または認証情報を組み立てられない。
    ///   この場合はリモート呼び出しを一切行わない
    #[tracing::instrument(
        skip_all,
        fields(principal_id = %request.principal.id, targets = request.targets.len())
    )]
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<BulkResult, DispatchError> {
        let principal = &request.principal;
        let mut credential = self.credentials.build_credentials(&principal.id).await?;

        let (attachments, skipped) =
            composer::resolve_attachments(self.attachments.as_ref(), &request.attachments).await;
        if !skipped.is_empty() {
            tracing::warn!(
                skipped = skipped.len(),
                "解決できない添付ファイルを除いて送信します"
            );
        }

        let mut result = BulkResult::with_total(request.targets.len());
        let mut submitted = false;

        for target in &request.targets {
            let outcome = self
                .dispatch_one(
                    principal,
                    target,
                    &attachments,
                    &mut credential,
                    &mut submitted,
                )
                .await;

            result.record(DispatchDetail {
                label:     target.label.clone(),
                recipient: target.email.clone(),
                outcome:   outcome.outcome,
                message:   outcome.message,
                record_id: outcome.record.map(|r| r.id().clone()),
            });
        }

        log_business_event!(
            event.category = event::category::DISPATCH,
            event.action = event::action::DISPATCH_COMPLETED,
            event.principal_id = %principal.id,
            event.entity_type = event::entity_type::DISPATCH_JOB,
            event.result = event::result::SUCCESS,
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            already_applied = result.already_applied,
            "一括送信が完了しました"
        );

        Ok(result)
    }

    async fn dispatch_one(
        &self,
        principal: &Principal,
        target: &Target,
        attachments: &[AttachmentPayload],
        credential: &mut Credential,
        submitted: &mut bool,
    ) -> TargetOutcome {
        let normalized = EmailAddress::normalize(&target.email);
        let recipient_email = normalized.as_str();

        let existing = match self
            .records
            .find_by_principal_and_recipient(&principal.id, recipient_email)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(
                    recipient = recipient_email,
                    "追跡レコードの確認に失敗しました: {e}"
                );
                return TargetOutcome {
                    outcome: DispatchOutcome::Failed,
                    message: format!("追跡レコードを確認できません: {e}"),
                    record:  None,
                };
            }
        };

        if let Some(existing) = existing
            .as_ref()
            .filter(|r| r.status() != DeliveryStatus::Failed)
        {
            log_business_event!(
                event.category = event::category::DISPATCH,
                event.action = event::action::MESSAGE_SKIPPED,
                event.principal_id = %principal.id,
                event.entity_type = event::entity_type::TRACKING_RECORD,
                event.entity_id = %existing.id(),
                event.result = event::result::SKIPPED,
                recipient = recipient_email,
                "応募済みのためスキップしました"
            );
            return TargetOutcome {
                outcome: DispatchOutcome::AlreadyApplied,
                message: "応募済みです".to_string(),
                record:  Some(existing.clone()),
            };
        }

        let (recipient, send_result) = match self.prepare(principal, target, attachments) {
            Ok((recipient, raw)) => {
                if *submitted {
                    self.sleeper.sleep(self.pacing).await;
                }
                *submitted = true;
                let result = self.pipeline.send(&principal.id, credential, &raw).await;
                (Some(recipient), result)
            }
            Err(e) => (None, SendResult::Failed(e)),
        };

        let now = self.clock.now();
        let fresh = match (&send_result, recipient) {
            (SendResult::Sent(remote), Some(recipient)) => TrackingRecord::new_sent(
                principal.id.clone(),
                &recipient,
                target.label.clone(),
                remote.clone(),
                now,
            ),
            _ => TrackingRecord::new_failed(
                principal.id.clone(),
                recipient_email,
                target.label.clone(),
                send_result.message(),
                now,
            ),
        };

        let persisted = match existing {
            Some(existing) => {
                let record = existing.redispatched(fresh);
                self.records.update(&record).await.map(|()| record)
            }
            None => self.records.insert(&fresh).await.map(|()| fresh),
        };
        let record = match persisted {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(
                    recipient = recipient_email,
                    "追跡レコードの保存に失敗しました: {e}"
                );
                None
            }
        };

        match &send_result {
            SendResult::Sent(remote) => log_business_event!(
                event.category = event::category::DISPATCH,
                event.action = event::action::MESSAGE_SENT,
                event.principal_id = %principal.id,
                event.entity_type = event::entity_type::TRACKING_RECORD,
                event.result = event::result::SUCCESS,
                recipient = recipient_email,
                message_id = %remote.message_id,
                "応募メールを送信しました"
            ),
            SendResult::Failed(e) => log_business_event!(
                event.category = event::category::DISPATCH,
                event.action = event::action::MESSAGE_FAILED,
                event.principal_id = %principal.id,
                event.entity_type = event::entity_type::TRACKING_RECORD,
                event.result = event::result::FAILURE,
                recipient = recipient_email,
                error = %e,
                "応募メールの送信に失敗しました"
            ),
        }

        TargetOutcome {
            outcome: if send_result.is_success() {
                DispatchOutcome::Sent
            } else {
                DispatchOutcome::Failed
            },
            message: send_result.message(),
            record,
        }
    }

    /// 宛先アドレスを検証し、本文を生成して送信用に組み立てる
    fn prepare(
        &self,
        principal: &Principal,
        target: &Target,
        attachments: &[AttachmentPayload],
    ) -> Result<(EmailAddress, RawMessage), SendError> {
        let recipient = EmailAddress::new(target.email.trim())
            .map_err(|_| SendError::InvalidRecipient(target.email.clone()))?;
        let rendered = self
            .renderer
            .render(principal, target)
            .map_err(|e| SendError::Composition(e.to_string()))?;
        let message = OutboundMessage::compose(
            principal.email.clone(),
            recipient.clone(),
            rendered.subject,
            rendered.body,
            attachments.to_vec(),
        );
        let raw = composer::encode(&message).map_err(|e| SendError::Composition(e.to_string()))?;
        Ok((recipient, raw))
    }
}
