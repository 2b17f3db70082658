//! # 配信状況トラッカー
//!
//! 送信済みメッセージとスレッドのメタデータをポーリングし、追跡レコードの
//! ステータスを推定して更新する。プッシュ通知は使わない。
//!
//! - ステータスは単調に進み、`responded` と `failed` は終端
//! - 1 件のポーリング失敗はログに残して次のレコードへ進む
//! - スイープを中断するのはプリンシパル単位の認証情報エラーだけ
//! - リモート呼び出しの間には一定の待機を挟む

use std::{sync::Arc, time::Duration};

use applytrack_domain::{
    clock::Clock,
    credential::Credential,
    mail_api::{MailApiError, RemoteThread},
    principal::PrincipalId,
    tracking::{DeliveryInference, DeliveryStatus, RemoteObservation, TrackingRecord, TrackingRecordId},
};
use applytrack_infra::{InfraError, mail::MailApi, repository::TrackingRecordRepository};
use applytrack_shared::{event_log::event, log_business_event};
use thiserror::Error;

use super::{CredentialError, CredentialService, pacing::Sleeper};

/// トラッカーのエラー
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("追跡レコードの読み書きに失敗しました: {0}")]
    Repository(#[from] InfraError),

    #[error("追跡レコードが見つかりません: {0}")]
    NotFound(TrackingRecordId),

    #[error(transparent)]
    MailApi(#[from] MailApiError),
}

/// トラッカーの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// リモート呼び出し間の待機
    pub pacing:        Duration,
    pub inference:     DeliveryInference,
    /// 返信確認の対象期間
    pub recent_window: chrono::Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            pacing:        Duration::from_millis(200),
            inference:     DeliveryInference::default(),
            recent_window: chrono::Duration::days(7),
        }
    }
}

/// 単一レコードを強制リフレッシュした結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub old_status: DeliveryStatus,
    pub new_status: DeliveryStatus,
    pub record:     TrackingRecord,
}

/// プリンシパル単位の同期結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// ステータスが変化したレコード数
    pub updated:   usize,
    /// 新たに返信を検出したレコード数
    pub responses: usize,
}

/// 配信状況トラッカー
pub struct StatusTracker {
    records:     Arc<dyn TrackingRecordRepository>,
    credentials: Arc<CredentialService>,
    mail_api:    Arc<dyn MailApi>,
    sleeper:     Arc<dyn Sleeper>,
    clock:       Arc<dyn Clock>,
    settings:    TrackerSettings,
}

impl StatusTracker {
    pub fn new(
        records: Arc<dyn TrackingRecordRepository>,
        credentials: Arc<CredentialService>,
        mail_api: Arc<dyn MailApi>,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            records,
            credentials,
            mail_api,
            sleeper,
            clock,
            settings,
        }
    }

    /// 1 件のレコードをポーリングして更新する
    ///
    /// リモートメッセージ ID がなければ変更しない。ただし `force` の場合は
    /// `failed` にする。変化があった場合だけ永続化する。
    #[tracing::instrument(skip_all, level = "debug", fields(record_id = %record.id()))]
    pub async fn refresh_status(
        &self,
        credential: &mut Credential,
        record: TrackingRecord,
        force: bool,
    ) -> Result<TrackingRecord, TrackerError> {
        let Some(message_id) = record.message_id().map(str::to_string) else {
            if force {
                return self.fail_without_remote(record).await;
            }
            return Ok(record);
        };
        if record.status().is_terminal() {
            return Ok(record);
        }

        self.credentials
            .refresh_if_needed(record.principal_id(), credential)
            .await?;

        let observation = match self.mail_api.get_message(credential, &message_id).await {
            Ok(message) => {
                let thread = if message.is_sent() {
                    let thread_id = record
                        .thread_id()
                        .map_or_else(|| message.thread_id.clone(), str::to_string);
                    self.fetch_thread(credential, &thread_id).await?
                } else {
                    None
                };
                RemoteObservation::Found { message, thread }
            }
            Err(e) if e.is_not_found() => RemoteObservation::Missing,
            Err(e) => return Err(e.into()),
        };

        let updated =
            record
                .clone()
                .observed(observation, &self.settings.inference, self.clock.now());
        self.persist_if_changed(&record, updated).await
    }

    /// プリンシパルのポーリング対象をすべて更新する
    ///
    /// ステータスが変化したレコード数を返す。
    #[tracing::instrument(skip_all, fields(%principal_id))]
    pub async fn refresh_all_for_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<usize, TrackerError> {
        let mut credential = self.credentials.build_credentials(principal_id).await?;
        let records = self.records.find_trackable_by_principal(principal_id).await?;

        let mut changed = 0;
        for (index, record) in records.into_iter().enumerate() {
            if index > 0 {
                self.sleeper.sleep(self.settings.pacing).await;
            }
            let record_id = record.id().clone();
            let old_status = record.status();
            match self.refresh_status(&mut credential, record, false).await {
                Ok(updated) if updated.status() != old_status => changed += 1,
                Ok(_) => {}
                Err(TrackerError::Credential(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(%record_id, "追跡レコードのポーリングに失敗しました: {e}");
                }
            }
        }

        tracing::info!(changed, "ステータスの一括更新が完了しました");
        Ok(changed)
    }

    /// 最近送信したレコードの返信だけを確認する
    ///
    /// 対象は期間内に送信され、スレッド ID を持ち、まだ返信のないレコード。
    /// 新たに返信を検出したレコード数を返す。
    #[tracing::instrument(skip_all, fields(%principal_id))]
    pub async fn check_recent_responses(
        &self,
        principal_id: &PrincipalId,
        window: chrono::Duration,
    ) -> Result<usize, TrackerError> {
        let mut credential = self.credentials.build_credentials(principal_id).await?;
        let since = self.clock.now() - window;
        let records = self
            .records
            .find_recent_without_response(principal_id, since)
            .await?;

        let mut found = 0;
        for (index, record) in records.into_iter().enumerate() {
            if index > 0 {
                self.sleeper.sleep(self.settings.pacing).await;
            }
            let record_id = record.id().clone();
            match self.check_response(&mut credential, record).await {
                Ok(true) => found += 1,
                Ok(false) => {}
                Err(TrackerError::Credential(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(%record_id, "返信の確認に失敗しました: {e}");
                }
            }
        }

        Ok(found)
    }

    /// 1 件のレコードを強制的にリフレッシュする
    ///
    /// # Errors
    ///
    /// - `TrackerError::NotFound`: プリンシパルのレコードに該当しない
    #[tracing::instrument(skip_all, fields(%principal_id, %record_id))]
    pub async fn force_refresh(
        &self,
        principal_id: &PrincipalId,
        record_id: &TrackingRecordId,
    ) -> Result<RefreshOutcome, TrackerError> {
        let record = self
            .records
            .find_by_id(principal_id, record_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(record_id.clone()))?;
        let old_status = record.status();

        // ポーリング対象外のレコードには認証情報を使わない
        let record = if record.is_trackable() {
            let mut credential = self.credentials.build_credentials(principal_id).await?;
            self.refresh_status(&mut credential, record, true).await?
        } else {
            self.fail_without_remote(record).await?
        };

        Ok(RefreshOutcome {
            old_status,
            new_status: record.status(),
            record,
        })
    }

    /// 全件の更新に続いて最近の返信を確認する
    pub async fn sync_principal(&self, principal_id: &PrincipalId) -> Result<SyncSummary, TrackerError> {
        let updated = self.refresh_all_for_principal(principal_id).await?;
        let responses = self
            .check_recent_responses(principal_id, self.settings.recent_window)
            .await?;
        Ok(SyncSummary { updated, responses })
    }

    /// スレッドを取得する。スレッドが消えていれば `None`
    async fn fetch_thread(
        &self,
        credential: &Credential,
        thread_id: &str,
    ) -> Result<Option<RemoteThread>, TrackerError> {
        match self.mail_api.get_thread(credential, thread_id).await {
            Ok(thread) => Ok(Some(thread)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_response(
        &self,
        credential: &mut Credential,
        record: TrackingRecord,
    ) -> Result<bool, TrackerError> {
        let Some(thread_id) = record.thread_id().map(str::to_string) else {
            return Ok(false);
        };
        self.credentials
            .refresh_if_needed(record.principal_id(), credential)
            .await?;
        let Some(thread) = self.fetch_thread(credential, &thread_id).await? else {
            return Ok(false);
        };

        let updated = record.clone().observed_thread(&thread, self.clock.now());
        let detected = updated.has_response() && !record.has_response();
        self.persist_if_changed(&record, updated).await?;
        Ok(detected)
    }

    /// リモート ID のないレコードを `failed` にする（終端なら変更しない）
    async fn fail_without_remote(
        &self,
        record: TrackingRecord,
    ) -> Result<TrackingRecord, TrackerError> {
        if record.message_id().is_some() || record.status().is_terminal() {
            return Ok(record);
        }
        let failed = record
            .clone()
            .marked_failed("リモートメッセージ ID がありません", self.clock.now());
        self.persist_if_changed(&record, failed).await
    }

    async fn persist_if_changed(
        &self,
        before: &TrackingRecord,
        after: TrackingRecord,
    ) -> Result<TrackingRecord, TrackerError> {
        if &after == before {
            return Ok(after);
        }
        self.records.update(&after).await?;

        if after.status() != before.status() {
            log_business_event!(
                event.category = event::category::TRACKING,
                event.action = event::action::STATUS_CHANGED,
                event.principal_id = %after.principal_id(),
                event.entity_type = event::entity_type::TRACKING_RECORD,
                event.entity_id = %after.id(),
                event.result = event::result::SUCCESS,
                old_status = %before.status(),
                new_status = %after.status(),
                "追跡ステータスが変化しました"
            );
        }
        if after.has_response() && !before.has_response() {
            log_business_event!(
                event.category = event::category::TRACKING,
                event.action = event::action::RESPONSE_DETECTED,
                event.principal_id = %after.principal_id(),
                event.entity_type = event::entity_type::TRACKING_RECORD,
                event.entity_id = %after.id(),
                event.result = event::result::SUCCESS,
                response_count = after.response_count(),
                "返信を検出しました"
            );
        }

        Ok(after)
    }
}
