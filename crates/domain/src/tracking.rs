//! # 追跡レコード
//!
//! 送信した応募メール 1 通ごとの配信状況を表す。
//!
//! ## ライフサイクル
//!
//! ```text
//! draft → sent → delivered → read → responded
//!   └───────┴────────┴─────────┴──→ failed
//! ```
//!
//! 状態は単調に進み、`responded` と `failed` は終端。プッシュ通知は使えないため、
//! リモートのメッセージ・スレッドをポーリングした観測結果と経過時間から推定する。
//!
//! レコードは送信試行が終わった時点で作成され（失敗も `failed` として残る）、
//! 追跡処理が削除することはない。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    DomainError,
    mail_api::{RemoteMessage, RemoteMessageRef, RemoteThread},
    principal::{EmailAddress, PrincipalId},
};

define_uuid_id! {
    /// 追跡レコード ID
    pub struct TrackingRecordId;
}

/// 配信ステータス
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    /// リモートでまだ下書き
    Draft,
    /// 送信済み
    Sent,
    /// 配信済み（経過時間から推定）
    Delivered,
    /// 既読（経過時間または返信から推定）
    Read,
    /// 返信あり
    Responded,
    /// 失敗
    Failed,
}

impl DeliveryStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Responded => 4,
            Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::Failed)
    }

    /// `next` へ遷移できるか
    ///
    /// 終端からはどこへも進めない。`failed` は非終端のどこからでも到達できる。
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }
}

/// 経過時間による推定の閾値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryInference {
    /// 送信からこの時間が経てば配信済みとみなす
    pub delivered_after: Duration,
    /// 送信からこの時間が経てば既読とみなす
    pub read_after:      Duration,
}

impl Default for DeliveryInference {
    fn default() -> Self {
        Self {
            delivered_after: Duration::hours(1),
            read_after:      Duration::hours(4),
        }
    }
}

/// リモートをポーリングした観測結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteObservation {
    /// リモートにメッセージが存在しない
    Missing,
    /// メッセージのメタデータ（スレッドは取得できた場合のみ）
    Found {
        message: RemoteMessage,
        thread:  Option<RemoteThread>,
    },
}

/// 追跡レコード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRecord {
    id:                   TrackingRecordId,
    principal_id:         PrincipalId,
    recipient_email:      String,
    recipient_label:      String,
    status:               DeliveryStatus,
    message_id:           Option<String>,
    thread_id:            Option<String>,
    sent_at:              Option<DateTime<Utc>>,
    delivered_at:         Option<DateTime<Utc>>,
    read_at:              Option<DateTime<Utc>>,
    response_received_at: Option<DateTime<Utc>>,
    has_response:         bool,
    response_count:       i32,
    failure_reason:       Option<String>,
    created_at:           DateTime<Utc>,
    updated_at:           DateTime<Utc>,
}

/// 追跡レコードの DB 復元パラメータ
pub struct StoredTrackingRecord {
    pub id:                   TrackingRecordId,
    pub principal_id:         PrincipalId,
    pub recipient_email:      String,
    pub recipient_label:      String,
    pub status:               DeliveryStatus,
    pub message_id:           Option<String>,
    pub thread_id:            Option<String>,
    pub sent_at:              Option<DateTime<Utc>>,
    pub delivered_at:         Option<DateTime<Utc>>,
    pub read_at:              Option<DateTime<Utc>>,
    pub response_received_at: Option<DateTime<Utc>>,
    pub has_response:         bool,
    pub response_count:       i32,
    pub failure_reason:       Option<String>,
    pub created_at:           DateTime<Utc>,
    pub updated_at:           DateTime<Utc>,
}

impl TrackingRecord {
    /// 送信成功の結果からレコードを作成する
    pub fn new_sent(
        principal_id: PrincipalId,
        recipient: &EmailAddress,
        recipient_label: impl Into<String>,
        remote: RemoteMessageRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TrackingRecordId::new(),
            principal_id,
            recipient_email: recipient.as_str().to_string(),
            recipient_label: recipient_label.into(),
            status: DeliveryStatus::Sent,
            message_id: Some(remote.message_id),
            thread_id: Some(remote.thread_id),
            sent_at: Some(now),
            delivered_at: None,
            read_at: None,
            response_received_at: None,
            has_response: false,
            response_count: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 送信失敗の結果からレコードを作成する
    ///
    /// 宛先アドレスが不正な場合も記録できるよう、アドレスは検証前の文字列で受け取る。
    pub fn new_failed(
        principal_id: PrincipalId,
        recipient_email: impl Into<String>,
        recipient_label: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TrackingRecordId::new(),
            principal_id,
            recipient_email: recipient_email.into(),
            recipient_label: recipient_label.into(),
            status: DeliveryStatus::Failed,
            message_id: None,
            thread_id: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            response_received_at: None,
            has_response: false,
            response_count: 0,
            failure_reason: Some(reason.into()),
            created_at: now,
            updated_at: now,
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: メッセージ ID とスレッド ID の片方だけが存在する
    pub fn from_db(record: StoredTrackingRecord) -> Result<Self, DomainError> {
        if record.message_id.is_some() != record.thread_id.is_some() {
            return Err(DomainError::Validation(format!(
                "追跡レコード {} のメッセージ ID とスレッド ID は組で存在する必要があります",
                record.id
            )));
        }

        Ok(Self {
            id: record.id,
            principal_id: record.principal_id,
            recipient_email: record.recipient_email,
            recipient_label: record.recipient_label,
            status: record.status,
            message_id: record.message_id,
            thread_id: record.thread_id,
            sent_at: record.sent_at,
            delivered_at: record.delivered_at,
            read_at: record.read_at,
            response_received_at: record.response_received_at,
            has_response: record.has_response,
            response_count: record.response_count,
            failure_reason: record.failure_reason,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    // Getter メソッド

    pub fn id(&self) -> &TrackingRecordId {
        &self.id
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal_id
    }

    pub fn recipient_email(&self) -> &str {
        &self.recipient_email
    }

    pub fn recipient_label(&self) -> &str {
        &self.recipient_label
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn read_at(&self) -> Option<DateTime<Utc>> {
        self.read_at
    }

    pub fn response_received_at(&self) -> Option<DateTime<Utc>> {
        self.response_received_at
    }

    pub fn has_response(&self) -> bool {
        self.has_response
    }

    pub fn response_count(&self) -> i32 {
        self.response_count
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // ビジネスロジックメソッド

    /// ポーリング対象か（非終端かつリモート ID を持つ）
    pub fn is_trackable(&self) -> bool {
        !self.status.is_terminal() && self.message_id.is_some()
    }

    /// 失敗したレコードへの再送結果で、レコードをその場で作り直す
    ///
    /// ID と作成日時は維持し、それ以外は新しい送信結果で置き換える。
    pub fn redispatched(self, fresh: TrackingRecord) -> Self {
        Self {
            id: self.id,
            created_at: self.created_at,
            ..fresh
        }
    }

    /// 失敗として終端させる
    ///
    /// 既に終端の場合は変更しない。
    pub fn marked_failed(self, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        if !self.status.can_advance_to(DeliveryStatus::Failed) {
            return self;
        }
        Self {
            status: DeliveryStatus::Failed,
            failure_reason: Some(reason.into()),
            updated_at: now,
            ..self
        }
    }

    /// ポーリングの観測結果を反映した新しいインスタンスを返す
    ///
    /// 終端のレコードは変更しない。`updated_at` は観測を反映したときに進む。
    pub fn observed(
        self,
        observation: RemoteObservation,
        inference: &DeliveryInference,
        now: DateTime<Utc>,
    ) -> Self {
        if self.status.is_terminal() {
            return self;
        }

        let (message, thread) = match observation {
            RemoteObservation::Missing => {
                return self.marked_failed("リモートメッセージが見つかりません", now);
            }
            RemoteObservation::Found { message, thread } => (message, thread),
        };

        if message.is_draft() {
            let mut record = self;
            if record.status.can_advance_to(DeliveryStatus::Draft) {
                record.status = DeliveryStatus::Draft;
            }
            record.updated_at = now;
            return record;
        }

        if !message.is_sent() {
            return self;
        }

        let mut record = self;
        if record.sent_at.is_none() {
            record.sent_at = Some(message.internal_date.unwrap_or(now));
        }
        if record.status == DeliveryStatus::Draft {
            record.status = DeliveryStatus::Sent;
        }

        let record = match thread {
            Some(thread) if thread.has_reply() => record.with_reply(&thread, now),
            _ => record.with_elapsed_time(inference, now),
        };

        Self {
            updated_at: now,
            ..record
        }
    }

    /// スレッドの返信だけを確認した結果を反映する
    ///
    /// 返信が無い場合、または既に返信を記録済みの場合は変更しない。
    pub fn observed_thread(self, thread: &RemoteThread, now: DateTime<Utc>) -> Self {
        if self.has_response || !thread.has_reply() {
            return self;
        }
        if !self.status.can_advance_to(DeliveryStatus::Responded) {
            return self;
        }
        Self {
            updated_at: now,
            ..self.with_reply(thread, now)
        }
    }

    fn with_reply(self, thread: &RemoteThread, now: DateTime<Utc>) -> Self {
        let replied_at = thread.latest_message_at().unwrap_or(now);
        let sent_at = self.sent_at.unwrap_or(replied_at);
        let response_count = i32::try_from(thread.reply_count()).unwrap_or(i32::MAX);

        Self {
            status: DeliveryStatus::Responded,
            has_response: true,
            response_count,
            response_received_at: self.response_received_at.or(Some(replied_at)),
            delivered_at: self.delivered_at.or(Some(sent_at)),
            read_at: self.read_at.or(Some(replied_at)),
            ..self
        }
    }

    fn with_elapsed_time(self, inference: &DeliveryInference, now: DateTime<Utc>) -> Self {
        let Some(sent_at) = self.sent_at else {
            return self;
        };
        let elapsed = now - sent_at;

        let mut record = self;
        if elapsed >= inference.delivered_after
            && record.status.can_advance_to(DeliveryStatus::Delivered)
        {
            record.status = DeliveryStatus::Delivered;
            record.delivered_at = record
                .delivered_at
                .or(Some(sent_at + inference.delivered_after));
        }
        if elapsed >= inference.read_after && record.status.can_advance_to(DeliveryStatus::Read) {
            record.status = DeliveryStatus::Read;
            record.delivered_at = record
                .delivered_at
                .or(Some(sent_at + inference.delivered_after));
            record.read_at = record.read_at.or(Some(sent_at + inference.read_after));
        }
        record
    }
}
