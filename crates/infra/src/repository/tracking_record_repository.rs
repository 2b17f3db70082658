//! # TrackingRecordRepository
//!
//! 追跡レコードの永続化を担当するリポジトリ。
//!
//! - (principal_id, recipient_email) は一意。再送は既存レコードの更新で行う
//! - 状態の更新は last-write-wins（同一レコードを並行に更新しない前提）

use applytrack_domain::{
    principal::PrincipalId,
    tracking::{DeliveryStatus, StoredTrackingRecord, TrackingRecord, TrackingRecordId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 一覧取得の絞り込み条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingRecordFilter {
    pub status: Option<DeliveryStatus>,
}

/// 追跡レコードリポジトリトレイト
#[async_trait]
pub trait TrackingRecordRepository: Send + Sync {
    /// レコードを挿入する
    async fn insert(&self, record: &TrackingRecord) -> Result<(), InfraError>;

    /// レコードをその場で更新する
    async fn update(&self, record: &TrackingRecord) -> Result<(), InfraError>;

    /// ID でレコードを検索する（所有者のプリンシパルに限る）
    async fn find_by_id(
        &self,
        principal_id: &PrincipalId,
        id: &TrackingRecordId,
    ) -> Result<Option<TrackingRecord>, InfraError>;

    /// プリンシパルのレコード一覧を新しい順に取得する
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
        filter: TrackingRecordFilter,
    ) -> Result<Vec<TrackingRecord>, InfraError>;

    /// (プリンシパル, 宛先アドレス) でレコードを検索する
    async fn find_by_principal_and_recipient(
        &self,
        principal_id: &PrincipalId,
        recipient_email: &str,
    ) -> Result<Option<TrackingRecord>, InfraError>;

    /// ポーリング対象（非終端かつリモート ID あり）のレコードを古い順に取得する
    async fn find_trackable_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Vec<TrackingRecord>, InfraError>;

    /// `since` 以降に送信され、スレッド ID を持ち、まだ返信のないレコードを取得する
    async fn find_recent_without_response(
        &self,
        principal_id: &PrincipalId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrackingRecord>, InfraError>;
}

/// DB の tracking_records テーブルの行を表す中間構造体
#[derive(sqlx::FromRow)]
struct TrackingRecordRow {
    id:                   Uuid,
    principal_id:         Uuid,
    recipient_email:      String,
    recipient_label:      String,
    status:               String,
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

impl TryFrom<TrackingRecordRow> for TrackingRecord {
    type Error = InfraError;

    fn try_from(row: TrackingRecordRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<DeliveryStatus>()
            .map_err(|e| InfraError::unexpected(format!("不正なステータス: {e}")))?;

        TrackingRecord::from_db(StoredTrackingRecord {
            id: TrackingRecordId::from_uuid(row.id),
            principal_id: PrincipalId::from_uuid(row.principal_id),
            recipient_email: row.recipient_email,
            recipient_label: row.recipient_label,
            status,
            message_id: row.message_id,
            thread_id: row.thread_id,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            response_received_at: row.response_received_at,
            has_response: row.has_response,
            response_count: row.response_count,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .map_err(|e| InfraError::unexpected(e.to_string()))
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, principal_id, recipient_email, recipient_label, status,
        message_id, thread_id,
        sent_at, delivered_at, read_at, response_received_at,
        has_response, response_count, failure_reason,
        created_at, updated_at
    FROM tracking_records
"#;

fn into_records(rows: Vec<TrackingRecordRow>) -> Result<Vec<TrackingRecord>, InfraError> {
    rows.into_iter().map(TrackingRecord::try_from).collect()
}

/// PostgreSQL 実装の TrackingRecordRepository
#[derive(Debug, Clone)]
pub struct PostgresTrackingRecordRepository {
    pool: PgPool,
}

impl PostgresTrackingRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrackingRecordRepository for PostgresTrackingRecordRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(record_id = %record.id()))]
    async fn insert(&self, record: &TrackingRecord) -> Result<(), InfraError> {
        let status: &str = record.status().into();
        sqlx::query(
            r#"
            INSERT INTO tracking_records (
                id, principal_id, recipient_email, recipient_label, status,
                message_id, thread_id,
                sent_at, delivered_at, read_at, response_received_at,
                has_response, response_count, failure_reason,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.principal_id().as_uuid())
        .bind(record.recipient_email())
        .bind(record.recipient_label())
        .bind(status)
        .bind(record.message_id())
        .bind(record.thread_id())
        .bind(record.sent_at())
        .bind(record.delivered_at())
        .bind(record.read_at())
        .bind(record.response_received_at())
        .bind(record.has_response())
        .bind(record.response_count())
        .bind(record.failure_reason())
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(record_id = %record.id()))]
    async fn update(&self, record: &TrackingRecord) -> Result<(), InfraError> {
        let status: &str = record.status().into();
        let result = sqlx::query(
            r#"
            UPDATE tracking_records SET
                recipient_label = $2,
                status = $3,
                message_id = $4,
                thread_id = $5,
                sent_at = $6,
                delivered_at = $7,
                read_at = $8,
                response_received_at = $9,
                has_response = $10,
                response_count = $11,
                failure_reason = $12,
                updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.recipient_label())
        .bind(status)
        .bind(record.message_id())
        .bind(record.thread_id())
        .bind(record.sent_at())
        .bind(record.delivered_at())
        .bind(record.read_at())
        .bind(record.response_received_at())
        .bind(record.has_response())
        .bind(record.response_count())
        .bind(record.failure_reason())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::unexpected(format!(
                "更新対象の追跡レコードが存在しません: {}",
                record.id()
            )));
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id, %id))]
    async fn find_by_id(
        &self,
        principal_id: &PrincipalId,
        id: &TrackingRecordId,
    ) -> Result<Option<TrackingRecord>, InfraError> {
        let sql = format!("{SELECT_COLUMNS} WHERE principal_id = $1 AND id = $2");
        let row: Option<TrackingRecordRow> = sqlx::query_as(&sql)
            .bind(principal_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TrackingRecord::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
        filter: TrackingRecordFilter,
    ) -> Result<Vec<TrackingRecord>, InfraError> {
        let status: Option<&str> = filter.status.map(Into::into);
        let sql = format!(
            "{SELECT_COLUMNS} WHERE principal_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC"
        );
        let rows: Vec<TrackingRecordRow> = sqlx::query_as(&sql)
            .bind(principal_id.as_uuid())
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    async fn find_by_principal_and_recipient(
        &self,
        principal_id: &PrincipalId,
        recipient_email: &str,
    ) -> Result<Option<TrackingRecord>, InfraError> {
        let sql = format!("{SELECT_COLUMNS} WHERE principal_id = $1 AND recipient_email = $2");
        let row: Option<TrackingRecordRow> = sqlx::query_as(&sql)
            .bind(principal_id.as_uuid())
            .bind(recipient_email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TrackingRecord::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    async fn find_trackable_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Vec<TrackingRecord>, InfraError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE principal_id = $1 \
             AND status NOT IN ('responded', 'failed') \
             AND message_id IS NOT NULL \
             ORDER BY created_at ASC"
        );
        let rows: Vec<TrackingRecordRow> = sqlx::query_as(&sql)
            .bind(principal_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    async fn find_recent_without_response(
        &self,
        principal_id: &PrincipalId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrackingRecord>, InfraError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE principal_id = $1 \
             AND sent_at >= $2 \
             AND thread_id IS NOT NULL \
             AND has_response = FALSE \
             AND status <> 'failed' \
             ORDER BY sent_at ASC"
        );
        let rows: Vec<TrackingRecordRow> = sqlx::query_as(&sql)
            .bind(principal_id.as_uuid())
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }
}
