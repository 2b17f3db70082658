//! # 追跡レコードハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /internal/principals/{principal_id}/tracking-records?status=` - 一覧（新しい順）
//! - `POST /internal/principals/{principal_id}/tracking-records/sync` - 全件更新と返信確認
//! - `POST /internal/principals/{principal_id}/tracking-records/{record_id}/refresh` - 1 件の強制更新

use std::sync::Arc;

use applytrack_domain::{
    principal::PrincipalId,
    tracking::{DeliveryStatus, TrackingRecord, TrackingRecordId},
};
use applytrack_infra::repository::{TrackingRecordFilter, TrackingRecordRepository};
use applytrack_shared::ApiResponse;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    usecase::{RefreshOutcome, StatusTracker, SyncSummary},
};

/// 追跡 API の共有状態
pub struct TrackingState {
    pub tracker: Arc<StatusTracker>,
    pub records: Arc<dyn TrackingRecordRepository>,
}

// --- リクエスト/レスポンス型 ---

/// 一覧の絞り込み条件
#[derive(Debug, Deserialize)]
pub struct TrackingRecordQuery {
    pub status: Option<String>,
}

/// 追跡レコード DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackingRecordDto {
    pub id: Uuid,
    pub recipient_email: String,
    pub recipient_label: String,
    pub status: DeliveryStatus,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub response_received_at: Option<String>,
    pub has_response: bool,
    pub response_count: i32,
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&TrackingRecord> for TrackingRecordDto {
    fn from(record: &TrackingRecord) -> Self {
        Self {
            id: *record.id().as_uuid(),
            recipient_email: record.recipient_email().to_string(),
            recipient_label: record.recipient_label().to_string(),
            status: record.status(),
            message_id: record.message_id().map(str::to_string),
            thread_id: record.thread_id().map(str::to_string),
            sent_at: record.sent_at().map(|t| t.to_rfc3339()),
            delivered_at: record.delivered_at().map(|t| t.to_rfc3339()),
            read_at: record.read_at().map(|t| t.to_rfc3339()),
            response_received_at: record.response_received_at().map(|t| t.to_rfc3339()),
            has_response: record.has_response(),
            response_count: record.response_count(),
            failure_reason: record.failure_reason().map(str::to_string),
            created_at: record.created_at().to_rfc3339(),
            updated_at: record.updated_at().to_rfc3339(),
        }
    }
}

/// 同期結果 DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SyncSummaryDto {
    pub updated:   usize,
    pub responses: usize,
}

impl From<SyncSummary> for SyncSummaryDto {
    fn from(summary: SyncSummary) -> Self {
        Self {
            updated:   summary.updated,
            responses: summary.responses,
        }
    }
}

/// 強制更新結果 DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RefreshOutcomeDto {
    pub old_status: DeliveryStatus,
    pub new_status: DeliveryStatus,
    pub record:     TrackingRecordDto,
}

impl From<RefreshOutcome> for RefreshOutcomeDto {
    fn from(outcome: RefreshOutcome) -> Self {
        Self {
            old_status: outcome.old_status,
            new_status: outcome.new_status,
            record:     TrackingRecordDto::from(&outcome.record),
        }
    }
}

// --- ハンドラ ---

/// GET /internal/principals/{principal_id}/tracking-records
///
/// ## レスポンス
///
/// - `200 OK`: 追跡レコード一覧
/// - `400 Bad Request`: `status` が不正
#[tracing::instrument(skip_all, fields(%principal_id))]
pub async fn list_tracking_records(
    State(state): State<Arc<TrackingState>>,
    Path(principal_id): Path<Uuid>,
    Query(query): Query<TrackingRecordQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DeliveryStatus>)
        .transpose()
        .map_err(|_| {
            ServiceError::BadRequest(format!(
                "不正なステータスです: {}",
                query.status.as_deref().unwrap_or_default()
            ))
        })?;

    let records = state
        .records
        .find_by_principal(
            &PrincipalId::from_uuid(principal_id),
            TrackingRecordFilter { status },
        )
        .await?;

    let items: Vec<TrackingRecordDto> = records.iter().map(TrackingRecordDto::from).collect();
    Ok((StatusCode::OK, Json(ApiResponse::new(items))))
}

/// POST /internal/principals/{principal_id}/tracking-records/sync
///
/// ## レスポンス
///
/// - `200 OK`: 同期結果
/// - `401 Unauthorized`: トークン状態がない、またはリフレッシュできない
#[tracing::instrument(skip_all, fields(%principal_id))]
pub async fn sync_tracking_records(
    State(state): State<Arc<TrackingState>>,
    Path(principal_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let summary = state
        .tracker
        .sync_principal(&PrincipalId::from_uuid(principal_id))
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::new(SyncSummaryDto::from(summary)))))
}

/// POST /internal/principals/{principal_id}/tracking-records/{record_id}/refresh
///
/// ## レスポンス
///
/// - `200 OK`: 更新前後のステータスとレコード
/// - `401 Unauthorized`: トークン状態がない、またはリフレッシュできない
/// - `404 Not Found`: プリンシパルのレコードに該当しない
#[tracing::instrument(skip_all, fields(%principal_id, %record_id))]
pub async fn refresh_tracking_record(
    State(state): State<Arc<TrackingState>>,
    Path((principal_id, record_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .tracker
        .force_refresh(
            &PrincipalId::from_uuid(principal_id),
            &TrackingRecordId::from_uuid(record_id),
        )
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::new(RefreshOutcomeDto::from(outcome)))))
}
