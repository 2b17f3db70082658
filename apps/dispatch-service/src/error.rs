//! # Dispatch Service エラー定義
//!
//! Dispatch Service 固有のエラーと、HTTP レスポンスへの変換を定義する。

use applytrack_infra::InfraError;
use applytrack_shared::{ErrorResponse, event_log::error};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::usecase::{CredentialError, EnqueueError, TrackerError};

/// Dispatch Service で発生するエラー
#[derive(Debug, Error)]
pub enum ServiceError {
    /// リソースが見つからない
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),

    /// プリンシパルの再認証が必要
    #[error("認証情報を使用できません: {0}")]
    Unauthorized(String),

    /// 一時的に受け付けられない（キュー満杯など）
    #[error("サービスを利用できません: {0}")]
    Unavailable(String),

    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(#[from] InfraError),

    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl From<CredentialError> for ServiceError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Auth(auth) => Self::Unauthorized(auth.to_string()),
            CredentialError::Storage(infra) => Self::Database(infra),
        }
    }
}

impl From<TrackerError> for ServiceError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::Credential(e) => e.into(),
            TrackerError::Repository(e) => Self::Database(e),
            TrackerError::NotFound(id) => Self::NotFound(format!("追跡レコード {id}")),
            TrackerError::MailApi(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<EnqueueError> for ServiceError {
    fn from(e: EnqueueError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = match &self {
            ServiceError::NotFound(msg) => ErrorResponse::not_found(msg.clone()),
            ServiceError::BadRequest(msg) => ErrorResponse::bad_request(msg.clone()),
            ServiceError::Unauthorized(msg) => ErrorResponse::unauthorized(msg.clone()),
            ServiceError::Unavailable(msg) => ErrorResponse::service_unavailable(msg.clone()),
            ServiceError::Database(e) => {
                tracing::error!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::DATABASE,
                    "データベースエラー: {}",
                    e
                );
                ErrorResponse::internal_error()
            }
            ServiceError::Internal(msg) => {
                tracing::error!(
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::INTERNAL,
                    "内部エラー: {}",
                    msg
                );
                ErrorResponse::internal_error()
            }
        };

        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
