//! # ディスパッチハンドラ
//!
//! ## エンドポイント
//!
//! - `POST /internal/principals/{principal_id}/dispatches` - 一括送信ジョブの投入
//!
//! 送信そのものはディスパッチワーカーが行う。ハンドラは入力を検証して
//! キューに積み、ジョブ ID を返すだけで送信の完了は待たない。

use std::sync::Arc;

use applytrack_domain::{
    dispatch::Target,
    message::AttachmentRef,
    principal::{EmailAddress, Principal, PrincipalId},
};
use applytrack_shared::ApiResponse;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    usecase::{DispatchQueue, DispatchRequest},
};

/// ディスパッチ API の共有状態
pub struct DispatchState {
    pub queue: DispatchQueue,
}

// --- リクエスト/レスポンス型 ---

/// 送信者プロフィール
#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub email:      String,
    pub full_name:  Option<String>,
    pub phone:      Option<String>,
    pub email_body: Option<String>,
}

/// 一括送信リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateDispatchRequest {
    pub profile:     ProfileRequest,
    pub targets:     Vec<Target>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// 受付結果 DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DispatchAcceptedDto {
    pub job_id: Uuid,
    pub total:  usize,
}

// --- ハンドラ ---

/// POST /internal/principals/{principal_id}/dispatches
///
/// ## レスポンス
///
/// - `202 Accepted`: ジョブを受け付けた
/// - `400 Bad Request`: 送信者アドレスが不正、または宛先が空
/// - `503 Service Unavailable`: キューが満杯、またはワーカーが停止している
#[tracing::instrument(skip_all, fields(%principal_id))]
pub async fn create_dispatch(
    State(state): State<Arc<DispatchState>>,
    Path(principal_id): Path<Uuid>,
    Json(req): Json<CreateDispatchRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    if req.targets.is_empty() {
        return Err(ServiceError::BadRequest("宛先が指定されていません".to_string()));
    }
    let email = EmailAddress::new(req.profile.email)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

    let total = req.targets.len();
    let request = DispatchRequest {
        principal:   Principal {
            id: PrincipalId::from_uuid(principal_id),
            email,
            full_name: req.profile.full_name,
            phone: req.profile.phone,
            email_body: req.profile.email_body,
        },
        targets:     req.targets,
        attachments: req.attachments,
    };

    let receipt = state.queue.enqueue(request)?;

    let dto = DispatchAcceptedDto {
        job_id: *receipt.job_id.as_uuid(),
        total,
    };
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::new(dto))))
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request, routing::post};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{test_utils::ServiceTestSetup, usecase::spawn_dispatch_worker};

    fn create_test_app(queue: DispatchQueue) -> Router {
        Router::new()
            .route(
                "/internal/principals/{principal_id}/dispatches",
                post(create_dispatch),
            )
            .with_state(Arc::new(DispatchState { queue }))
    }

    fn dispatch_request(principal_id: &PrincipalId, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(axum::http::Method::POST)
            .uri(format!("/internal/principals/{principal_id}/dispatches"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    fn valid_body() -> serde_json::Value {
        json!({
            "profile": {
                "email": "thandi@example.com",
                "full_name": "Thandi Mokoena",
                "phone": "+27 82 000 0000",
                "email_body": "I have five years of analytics experience."
            },
            "targets": [
                { "email": "careers@acme.example.com", "label": "Acme", "position": "Data Analyst" },
                { "email": "jobs@globex.example.com", "label": "Globex" }
            ]
        })
    }

    async fn response_body<T: serde::de::DeserializeOwned>(
        response: axum::http::Response<Body>,
    ) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_ジョブを受け付けると202とジョブidが返り送信が実行される() {
        // Given
        let setup = ServiceTestSetup::with_token_state();
        let (queue, handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);
        let sut = create_test_app(queue);

        // When
        let response = sut
            .oneshot(dispatch_request(&setup.principal_id, valid_body()))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: ApiResponse<DispatchAcceptedDto> = response_body(response).await;
        assert_eq!(body.data.total, 2);

        // ルーターが破棄されるとキューが閉じ、ワーカーは残りを処理して終了する
        handle.await.unwrap();
        let records = setup.records.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.principal_id() == &setup.principal_id));
    }

    #[tokio::test]
    async fn test_post_宛先が空のとき400が返る() {
        let setup = ServiceTestSetup::with_token_state();
        let (queue, _handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);
        let sut = create_test_app(queue);
        let mut body = valid_body();
        body["targets"] = json!([]);

        let response = sut
            .oneshot(dispatch_request(&setup.principal_id, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(setup.mail.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_post_送信者アドレスが不正なとき400が返る() {
        let setup = ServiceTestSetup::with_token_state();
        let (queue, _handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);
        let sut = create_test_app(queue);
        let mut body = valid_body();
        body["profile"]["email"] = json!("not-an-address");

        let response = sut
            .oneshot(dispatch_request(&setup.principal_id, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_ワーカーが停止しているとき503が返る() {
        // Given
        let setup = ServiceTestSetup::with_token_state();
        let (queue, handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);
        handle.abort();
        let _ = handle.await;
        let sut = create_test_app(queue);

        // When
        let response = sut
            .oneshot(dispatch_request(&setup.principal_id, valid_body()))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
