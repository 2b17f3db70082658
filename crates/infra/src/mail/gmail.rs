//! Gmail REST v1 実装
//!
//! `messages.send` / `messages.get` / `threads.get` をベアラートークンで呼び出す。
//! 取得系は `format=metadata` でヘッダとラベルのみを取得する。

use std::time::Duration;

use applytrack_domain::{
    credential::Credential,
    mail_api::{MailApiError, RemoteMessage, RemoteMessageRef, RemoteThread},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{MailApi, RawMessage};
use crate::error::InfraError;

/// Gmail API のベース URL の既定値
pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";

/// Gmail REST v1 クライアント
#[derive(Debug, Clone)]
pub struct GmailApi {
    client:   reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id:        String,
    thread_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    id:            String,
    thread_id:     String,
    #[serde(default)]
    label_ids:     Vec<String>,
    /// エポックからのミリ秒（文字列）
    internal_date: Option<String>,
}

#[derive(Deserialize)]
struct ThreadResponse {
    id:       String,
    #[serde(default)]
    messages: Vec<MessageResponse>,
}

impl From<MessageResponse> for RemoteMessage {
    fn from(response: MessageResponse) -> Self {
        Self {
            id:            response.id,
            thread_id:     response.thread_id,
            label_ids:     response.label_ids,
            internal_date: response.internal_date.as_deref().and_then(parse_internal_date),
        }
    }
}

fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

impl GmailApi {
    /// 新しいクライアントを作成する
    ///
    /// `timeout` はリクエストごとのタイムアウト。
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InfraError::unexpected(format!("HTTP クライアントを作成できません: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{path}", self.base_url)
    }
}

/// HTTP ステータスを分類する
fn classify_status(status: StatusCode, body: &str) -> MailApiError {
    let message = format!("HTTP {status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => MailApiError::rate_limited(message),
        StatusCode::UNAUTHORIZED => MailApiError::unauthorized(message),
        StatusCode::FORBIDDEN => MailApiError::forbidden(message),
        StatusCode::NOT_FOUND => MailApiError::not_found(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => MailApiError::timeout(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => MailApiError::network(message),
        _ => MailApiError::other(message),
    }
}

/// 送信前後の reqwest エラーを分類する
fn classify_transport(error: &reqwest::Error) -> MailApiError {
    if error.is_timeout() {
        MailApiError::timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        MailApiError::network(error.to_string())
    } else {
        MailApiError::other(error.to_string())
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, MailApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| MailApiError::other(format!("レスポンスを解釈できません: {e}")))
}

#[async_trait]
impl MailApi for GmailApi {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn send_message(
        &self,
        credential: &Credential,
        raw: &RawMessage,
    ) -> Result<RemoteMessageRef, MailApiError> {
        let response = self
            .client
            .post(self.url("messages/send"))
            .bearer_auth(credential.access_token())
            .json(&SendRequest { raw: raw.as_str() })
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let sent: SendResponse = read_json(response).await?;
        Ok(RemoteMessageRef {
            message_id: sent.id,
            thread_id:  sent.thread_id,
        })
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%message_id))]
    async fn get_message(
        &self,
        credential: &Credential,
        message_id: &str,
    ) -> Result<RemoteMessage, MailApiError> {
        let response = self
            .client
            .get(self.url(&format!("messages/{message_id}")))
            .bearer_auth(credential.access_token())
            .query(&[("format", "metadata")])
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let message: MessageResponse = read_json(response).await?;
        Ok(message.into())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%thread_id))]
    async fn get_thread(
        &self,
        credential: &Credential,
        thread_id: &str,
    ) -> Result<RemoteThread, MailApiError> {
        let response = self
            .client
            .get(self.url(&format!("threads/{thread_id}")))
            .bearer_auth(credential.access_token())
            .query(&[("format", "metadata")])
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let thread: ThreadResponse = read_json(response).await?;
        Ok(RemoteThread {
            id:       thread.id,
            messages: thread.messages.into_iter().map(Into::into).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use applytrack_domain::{
        credential::{OAuthClientDefaults, TokenState},
        mail_api::MailApiErrorKind,
    };
    use axum::{
        Json,
        Router,
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, post},
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;

    fn credential() -> Credential {
        let state: TokenState = serde_json::from_value(json!({
            "token": "ya29.test",
            "refresh_token": "1//refresh",
            "client_id": "client",
            "client_secret": "secret"
        }))
        .unwrap();
        Credential::from_token_state(state, &OAuthClientDefaults::default()).unwrap()
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer ya29.test")
    }

    /// Gmail API を模したローカルサーバーを起動してベース URL を返す
    async fn spawn_server() -> String {
        let app = Router::new()
            .route(
                "/gmail/v1/users/me/messages/send",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if !authorized(&headers) {
                        return (AxumStatus::UNAUTHORIZED, Json(json!({})));
                    }
                    if body["raw"] == "rate-limit" {
                        return (AxumStatus::TOO_MANY_REQUESTS, Json(json!({})));
                    }
                    (
                        AxumStatus::OK,
                        Json(json!({"id": "m-1", "threadId": "t-1", "labelIds": ["SENT"]})),
                    )
                }),
            )
            .route(
                "/gmail/v1/users/me/messages/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "gone" {
                        return (AxumStatus::NOT_FOUND, Json(json!({})));
                    }
                    (
                        AxumStatus::OK,
                        Json(json!({
                            "id": id,
                            "threadId": "t-1",
                            "labelIds": ["SENT"],
                            "internalDate": "1700000000000"
                        })),
                    )
                }),
            )
            .route(
                "/gmail/v1/users/me/threads/{id}",
                get(|Path(id): Path<String>| async move {
                    Json(json!({
                        "id": id,
                        "messages": [
                            {"id": "m-1", "threadId": "t-1", "labelIds": ["SENT"], "internalDate": "1700000000000"},
                            {"id": "m-2", "threadId": "t-1", "labelIds": ["INBOX"], "internalDate": "1700003600000"}
                        ]
                    }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn raw(value: &str) -> RawMessage {
        RawMessage::from_encoded(value)
    }

    #[tokio::test]
    async fn test_送信成功でメッセージidとスレッドidを返す() {
        let api = GmailApi::new(spawn_server().await, Duration::from_secs(5)).unwrap();

        let sent = api.send_message(&credential(), &raw("abc")).await.unwrap();

        assert_eq!(
            sent,
            RemoteMessageRef {
                message_id: "m-1".to_string(),
                thread_id:  "t-1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_429はレート制限に分類される() {
        let api = GmailApi::new(spawn_server().await, Duration::from_secs(5)).unwrap();

        let err = api
            .send_message(&credential(), &raw("rate-limit"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, MailApiErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_メッセージのメタデータを取得して受付時刻を解釈する() {
        let api = GmailApi::new(spawn_server().await, Duration::from_secs(5)).unwrap();

        let message = api.get_message(&credential(), "m-1").await.unwrap();

        assert!(message.is_sent());
        assert_eq!(message.internal_date, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[tokio::test]
    async fn test_存在しないメッセージはnot_foundに分類される() {
        let api = GmailApi::new(spawn_server().await, Duration::from_secs(5)).unwrap();

        let err = api.get_message(&credential(), "gone").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_スレッドのメッセージをすべて取得する() {
        let api = GmailApi::new(spawn_server().await, Duration::from_secs(5)).unwrap();

        let thread = api.get_thread(&credential(), "t-1").await.unwrap();

        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.reply_count(), 1);
        assert_eq!(
            thread.latest_message_at(),
            DateTime::from_timestamp(1_700_003_600, 0)
        );
    }

    #[tokio::test]
    async fn test_接続できない場合はネットワークエラーに分類される() {
        let api = GmailApi::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();

        let err = api.send_message(&credential(), &raw("abc")).await.unwrap_err();

        assert!(err.kind.is_retryable());
    }

    #[rstest]
    #[case(StatusCode::TOO_MANY_REQUESTS, MailApiErrorKind::RateLimited)]
    #[case(StatusCode::UNAUTHORIZED, MailApiErrorKind::Unauthorized)]
    #[case(StatusCode::FORBIDDEN, MailApiErrorKind::Forbidden)]
    #[case(StatusCode::NOT_FOUND, MailApiErrorKind::NotFound)]
    #[case(StatusCode::GATEWAY_TIMEOUT, MailApiErrorKind::Timeout)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, MailApiErrorKind::Network)]
    #[case(StatusCode::BAD_REQUEST, MailApiErrorKind::Other)]
    fn test_httpステータスの分類(#[case] status: StatusCode, #[case] expected: MailApiErrorKind) {
        assert_eq!(classify_status(status, "").kind, expected);
    }
}
