//! # OAuth2 トークンエンドポイントクライアント
//!
//! リフレッシュトークンを使って新しいアクセストークンを取得する。
//! リクエストの組み立てとレスポンスの解釈は `oauth2` クレートに任せる。

use std::time::Duration;

use applytrack_domain::credential::{AuthError, Credential, RefreshedToken};
use async_trait::async_trait;
use oauth2::{
    AuthType,
    AuthUrl,
    ClientId,
    ClientSecret,
    RefreshToken,
    RequestTokenError,
    TokenResponse,
    TokenUrl,
    basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType},
    reqwest::async_http_client,
};

/// リフレッシュでは使われないが、クライアントの構築に必要
const AUTHORIZATION_URL: &str = "https://accounts.google.com/o/oauth2/auth";

/// トークンリフレッシュトレイト
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// `credential` のリフレッシュトークンで新しいトークンを取得する
    ///
    /// 認証情報自体は変更しない。反映と永続化は呼び出し側の責務。
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedToken, AuthError>;
}

/// HTTP 実装
///
/// リクエスト先は認証情報が持つ `token_uri`。
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    timeout: Duration,
}

impl HttpTokenRefresher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(credential: &Credential) -> Result<BasicClient, AuthError> {
        let auth_url = AuthUrl::new(AUTHORIZATION_URL.to_string())
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
        let token_url = TokenUrl::new(credential.token_uri().to_string())
            .map_err(|e| AuthError::RefreshFailed(format!("token_uri が不正です: {e}")))?;

        Ok(BasicClient::new(
            ClientId::new(credential.client_id().to_string()),
            Some(ClientSecret::new(credential.client_secret().to_string())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody))
    }
}

/// トークンエンドポイントのエラーを認証エラーに分類する
///
/// `invalid_grant` はリフレッシュトークンの失効・取り消しで、再認証が必要。
fn classify<E>(err: RequestTokenError<E, BasicErrorResponse>) -> AuthError
where
    E: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response)
            if *response.error() == BasicErrorResponseType::InvalidGrant =>
        {
            let detail = response
                .error_description()
                .cloned()
                .unwrap_or_else(|| "invalid_grant".to_string());
            AuthError::ReauthenticationRequired(detail)
        }
        other => AuthError::RefreshFailed(other.to_string()),
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedToken, AuthError> {
        let client = Self::client(credential)?;
        let refresh_token = RefreshToken::new(credential.refresh_token().to_string());

        let token = tokio::time::timeout(
            self.timeout,
            client
                .exchange_refresh_token(&refresh_token)
                .request_async(async_http_client),
        )
        .await
        .map_err(|_| AuthError::RefreshFailed("トークンエンドポイントがタイムアウトしました".to_string()))?
        .map_err(classify)?;

        Ok(RefreshedToken {
            access_token:  token.access_token().secret().clone(),
            expires_in:    token
                .expires_in()
                .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok()),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use applytrack_domain::credential::{OAuthClientDefaults, TokenState};
    use axum::{Form, Json, Router, http::StatusCode as AxumStatus, routing::post};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    use super::*;

    async fn spawn_token_endpoint() -> String {
        let app = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
                    return (AxumStatus::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type"})));
                }
                match form.get("refresh_token").map(String::as_str) {
                    Some("1//valid") => (
                        AxumStatus::OK,
                        Json(json!({"access_token": "ya29.fresh", "expires_in": 3599, "token_type": "Bearer"})),
                    ),
                    Some("1//rotating") => (
                        AxumStatus::OK,
                        Json(json!({
                            "access_token": "ya29.rotated",
                            "expires_in": 3599,
                            "refresh_token": "1//next",
                            "token_type": "Bearer"
                        })),
                    ),
                    Some("1//wrong-client") => (
                        AxumStatus::UNAUTHORIZED,
                        Json(json!({"error": "invalid_client", "error_description": "The OAuth client was not found."})),
                    ),
                    _ => (
                        AxumStatus::BAD_REQUEST,
                        Json(json!({"error": "invalid_grant", "error_description": "Token has been expired or revoked."})),
                    ),
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    fn credential(token_uri: &str, refresh_token: &str) -> Credential {
        let state: TokenState = serde_json::from_value(json!({
            "token": "ya29.stale",
            "refresh_token": refresh_token,
            "token_uri": token_uri,
            "client_id": "client",
            "client_secret": "secret"
        }))
        .unwrap();
        Credential::from_token_state(state, &OAuthClientDefaults::default()).unwrap()
    }

    #[tokio::test]
    async fn test_リフレッシュ成功で新しいトークンと期限を返す() {
        let uri = spawn_token_endpoint().await;
        let refresher = HttpTokenRefresher::new(Duration::from_secs(5));

        let refreshed = refresher.refresh(&credential(&uri, "1//valid")).await.unwrap();

        assert_eq!(
            refreshed,
            RefreshedToken {
                access_token:  "ya29.fresh".to_string(),
                expires_in:    Some(chrono::Duration::seconds(3599)),
                refresh_token: None,
            }
        );
    }

    #[tokio::test]
    async fn test_ローテーションされたリフレッシュトークンを返す() {
        let uri = spawn_token_endpoint().await;
        let refresher = HttpTokenRefresher::new(Duration::from_secs(5));

        let refreshed = refresher.refresh(&credential(&uri, "1//rotating")).await.unwrap();

        assert_eq!(refreshed.access_token, "ya29.rotated");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("1//next"));
    }

    #[tokio::test]
    async fn test_invalid_grant以外のエラー応答はリフレッシュ失敗() {
        let uri = spawn_token_endpoint().await;
        let refresher = HttpTokenRefresher::new(Duration::from_secs(5));

        let err = refresher
            .refresh(&credential(&uri, "1//wrong-client"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_invalid_grantは再認証が必要なエラー() {
        let uri = spawn_token_endpoint().await;
        let refresher = HttpTokenRefresher::new(Duration::from_secs(5));

        let err = refresher
            .refresh(&credential(&uri, "1//revoked"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::ReauthenticationRequired("Token has been expired or revoked.".to_string())
        );
    }

    #[tokio::test]
    async fn test_接続できない場合はリフレッシュ失敗() {
        let refresher = HttpTokenRefresher::new(Duration::from_secs(2));

        let err = refresher
            .refresh(&credential("http://127.0.0.1:9/token", "1//valid"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }
}
