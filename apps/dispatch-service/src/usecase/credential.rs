//! # 認証情報サービス
//!
//! 永続化トークン状態から認証情報を組み立て、期限切れならリフレッシュして
//! 書き戻す。
//!
//! リフレッシュはプリンシパルごとに直列化する。ロック取得後に保存済みの状態を
//! 読み直し、別タスクが既にリフレッシュしていればその新しいトークンを採用する。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use applytrack_domain::{
    clock::Clock,
    credential::{AuthError, Credential, OAuthClientDefaults},
    principal::PrincipalId,
};
use applytrack_infra::{InfraError, TokenRefresher, repository::TokenStateRepository};
use applytrack_shared::{event_log::event, log_business_event};
use thiserror::Error;

/// 認証情報サービスのエラー
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("トークン状態の読み書きに失敗しました: {0}")]
    Storage(#[from] InfraError),
}

impl CredentialError {
    /// 送信・ポーリングの結果として扱う認証エラーに変換する
    pub fn into_auth_error(self) -> AuthError {
        match self {
            Self::Auth(e) => e,
            Self::Storage(e) => AuthError::RefreshFailed(e.to_string()),
        }
    }
}

/// 認証情報サービス
pub struct CredentialService {
    token_repo: Arc<dyn TokenStateRepository>,
    refresher:  Arc<dyn TokenRefresher>,
    defaults:   OAuthClientDefaults,
    clock:      Arc<dyn Clock>,
    locks:      Mutex<HashMap<PrincipalId, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialService {
    pub fn new(
        token_repo: Arc<dyn TokenStateRepository>,
        refresher: Arc<dyn TokenRefresher>,
        defaults: OAuthClientDefaults,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token_repo,
            refresher,
            defaults,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 保存済みのトークン状態から認証情報を組み立てる
    ///
    /// # Errors
    ///
    /// - `AuthError::NoTokenState`: トークン状態が保存されていない
    /// - `AuthError::MissingFields`: 補完後も必須フィールドが欠けている
    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    pub async fn build_credentials(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Credential, CredentialError> {
        let state = self
            .token_repo
            .find_by_principal(principal_id)
            .await?
            .ok_or(AuthError::NoTokenState)?;

        Credential::from_token_state(state, &self.defaults).map_err(|e| {
            if let AuthError::MissingFields {
                fields,
                requires_consent,
            } = &e
            {
                tracing::warn!(
                    %principal_id,
                    missing = ?fields,
                    requires_consent,
                    "認証情報に必須フィールドが不足しています"
                );
            }
            CredentialError::Auth(e)
        })
    }

    /// 期限切れならリフレッシュする
    ///
    /// 期限内なら何もせず `false` を返す。リフレッシュした（または別タスクが
    /// リフレッシュした新しいトークンを採用した）場合は `credential` を
    /// その場で更新して `true` を返す。
    ///
    /// # Errors
    ///
    /// - `AuthError::ReauthenticationRequired`: 期限切れでリフレッシュトークンがない
    /// - `AuthError::RefreshFailed` など: トークンエンドポイントでの失敗
    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    pub async fn refresh_if_needed(
        &self,
        principal_id: &PrincipalId,
        credential: &mut Credential,
    ) -> Result<bool, CredentialError> {
        if !credential.is_expired(self.clock.now()) {
            return Ok(false);
        }
        if !credential.can_refresh() {
            return Err(AuthError::ReauthenticationRequired(
                "アクセストークンが期限切れで、リフレッシュトークンがありません".to_string(),
            )
            .into());
        }

        let lock = self.lock_for(principal_id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(principal_id, credential).await
        };
        drop(lock);
        self.release_lock(principal_id);
        result
    }

    /// プリンシパルのロックを保持した状態でのリフレッシュ
    async fn refresh_locked(
        &self,
        principal_id: &PrincipalId,
        credential: &mut Credential,
    ) -> Result<bool, CredentialError> {
        // 待っている間に別タスクがリフレッシュ済みなら、その結果を使う
        let stored = self
            .token_repo
            .find_by_principal(principal_id)
            .await?
            .and_then(|state| Credential::from_token_state(state, &self.defaults).ok())
            .filter(|stored| !stored.is_expired(self.clock.now()));
        if let Some(stored) = stored {
            tracing::debug!("リフレッシュ済みのトークンを採用します");
            *credential = stored;
            return Ok(true);
        }

        let refreshed = match self.refresher.refresh(credential).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                log_business_event!(
                    event.category = event::category::CREDENTIAL,
                    event.action = event::action::CREDENTIAL_REFRESHED,
                    event.principal_id = %principal_id,
                    event.entity_type = event::entity_type::TOKEN_STATE,
                    event.result = event::result::FAILURE,
                    error = %e,
                    "トークンのリフレッシュに失敗"
                );
                return Err(e.into());
            }
        };

        credential.apply_refresh(refreshed, self.clock.now());
        self.token_repo
            .save(principal_id, &credential.to_token_state())
            .await?;

        log_business_event!(
            event.category = event::category::CREDENTIAL,
            event.action = event::action::CREDENTIAL_REFRESHED,
            event.principal_id = %principal_id,
            event.entity_type = event::entity_type::TOKEN_STATE,
            event.result = event::result::SUCCESS,
            "トークンをリフレッシュしました"
        );

        Ok(true)
    }

    fn lock_for(&self, principal_id: &PrincipalId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(principal_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// 他に待っているタスクがなければロックを破棄する
    fn release_lock(&self, principal_id: &PrincipalId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(principal_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(principal_id);
        }
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use applytrack_domain::{
        clock::FixedClock,
        credential::{RefreshedToken, TokenState},
    };
    use applytrack_infra::mock::{MockTokenRefresher, MockTokenStateRepository};
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn token_state(expiry: DateTime<Utc>) -> TokenState {
        serde_json::from_value(json!({
            "access_token": "ya29.stale",
            "refresh_token": "1//refresh",
            "token_uri": "https://oauth2.example.com/token",
            "client_id": "client",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/gmail.send"],
            "expiry": expiry,
            "installed_by": "legacy-client"
        }))
        .unwrap()
    }

    struct Fixture {
        principal_id: PrincipalId,
        repo:         MockTokenStateRepository,
        refresher:    MockTokenRefresher,
        service:      CredentialService,
    }

    #[fixture]
    fn setup() -> Fixture {
        let repo = MockTokenStateRepository::new();
        let refresher = MockTokenRefresher::new();
        let service = CredentialService::new(
            Arc::new(repo.clone()),
            Arc::new(refresher.clone()),
            OAuthClientDefaults::default(),
            Arc::new(FixedClock::new(now())),
        );
        Fixture {
            principal_id: PrincipalId::new(),
            repo,
            refresher,
            service,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_トークン状態がなければ認証エラー(setup: Fixture) {
        let result = setup.service.build_credentials(&setup.principal_id).await;

        assert!(matches!(
            result,
            Err(CredentialError::Auth(AuthError::NoTokenState))
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn test_リフレッシュトークン欠落は再同意が必要な認証エラー(setup: Fixture) {
        let mut state = token_state(now() + Duration::hours(1));
        state.refresh_token = None;
        setup.repo.add_state(setup.principal_id.clone(), state);

        let err = setup
            .service
            .build_credentials(&setup.principal_id)
            .await
            .unwrap_err();

        let CredentialError::Auth(auth) = err else {
            panic!("認証エラーではありません");
        };
        assert!(auth.requires_reauthentication());
        assert_eq!(
            auth,
            AuthError::MissingFields {
                fields:           vec!["refresh_token"],
                requires_consent: true,
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_期限内ならリフレッシュしない(setup: Fixture) {
        setup
            .repo
            .add_state(setup.principal_id.clone(), token_state(now() + Duration::hours(1)));
        let mut credential = setup
            .service
            .build_credentials(&setup.principal_id)
            .await
            .unwrap();
        let before = credential.clone();

        let refreshed = setup
            .service
            .refresh_if_needed(&setup.principal_id, &mut credential)
            .await
            .unwrap();

        assert!(!refreshed);
        assert_eq!(credential, before);
        assert_eq!(setup.refresher.calls(), 0);
        assert_eq!(setup.repo.save_count(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_期限切れならリフレッシュして両方の名前で書き戻す(setup: Fixture) {
        setup
            .repo
            .add_state(setup.principal_id.clone(), token_state(now() - Duration::minutes(5)));
        setup.refresher.push(Ok(RefreshedToken {
            access_token:  "ya29.fresh".to_string(),
            expires_in:    Some(Duration::hours(1)),
            refresh_token: None,
        }));
        let mut credential = setup
            .service
            .build_credentials(&setup.principal_id)
            .await
            .unwrap();

        let refreshed = setup
            .service
            .refresh_if_needed(&setup.principal_id, &mut credential)
            .await
            .unwrap();

        assert!(refreshed);
        assert_eq!(credential.access_token(), "ya29.fresh");
        assert_eq!(setup.refresher.calls(), 1);

        let saved = setup.repo.state(&setup.principal_id).unwrap();
        assert_eq!(saved.token.as_deref(), Some("ya29.fresh"));
        assert_eq!(saved.access_token.as_deref(), Some("ya29.fresh"));
        assert_eq!(saved.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(saved.last_refreshed, Some(now()));
        assert_eq!(saved.extra.get("installed_by"), Some(&json!("legacy-client")));
    }

    #[rstest]
    #[tokio::test]
    async fn test_別タスクがリフレッシュ済みならその結果を採用する(setup: Fixture) {
        setup
            .repo
            .add_state(setup.principal_id.clone(), token_state(now() - Duration::minutes(5)));
        let mut credential = setup
            .service
            .build_credentials(&setup.principal_id)
            .await
            .unwrap();

        // 組み立て後に別タスクが新しいトークンを保存した
        let mut fresh = token_state(now() + Duration::hours(1));
        fresh.access_token = Some("ya29.other-task".to_string());
        setup.repo.add_state(setup.principal_id.clone(), fresh);

        let refreshed = setup
            .service
            .refresh_if_needed(&setup.principal_id, &mut credential)
            .await
            .unwrap();

        assert!(refreshed);
        assert_eq!(credential.access_token(), "ya29.other-task");
        assert_eq!(setup.refresher.calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_リフレッシュ失敗は認証エラーで状態を書き換えない(setup: Fixture) {
        setup
            .repo
            .add_state(setup.principal_id.clone(), token_state(now() - Duration::minutes(5)));
        setup
            .refresher
            .push(Err(AuthError::ReauthenticationRequired("invalid_grant".to_string())));
        let mut credential = setup
            .service
            .build_credentials(&setup.principal_id)
            .await
            .unwrap();

        let result = setup
            .service
            .refresh_if_needed(&setup.principal_id, &mut credential)
            .await;

        assert!(matches!(
            result,
            Err(CredentialError::Auth(AuthError::ReauthenticationRequired(_)))
        ));
        assert_eq!(setup.repo.save_count(), 0);
        assert_eq!(setup.service.held_locks(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_並行したリフレッシュは一度だけ実行される(setup: Fixture) {
        setup
            .repo
            .add_state(setup.principal_id.clone(), token_state(now() - Duration::minutes(5)));
        setup.refresher.push(Ok(RefreshedToken {
            access_token:  "ya29.fresh".to_string(),
            expires_in:    Some(Duration::hours(1)),
            refresh_token: None,
        }));
        let service = Arc::new(setup.service);
        let mut first = service.build_credentials(&setup.principal_id).await.unwrap();
        let mut second = first.clone();

        let (a, b) = tokio::join!(
            service.refresh_if_needed(&setup.principal_id, &mut first),
            service.refresh_if_needed(&setup.principal_id, &mut second),
        );

        assert!(a.unwrap());
        assert!(b.unwrap());
        assert_eq!(setup.refresher.calls(), 1);
        assert_eq!(first.access_token(), "ya29.fresh");
        assert_eq!(second.access_token(), "ya29.fresh");
        assert_eq!(service.held_locks(), 0);
    }
}
