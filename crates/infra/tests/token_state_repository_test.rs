//! TokenStateRepository 統合テスト
//!
//! データベースを使用したテスト。sqlx::test マクロを使用して、
//! テストごとに専用のデータベースを作成しマイグレーションを適用する。
//!
//! 実行方法:
//! ```bash
//! DATABASE_URL=postgres://localhost/applytrack cargo test -p applytrack-infra --test token_state_repository_test
//! ```

use applytrack_domain::{credential::TokenState, principal::PrincipalId};
use applytrack_infra::repository::{PostgresTokenStateRepository, TokenStateRepository};
use pretty_assertions::assert_eq;
use serde_json::json;
use sqlx::PgPool;

fn token_state(access_token: &str) -> TokenState {
    serde_json::from_value(json!({
        "token": access_token,
        "access_token": access_token,
        "refresh_token": "1//refresh",
        "token_uri": "https://oauth2.googleapis.com/token",
        "client_id": "client-123",
        "client_secret": "secret-xyz",
        "scopes": [
            "https://www.googleapis.com/auth/gmail.send",
            "https://www.googleapis.com/auth/gmail.readonly"
        ],
        "expiry": "2026-03-01T10:00:00Z",
        "installed_by": "legacy-client",
        "universe_domain": "googleapis.com"
    }))
    .expect("トークン状態の組み立てに失敗")
}

async fn count_rows(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM oauth_token_states")
        .fetch_one(pool)
        .await
        .expect("件数の取得に失敗")
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_未保存のプリンシパルはnoneを返す(pool: PgPool) {
    let sut = PostgresTokenStateRepository::new(pool);

    let result = sut.find_by_principal(&PrincipalId::new()).await;

    assert!(result.is_ok());
    assert_eq!(result.unwrap(), None);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_保存したトークン状態を未知のフィールドごと読み戻せる(pool: PgPool) {
    let sut = PostgresTokenStateRepository::new(pool);
    let principal_id = PrincipalId::new();
    let state = token_state("ya29.current");

    sut.save(&principal_id, &state).await.unwrap();
    let loaded = sut.find_by_principal(&principal_id).await.unwrap().unwrap();

    assert_eq!(loaded, state);
    assert_eq!(loaded.extra.get("installed_by"), Some(&json!("legacy-client")));
    assert_eq!(loaded.extra.get("universe_domain"), Some(&json!("googleapis.com")));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_二回目の保存は既存の状態を置き換える(pool: PgPool) {
    let sut = PostgresTokenStateRepository::new(pool.clone());
    let principal_id = PrincipalId::new();
    sut.save(&principal_id, &token_state("ya29.stale")).await.unwrap();

    let mut refreshed = token_state("ya29.fresh");
    refreshed.extra.remove("universe_domain");
    sut.save(&principal_id, &refreshed).await.unwrap();

    let loaded = sut.find_by_principal(&principal_id).await.unwrap().unwrap();
    assert_eq!(loaded, refreshed);
    assert_eq!(loaded.extra.get("universe_domain"), None);
    assert_eq!(count_rows(&pool).await, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_トークン状態はプリンシパルごとに分離される(pool: PgPool) {
    let sut = PostgresTokenStateRepository::new(pool.clone());
    let alice = PrincipalId::new();
    let bob = PrincipalId::new();

    sut.save(&alice, &token_state("ya29.alice")).await.unwrap();
    sut.save(&bob, &token_state("ya29.bob")).await.unwrap();

    let loaded = sut.find_by_principal(&alice).await.unwrap().unwrap();
    assert_eq!(loaded.access_token.as_deref(), Some("ya29.alice"));
    assert_eq!(count_rows(&pool).await, 2);
}
