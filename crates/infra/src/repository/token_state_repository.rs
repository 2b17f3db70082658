//! # TokenStateRepository
//!
//! プリンシパルごとの OAuth2 トークン状態（JSON ブロブ）を永続化する。
//!
//! 保存形式は `oauth_token_states.token_state`（JSONB）。
//! 書き込みは常に全体の置き換え（upsert）で、未知のフィールドも
//! [`TokenState::extra`] を通じてそのまま保存される。

use applytrack_domain::{credential::TokenState, principal::PrincipalId};
use async_trait::async_trait;
use sqlx::{PgPool, types::Json};

use crate::error::InfraError;

/// トークン状態リポジトリトレイト
#[async_trait]
pub trait TokenStateRepository: Send + Sync {
    /// プリンシパルのトークン状態を取得する
    ///
    /// 未保存の場合は `Ok(None)`。
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<TokenState>, InfraError>;

    /// トークン状態を保存する（存在すれば置き換える）
    async fn save(&self, principal_id: &PrincipalId, state: &TokenState)
    -> Result<(), InfraError>;
}

/// PostgreSQL 実装の TokenStateRepository
#[derive(Debug, Clone)]
pub struct PostgresTokenStateRepository {
    pool: PgPool,
}

impl PostgresTokenStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStateRepository for PostgresTokenStateRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<TokenState>, InfraError> {
        let row: Option<(Json<TokenState>,)> = sqlx::query_as(
            r#"
            SELECT token_state
            FROM oauth_token_states
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(state),)| state))
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%principal_id))]
    async fn save(
        &self,
        principal_id: &PrincipalId,
        state: &TokenState,
    ) -> Result<(), InfraError> {
        let value = serde_json::to_value(state)?;
        sqlx::query(
            r#"
            INSERT INTO oauth_token_states (principal_id, token_state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (principal_id)
            DO UPDATE SET token_state = EXCLUDED.token_state, updated_at = NOW()
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(Json(value))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresTokenStateRepository>();
    }
}
