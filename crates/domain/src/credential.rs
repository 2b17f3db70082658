//! # 委任認証情報
//!
//! プリンシパルから委任された OAuth2 認証情報のドメインモデル。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 説明 |
//! |---|------------|------|
//! | [`TokenState`] | 永続化トークン状態 | プリンシパルごとに保存される JSON ブロブ |
//! | [`Credential`] | 認証情報 | 送信・ポーリングの直前に組み立てる正規化済みの形 |
//! | [`OAuthClientDefaults`] | OAuth クライアント既定値 | プロセス全体の設定から補完する値 |
//!
//! ## 正規化
//!
//! 保存済みの状態はベアラートークンを `token` / `access_token` のどちらで
//! 持っていてもよい。[`Credential::from_token_state`] で両方を認識し、
//! [`Credential::to_token_state`] で書き戻すときは常に両方の名前で保存する。
//! 未知のフィールドは [`TokenState::extra`] に保持され、書き戻しで失われない。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// トークンエンドポイントの既定値
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// 有効期限判定の余裕
///
/// 期限直前のトークンで送信を始めないよう、この幅だけ早めに期限切れとみなす。
const EXPIRY_SKEW: Duration = Duration::seconds(60);

/// 認証エラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// トークン状態が保存されていない
    #[error("トークン状態が保存されていません")]
    NoTokenState,

    /// 補完後も必須フィールドが欠けている
    ///
    /// `refresh_token` が欠けている場合はプリンシパルによる再同意が必要
    /// （`requires_consent = true`）。
    #[error("認証情報に必須フィールドが不足しています: {}", fields.join(", "))]
    MissingFields {
        fields:           Vec<&'static str>,
        requires_consent: bool,
    },

    /// プリンシパルの再認証が必要
    #[error("再認証が必要です: {0}")]
    ReauthenticationRequired(String),

    /// トークンエンドポイントでのリフレッシュに失敗
    #[error("トークンのリフレッシュに失敗しました: {0}")]
    RefreshFailed(String),
}

impl AuthError {
    /// プリンシパル本人の操作（再ログイン・再同意）が必要か
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            Self::NoTokenState | Self::ReauthenticationRequired(_) => true,
            Self::MissingFields {
                requires_consent, ..
            } => *requires_consent,
            Self::RefreshFailed(_) => false,
        }
    }
}

/// 永続化されるトークン状態
///
/// 保存形式はプリンシパルごとの JSON ブロブ。
/// 外部ライブラリが書き込んだ状態も読めるよう、全フィールドを任意とする。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token:          Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token:   Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret:  Option<String>,
    #[serde(default)]
    pub scopes:         Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry:         Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<DateTime<Utc>>,
    /// 未知のフィールド（書き戻し時にそのまま保存する）
    #[serde(flatten)]
    pub extra:          Map<String, Value>,
}

impl TokenState {
    /// ベアラートークン（`token` 優先、なければ `access_token`）
    pub fn bearer_token(&self) -> Option<&str> {
        non_empty(self.token.as_deref()).or_else(|| non_empty(self.access_token.as_deref()))
    }
}

/// プロセス全体の OAuth クライアント設定
///
/// トークン状態に欠けている値の補完元。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientDefaults {
    pub client_id:     Option<String>,
    pub client_secret: Option<String>,
    pub token_uri:     String,
}

impl Default for OAuthClientDefaults {
    fn default() -> Self {
        Self {
            client_id:     None,
            client_secret: None,
            token_uri:     DEFAULT_TOKEN_URI.to_string(),
        }
    }
}

/// 正規化済みの認証情報
///
/// 不変条件: 有効期限内であるか、リフレッシュトークンを持つ。
/// 送信・ポーリングの直前にトークン状態から組み立て、リフレッシュ時はその場で更新する。
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    access_token:   String,
    refresh_token:  String,
    token_uri:      String,
    client_id:      String,
    client_secret:  String,
    scopes:         Vec<String>,
    expiry:         Option<DateTime<Utc>>,
    last_refreshed: Option<DateTime<Utc>>,
    extra:          Map<String, Value>,
}

/// トークンエンドポイントから得た新しいトークン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token:  String,
    /// トークンエンドポイントが返した残り有効期間
    pub expires_in:    Option<Duration>,
    /// ローテーションされた場合のみ設定される
    pub refresh_token: Option<String>,
}

impl Credential {
    /// 永続化トークン状態から認証情報を組み立てる
    ///
    /// client_id / client_secret / token_uri が欠けていれば `defaults` から補完する。
    /// 補完後も token / refresh_token / token_uri / client_id / client_secret の
    /// いずれかが欠けていれば、欠けたフィールドを列挙した `AuthError` を返す。
    pub fn from_token_state(
        state: TokenState,
        defaults: &OAuthClientDefaults,
    ) -> Result<Self, AuthError> {
        let access_token = state.bearer_token().map(str::to_string);
        let refresh_token = non_empty(state.refresh_token.as_deref()).map(str::to_string);
        let token_uri = non_empty(state.token_uri.as_deref())
            .or_else(|| non_empty(Some(defaults.token_uri.as_str())))
            .map(str::to_string);
        let client_id = non_empty(state.client_id.as_deref())
            .or_else(|| non_empty(defaults.client_id.as_deref()))
            .map(str::to_string);
        let client_secret = non_empty(state.client_secret.as_deref())
            .or_else(|| non_empty(defaults.client_secret.as_deref()))
            .map(str::to_string);

        let (
            Some(access_token),
            Some(refresh_token),
            Some(token_uri),
            Some(client_id),
            Some(client_secret),
        ) = (
            access_token.clone(),
            refresh_token.clone(),
            token_uri.clone(),
            client_id.clone(),
            client_secret.clone(),
        )
        else {
            let fields: Vec<&'static str> = [
                ("token", access_token.is_none()),
                ("refresh_token", refresh_token.is_none()),
                ("token_uri", token_uri.is_none()),
                ("client_id", client_id.is_none()),
                ("client_secret", client_secret.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect();
            let requires_consent = refresh_token.is_none();
            return Err(AuthError::MissingFields {
                fields,
                requires_consent,
            });
        };

        Ok(Self {
            access_token,
            refresh_token,
            token_uri,
            client_id,
            client_secret,
            scopes: state.scopes,
            expiry: state.expiry,
            last_refreshed: state.last_refreshed,
            extra: state.extra,
        })
    }

    /// 永続化用のトークン状態に変換する
    ///
    /// ベアラートークンは `token` と `access_token` の両方に書き込む。
    pub fn to_token_state(&self) -> TokenState {
        TokenState {
            token:          Some(self.access_token.clone()),
            access_token:   Some(self.access_token.clone()),
            refresh_token:  Some(self.refresh_token.clone()),
            token_uri:      Some(self.token_uri.clone()),
            client_id:      Some(self.client_id.clone()),
            client_secret:  Some(self.client_secret.clone()),
            scopes:         self.scopes.clone(),
            expiry:         self.expiry,
            last_refreshed: self.last_refreshed,
            extra:          self.extra.clone(),
        }
    }

    /// `now` の時点で期限切れか
    ///
    /// 有効期限が記録されていない場合は期限切れとみなさない。
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now + EXPIRY_SKEW)
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// リフレッシュ結果をその場で反映する
    ///
    /// 有効期限は `now` を起点に `expires_in` から求める。
    pub fn apply_refresh(&mut self, refreshed: RefreshedToken, now: DateTime<Utc>) {
        self.access_token = refreshed.access_token;
        self.expiry = refreshed.expires_in.map(|lifetime| now + lifetime);
        if let Some(rotated) = refreshed.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = rotated;
        }
        self.last_refreshed = Some(now);
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
