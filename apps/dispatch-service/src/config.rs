//! # Dispatch Service 設定
//!
//! 環境変数から Dispatch Service の設定を読み込む。

use std::{env, str::FromStr, time::Duration};

use applytrack_domain::credential::{DEFAULT_TOKEN_URI, OAuthClientDefaults};
use applytrack_infra::mail::GMAIL_DEFAULT_BASE_URL;
use thiserror::Error;

/// 設定読み込みエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    #[error("{name} の値が不正です: {value}")]
    Invalid { name: &'static str, value: String },
}

/// メール API のバックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    /// Gmail REST v1
    Gmail,
    /// 送信しない（ログ出力のみ）
    Noop,
}

impl FromStr for MailBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "noop" => Ok(Self::Noop),
            _ => Err(()),
        }
    }
}

/// Dispatch Service サーバーの設定
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// データベース接続 URL
    pub database_url: String,
    /// OAuth クライアント既定値（トークン状態の補完元）
    pub oauth: OAuthClientDefaults,
    /// メール API 設定
    pub mail: MailConfig,
    /// 添付ストアのルートディレクトリ
    pub attachment_root: String,
    /// 一括送信の設定
    pub dispatch: DispatchSettings,
    /// 追跡の設定
    pub tracking: TrackingSettings,
}

/// メール API の設定
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub backend:         MailBackend,
    pub base_url:        String,
    pub request_timeout: Duration,
}

/// 一括送信の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// 宛先間の待ち時間
    pub pacing:         Duration,
    /// キューの容量
    pub queue_capacity: usize,
    /// 送信試行回数の上限
    pub max_attempts:   u32,
    /// バックオフの基準時間
    pub base_delay:     Duration,
}

/// 追跡の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSettings {
    /// リモート呼び出し間の待ち時間
    pub pacing:          Duration,
    pub delivered_after: chrono::Duration,
    pub read_after:      chrono::Duration,
    /// 返信確認の対象期間（日数）
    pub recent_window:   chrono::Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            pacing:         Duration::from_millis(2000),
            queue_capacity: 16,
            max_attempts:   3,
            base_delay:     Duration::from_millis(2000),
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            pacing:          Duration::from_millis(200),
            delivered_after: chrono::Duration::minutes(60),
            read_after:      chrono::Duration::minutes(240),
            recent_window:   chrono::Duration::days(7),
        }
    }
}

impl DispatchConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の参照関数から設定を読み込む
    ///
    /// 未設定の値と空文字列は同じ扱い。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let dispatch_defaults = DispatchSettings::default();
        let tracking_defaults = TrackingSettings::default();

        let backend_raw = get("MAIL_BACKEND").unwrap_or_else(|| "gmail".to_string());
        let backend = backend_raw
            .parse::<MailBackend>()
            .map_err(|()| ConfigError::Invalid {
                name:  "MAIL_BACKEND",
                value: backend_raw.clone(),
            })?;

        Ok(Self {
            host: get("DISPATCH_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse("DISPATCH_PORT", &required("DISPATCH_PORT")?)?,
            database_url: required("DATABASE_URL")?,
            oauth: OAuthClientDefaults {
                client_id:     get("GOOGLE_CLIENT_ID"),
                client_secret: get("GOOGLE_CLIENT_SECRET"),
                token_uri:     get("GOOGLE_TOKEN_URI")
                    .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            },
            mail: MailConfig {
                backend,
                base_url: get("GMAIL_API_BASE_URL")
                    .unwrap_or_else(|| GMAIL_DEFAULT_BASE_URL.to_string()),
                request_timeout: Duration::from_secs(parse_or(
                    "MAIL_REQUEST_TIMEOUT_SECS",
                    get("MAIL_REQUEST_TIMEOUT_SECS"),
                    30,
                )?),
            },
            attachment_root: get("ATTACHMENT_ROOT").unwrap_or_else(|| "./uploads".to_string()),
            dispatch: DispatchSettings {
                pacing:         millis_or(
                    "DISPATCH_PACING_MS",
                    get("DISPATCH_PACING_MS"),
                    dispatch_defaults.pacing,
                )?,
                queue_capacity: parse_or(
                    "DISPATCH_QUEUE_CAPACITY",
                    get("DISPATCH_QUEUE_CAPACITY"),
                    dispatch_defaults.queue_capacity,
                )?,
                max_attempts:   parse_or(
                    "SEND_MAX_RETRIES",
                    get("SEND_MAX_RETRIES"),
                    dispatch_defaults.max_attempts,
                )?,
                base_delay:     millis_or(
                    "SEND_BASE_DELAY_MS",
                    get("SEND_BASE_DELAY_MS"),
                    dispatch_defaults.base_delay,
                )?,
            },
            tracking: TrackingSettings {
                pacing:          millis_or(
                    "TRACKING_PACING_MS",
                    get("TRACKING_PACING_MS"),
                    tracking_defaults.pacing,
                )?,
                delivered_after: chrono::Duration::minutes(parse_or(
                    "TRACKING_DELIVERED_AFTER_MINUTES",
                    get("TRACKING_DELIVERED_AFTER_MINUTES"),
                    tracking_defaults.delivered_after.num_minutes(),
                )?),
                read_after:      chrono::Duration::minutes(parse_or(
                    "TRACKING_READ_AFTER_MINUTES",
                    get("TRACKING_READ_AFTER_MINUTES"),
                    tracking_defaults.read_after.num_minutes(),
                )?),
                recent_window:   chrono::Duration::days(parse_or(
                    "TRACKING_RECENT_WINDOW_DAYS",
                    get("TRACKING_RECENT_WINDOW_DAYS"),
                    tracking_defaults.recent_window.num_days(),
                )?),
            },
        })
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |v| parse(name, &v))
}

fn millis_or(
    name: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), |v| parse(name, &v).map(Duration::from_millis))
}
