//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! ログフィールドの命名規約とヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`error.kind`）を使用。JSON 出力ではフラットなキーになる。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: [`event::category`] の定数
/// - `event.action`: [`event::action`] の定数
/// - `event.principal_id`: プリンシパル ID
/// - `event.result`: [`event::result`] の定数
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: [`event::entity_type`] の定数
/// - `event.entity_id`: エンティティ ID
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const DISPATCH: &str = "dispatch";
        pub const TRACKING: &str = "tracking";
        pub const CREDENTIAL: &str = "credential";
    }

    /// イベントアクション
    pub mod action {
        // ディスパッチ
        pub const MESSAGE_SENT: &str = "message.sent";
        pub const MESSAGE_FAILED: &str = "message.failed";
        pub const MESSAGE_SKIPPED: &str = "message.skipped";
        pub const DISPATCH_COMPLETED: &str = "dispatch.completed";

        // 認証情報
        pub const CREDENTIAL_REFRESHED: &str = "credential.refreshed";

        // 追跡
        pub const STATUS_CHANGED: &str = "tracking.status_changed";
        pub const RESPONSE_DETECTED: &str = "tracking.response_detected";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const TRACKING_RECORD: &str = "tracking_record";
        pub const DISPATCH_JOB: &str = "dispatch_job";
        pub const TOKEN_STATE: &str = "token_state";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
        pub const SKIPPED: &str = "skipped";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB、ファイルシステム）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（メール API、トークンエンドポイント）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const INTERNAL: &str = "internal";
        pub const MAIL_API: &str = "mail_api";
        pub const TOKEN_REFRESH: &str = "token_refresh";
        pub const ATTACHMENT: &str = "attachment";
    }
}

#[cfg(test)]
mod tests {
    use super::event;

    #[test]
    fn test_アクション名はカテゴリと矛盾しない接頭辞を持つ() {
        assert!(event::action::DISPATCH_COMPLETED.starts_with(event::category::DISPATCH));
        assert!(event::action::CREDENTIAL_REFRESHED.starts_with(event::category::CREDENTIAL));
        assert!(event::action::STATUS_CHANGED.starts_with(event::category::TRACKING));
    }

    #[test]
    fn test_log_business_eventマクロがコンパイルされ実行できる() {
        crate::log_business_event!(
            event.category = event::category::DISPATCH,
            event.action = event::action::MESSAGE_SENT,
            event.principal_id = "p-1",
            event.result = event::result::SUCCESS,
            "テストイベント"
        );
    }
}
