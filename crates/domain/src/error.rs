//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! 認証情報・メール API・送信結果のように、サブシステム固有のエラーは
//! それぞれのモジュールで定義する（[`crate::credential::AuthError`] など）。
//!
//! ## 使用例
//!
//! ```rust
//! use applytrack_domain::DomainError;
//!
//! fn validate_label(label: &str) -> Result<(), DomainError> {
//!     if label.is_empty() {
//!         return Err(DomainError::Validation("宛先ラベルは必須です".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値がビジネスルールに違反している場合に使用する。
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// エンティティが見つからない
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類（"TrackingRecord" など）
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },
}
