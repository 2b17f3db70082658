//! # プリンシパル
//!
//! 委任認証情報を持ち、応募メールを一括送信するアカウント保有者。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 説明 |
//! |---|------------|------|
//! | [`PrincipalId`] | プリンシパル ID | 追跡レコード・トークン状態の所有者 |
//! | [`Principal`] | プリンシパルプロフィール | 送信元アドレス、氏名、電話番号、本文の追記テキスト |
//! | [`EmailAddress`] | メールアドレス | 構文検証済みのアドレス |
//!
//! 認証・セッション管理は外部の責務であり、プロフィールはディスパッチ要求ごとに
//! 呼び出し元から渡される。

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::DomainError;

define_uuid_id! {
    /// プリンシパル ID（一意識別子）
    pub struct PrincipalId;
}

static EMAIL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok()
});

/// 構文検証済みのメールアドレス
///
/// 宛先アドレスは送信前に必ずこの型を通す。
/// リモート呼び出しの前に不正な形式を弾くため。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// メールアドレスを作成する
    ///
    /// 前後の空白を除去し、小文字に正規化する。`local@domain.tld` 形式でない場合は
    /// `DomainError::Validation` を返す。
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = Self::normalize(&value.into());

        if value.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        if value.chars().count() > 254 {
            return Err(DomainError::Validation(
                "メールアドレスは 254 文字以内である必要があります".to_string(),
            ));
        }

        let valid = EMAIL_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&value));
        if !valid {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// 重複判定に使う正規形（前後の空白除去と小文字化）
    ///
    /// 形式の検証はしないため、不正なアドレスにも使える。
    pub fn normalize(value: &str) -> String {
        value.trim().to_lowercase()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// プリンシパルプロフィール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id:         PrincipalId,
    /// 送信元アドレス
    pub email:      EmailAddress,
    pub full_name:  Option<String>,
    pub phone:      Option<String>,
    /// 本文に差し込むプリンシパル独自のテキスト（そのまま挿入する）
    pub email_body: Option<String>,
}

impl Principal {
    /// 署名・件名に使う表示名
    ///
    /// 氏名が未設定（または空白のみ）の場合はメールアドレスを使う。
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => self.email.as_str(),
        }
    }
}
