//! # 応募メールのテンプレートレンダラー
//!
//! tera テンプレートエンジンで応募メールの本文を生成する。
//!
//! - テンプレートは `include_str!` でバイナリに埋め込む
//! - 件名: 職種があれば `Application for {position} - {name}`、
//!   なければ `Application to {company} - {name}`
//! - 本文は定型の導入と結びの間に、プリンシパル独自の本文をエスケープせずに差し込む

use applytrack_domain::{dispatch::Target, principal::Principal};
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "application.txt";

/// 生成した件名と本文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedApplication {
    pub subject: String,
    pub body:    String,
}

/// テンプレートレンダラー
pub struct ApplicationRenderer {
    engine: Tera,
}

impl ApplicationRenderer {
    /// 埋め込みテンプレートを登録したレンダラーを作る
    pub fn new() -> Result<Self, tera::Error> {
        let mut engine = Tera::default();
        engine.add_raw_template(
            TEMPLATE_NAME,
            include_str!("../../templates/application.txt"),
        )?;
        Ok(Self { engine })
    }

    /// 宛先ごとの件名と本文を生成する
    pub fn render(
        &self,
        principal: &Principal,
        target: &Target,
    ) -> Result<RenderedApplication, tera::Error> {
        let name = principal.display_name();
        let company = target.label.trim();
        let position = target
            .position
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let subject = match position {
            Some(position) => format!("Application for {position} - {name}"),
            None => format!("Application to {company} - {name}"),
        };

        let mut context = Context::new();
        context.insert("company", company);
        context.insert("position", &position);
        context.insert("name", name);
        context.insert("email", principal.email.as_str());
        context.insert("phone", &non_blank(principal.phone.as_deref()));
        context.insert("custom_body", &non_blank(principal.email_body.as_deref()));

        let body = self.engine.render(TEMPLATE_NAME, &context)?;

        Ok(RenderedApplication { subject, body })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
