//! # Dispatch Service ライブラリ
//!
//! 一括送信と配信状況追跡のユースケース、設定、内部 HTTP ハンドラを公開する。

pub mod config;
pub mod error;
pub mod handler;
pub mod usecase;

#[cfg(test)]
mod test_utils;
