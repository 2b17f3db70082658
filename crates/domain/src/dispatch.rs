//! # 一括ディスパッチ
//!
//! 一括送信の入力（宛先）と結果集計を定義する。
//! [`BulkResult`] はディスパッチごとに新しく作られ、永続化されない。

use serde::{Deserialize, Serialize};

use crate::tracking::TrackingRecordId;

define_uuid_id! {
    /// 一括送信ジョブ ID
    pub struct DispatchJobId;
}

/// 送信先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// 宛先アドレス（未検証）
    pub email:    String,
    /// 表示ラベル（企業名）
    pub label:    String,
    /// 件名に使う募集職種
    #[serde(default)]
    pub position: Option<String>,
}

/// 宛先ごとの結果種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed,
    /// 既に応募済みのためスキップした
    AlreadyApplied,
}

/// 宛先ごとの結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchDetail {
    pub label:     String,
    pub recipient: String,
    pub outcome:   DispatchOutcome,
    pub message:   String,
    pub record_id: Option<TrackingRecordId>,
}

/// 一括送信の結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkResult {
    pub total:           usize,
    pub successful:      usize,
    pub failed:          usize,
    pub already_applied: usize,
    pub details:         Vec<DispatchDetail>,
}

impl BulkResult {
    /// 宛先数を確定して空の結果を作る
    pub fn with_total(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// 宛先 1 件の結果を加える
    pub fn record(&mut self, detail: DispatchDetail) {
        match detail.outcome {
            DispatchOutcome::Sent => self.successful += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::AlreadyApplied => self.already_applied += 1,
        }
        self.details.push(detail);
    }
}
