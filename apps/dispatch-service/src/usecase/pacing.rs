//! # 待機の抽象化
//!
//! バックオフと送信間隔の待機をトレイトで抽象化し、テストでは
//! 実際に待たずに待機時間だけを記録する。

use std::time::Duration;

use async_trait::async_trait;

/// 待機トレイト
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// tokio タイマーで待機する実装
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// 待機時間を記録するだけのテスト用実装
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: std::sync::Arc<std::sync::Mutex<Vec<Duration>>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 要求された待機時間（呼び出し順）
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
