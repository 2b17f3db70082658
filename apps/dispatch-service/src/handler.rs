//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! - 各ハンドラはサブモジュールに配置し、ここで re-export する
//! - ハンドラは薄く保ち、処理はユースケース層に委譲する

pub mod dispatch;
pub mod health;
pub mod tracking;

pub use dispatch::{DispatchState, create_dispatch};
pub use health::health_check;
pub use tracking::{
    TrackingState,
    list_tracking_records,
    refresh_tracking_record,
    sync_tracking_records,
};
