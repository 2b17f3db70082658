//! # API レスポンスエンベロープ
//!
//! 内部 API の統一レスポンス形式 `{ "data": T }` を提供する。

use serde::{Deserialize, Serialize};

/// 内部 API の統一レスポンス型
///
/// ディスパッチ受付、追跡レコード一覧、同期結果などのエンドポイントは
/// すべて `{ "data": T }` 形式でレスポンスを返す。
///
/// ## 使用例
///
/// ```
/// use applytrack_shared::ApiResponse;
///
/// let response = ApiResponse::new("accepted");
/// assert_eq!(response.data, "accepted");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    /// 新しい `ApiResponse` を作成する
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializeを正しいjson形状にする() {
        let response = ApiResponse::new("hello");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json, serde_json::json!({ "data": "hello" }));
    }

    #[test]
    fn test_構造体ペイロードをdeserializeできる() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Summary {
            updated:   usize,
            responses: usize,
        }

        let json = r#"{"data": {"updated": 3, "responses": 1}}"#;
        let response: ApiResponse<Summary> = serde_json::from_str(json).unwrap();

        assert_eq!(
            response.data,
            Summary {
                updated:   3,
                responses: 1,
            }
        );
    }
}
