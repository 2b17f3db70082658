//! # 添付ペイロードストア
//!
//! 添付ファイル参照（キー）からファイル内容を読み出す。
//! アップロード処理は外部の責務で、ここでは読み出しのみを扱う。

use std::path::{Component, Path, PathBuf};

use applytrack_domain::message::AttachmentRef;
use async_trait::async_trait;

use crate::error::InfraError;

/// 添付ペイロードストアトレイト
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// 参照に対応するファイル内容を読み出す
    ///
    /// 存在しない場合は `Ok(None)`。
    async fn load(&self, reference: &AttachmentRef) -> Result<Option<Vec<u8>>, InfraError>;
}

/// ファイルシステム実装
///
/// 設定されたルートディレクトリ配下の相対パスをキーとして扱う。
#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// キーをルート配下のパスに解決する
    ///
    /// 絶対パスや `..` を含むキーはルートの外を指しうるため拒否する。
    fn resolve(&self, key: &str) -> Result<PathBuf, InfraError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(InfraError::invalid_input(format!(
                "添付ファイルのキーが不正です: {key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    #[tracing::instrument(skip_all, level = "debug", fields(key = %reference.key))]
    async fn load(&self, reference: &AttachmentRef) -> Result<Option<Vec<u8>>, InfraError> {
        let path = self.resolve(&reference.key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(key: &str) -> AttachmentRef {
        AttachmentRef {
            key:      key.to_string(),
            filename: "cv.pdf".to_string(),
        }
    }

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("applytrack-{name}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[tokio::test]
    async fn test_存在するファイルを読み出す() {
        let root = temp_root("load");
        std::fs::write(root.join("cv.pdf"), b"%PDF-1.4").unwrap();
        let store = FsAttachmentStore::new(&root);

        let data = store.load(&reference("cv.pdf")).await.unwrap();

        assert_eq!(data, Some(b"%PDF-1.4".to_vec()));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_存在しないファイルはnoneを返す() {
        let root = temp_root("missing");
        let store = FsAttachmentStore::new(&root);

        let data = store.load(&reference("nope.pdf")).await.unwrap();

        assert_eq!(data, None);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_ルート外を指すキーは入力エラー() {
        let store = FsAttachmentStore::new("/srv/uploads");

        let result = store.load(&reference("../etc/passwd")).await;

        assert!(matches!(
            result.map_err(|e| e.to_string()),
            Err(msg) if msg.contains("キーが不正")
        ));
    }
}
