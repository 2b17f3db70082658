//! # ディスパッチキューとワーカー
//!
//! 一括送信をリクエスト処理から切り離して実行する。
//!
//! - キューは容量付きの `mpsc`。満杯なら即座に [`EnqueueError::Full`] を返す
//! - 1 つの専用ワーカータスクがジョブを順番に処理する
//! - 投入時に受け取る [`JobReceipt`] から最終結果を待てる（待たなくてもよい）
//! - すべての [`DispatchQueue`] を破棄するとワーカーは残りを処理して終了する

use std::sync::Arc;

use applytrack_domain::dispatch::{BulkResult, DispatchJobId};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::Instrument;

use super::{BulkDispatcher, DispatchError, DispatchRequest};

/// ジョブ投入のエラー
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("ディスパッチキューが満杯です")]
    Full,

    #[error("ディスパッチワーカーが停止しています")]
    Closed,
}

struct DispatchJob {
    id:      DispatchJobId,
    request: DispatchRequest,
    reply:   oneshot::Sender<Result<BulkResult, DispatchError>>,
}

/// ジョブの受付証
#[derive(Debug)]
pub struct JobReceipt {
    pub job_id: DispatchJobId,
    result:     oneshot::Receiver<Result<BulkResult, DispatchError>>,
}

impl JobReceipt {
    /// ジョブの完了を待って結果を返す
    ///
    /// ワーカーが結果を返さずに終了した場合は `None`。
    pub async fn outcome(self) -> Option<Result<BulkResult, DispatchError>> {
        self.result.await.ok()
    }
}

/// ディスパッチキューへのハンドル
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchJob>,
}

impl DispatchQueue {
    /// ジョブを投入する（待たずに返る）
    pub fn enqueue(&self, request: DispatchRequest) -> Result<JobReceipt, EnqueueError> {
        let (reply, result) = oneshot::channel();
        let job_id = DispatchJobId::new();
        let job = DispatchJob {
            id: job_id.clone(),
            request,
            reply,
        };

        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })?;

        tracing::info!(%job_id, "一括送信ジョブを受け付けました");
        Ok(JobReceipt { job_id, result })
    }
}

/// ワーカーを起動し、キューのハンドルとワーカーの JoinHandle を返す
pub fn spawn_dispatch_worker(
    dispatcher: Arc<BulkDispatcher>,
    capacity: usize,
) -> (DispatchQueue, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<DispatchJob>(capacity.max(1));

    let handle = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let result = dispatcher
                .dispatch(&job.request)
                .instrument(tracing::info_span!("dispatch_job", job_id = %job.id))
                .await;
            if let Err(e) = &result {
                tracing::error!(job_id = %job.id, "一括送信ジョブを中断しました: {e}");
            }
            // 受付証が破棄されていても処理は完了している
            let _ = job.reply.send(result);
        }
        tracing::info!("ディスパッチワーカーを停止しました");
    });

    (DispatchQueue { sender }, handle)
}

#[cfg(test)]
mod tests {
    use applytrack_domain::dispatch::Target;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_utils::ServiceTestSetup;

    fn request(setup: &ServiceTestSetup, emails: &[&str]) -> DispatchRequest {
        DispatchRequest {
            principal:   setup.principal(),
            targets:     emails
                .iter()
                .map(|email| Target {
                    email:    (*email).to_string(),
                    label:    "Acme".to_string(),
                    position: None,
                })
                .collect(),
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn test_投入したジョブの結果を受付証から受け取れる() {
        let setup = ServiceTestSetup::with_token_state();
        let (queue, handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);

        let receipt = queue
            .enqueue(request(&setup, &["careers@acme.example.com"]))
            .unwrap();
        let result = receipt.outcome().await.unwrap().unwrap();

        assert_eq!(result.successful, 1);
        drop(queue);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_キューが満杯なら即座に拒否する() {
        let setup = ServiceTestSetup::with_token_state();
        // ワーカーを起動せずに容量 1 のキューを作る
        let (sender, _receiver) = mpsc::channel(1);
        let queue = DispatchQueue { sender };

        let first = queue.enqueue(request(&setup, &["a@example.com"]));
        let second = queue.enqueue(request(&setup, &["b@example.com"]));

        assert!(first.is_ok());
        assert_eq!(second.unwrap_err(), EnqueueError::Full);
    }

    #[tokio::test]
    async fn test_ワーカー停止後の投入は拒否する() {
        let setup = ServiceTestSetup::with_token_state();
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let queue = DispatchQueue { sender };

        let result = queue.enqueue(request(&setup, &["a@example.com"]));

        assert_eq!(result.unwrap_err(), EnqueueError::Closed);
    }

    #[tokio::test]
    async fn test_ハンドルをすべて破棄するとワーカーは残りを処理して終了する() {
        let setup = ServiceTestSetup::with_token_state();
        let (queue, handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);

        let first = queue.enqueue(request(&setup, &["a@example.com"])).unwrap();
        let second = queue.enqueue(request(&setup, &["b@example.com"])).unwrap();
        drop(queue);
        handle.await.unwrap();

        assert!(first.outcome().await.unwrap().is_ok());
        assert!(second.outcome().await.unwrap().is_ok());
        assert_eq!(setup.records.records().len(), 2);
    }

    #[tokio::test]
    async fn test_中断したジョブはエラーを返しワーカーは動き続ける() {
        let setup = ServiceTestSetup::without_token_state();
        let (queue, handle) = spawn_dispatch_worker(Arc::new(setup.dispatcher()), 4);

        let failed = queue.enqueue(request(&setup, &["a@example.com"])).unwrap();
        let outcome = failed.outcome().await.unwrap();
        assert!(matches!(outcome, Err(DispatchError::Credential(_))));

        setup
            .token_repo
            .add_state(setup.principal_id.clone(), crate::test_utils::valid_token_state());
        let retried = queue.enqueue(request(&setup, &["a@example.com"])).unwrap();
        assert!(retried.outcome().await.unwrap().is_ok());

        drop(queue);
        handle.await.unwrap();
    }
}
