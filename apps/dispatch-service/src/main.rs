//! # Dispatch Service サーバー
//!
//! 応募メールの一括送信と配信状況の追跡を行う内部サービス。
//!
//! - **一括送信**: リクエストをキューに積み、専用ワーカーが宛先ごとに送信する
//! - **追跡**: 送信済みメッセージとスレッドをポーリングしてステータスを更新する
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `DISPATCH_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `DISPATCH_PORT` | **Yes** | ポート番号 |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `MAIL_BACKEND` | No | `gmail`（デフォルト）または `noop` |
//!
//! その他の調整値は [`DispatchConfig`] を参照。
//!
//! ## 起動方法
//!
//! ```bash
//! DISPATCH_PORT=3100 DATABASE_URL=postgres://... cargo run -p applytrack-dispatch-service
//! ```

use std::{net::SocketAddr, sync::Arc};

use applytrack_dispatch_service::{
    config::{DispatchConfig, MailBackend},
    handler::{
        DispatchState,
        TrackingState,
        create_dispatch,
        health_check,
        list_tracking_records,
        refresh_tracking_record,
        sync_tracking_records,
    },
    usecase::{
        ApplicationRenderer,
        BulkDispatcher,
        CredentialService,
        RetryPolicy,
        SendPipeline,
        StatusTracker,
        TokioSleeper,
        TrackerSettings,
        spawn_dispatch_worker,
    },
};
use applytrack_domain::{
    clock::{Clock, SystemClock},
    tracking::DeliveryInference,
};
use applytrack_infra::{
    FsAttachmentStore,
    HttpTokenRefresher,
    db,
    mail::{GmailApi, MailApi, NoopMailApi},
    repository::{
        PostgresTokenStateRepository,
        PostgresTrackingRecordRepository,
        TrackingRecordRepository,
    },
};
use applytrack_shared::observability::{TracingConfig, init_tracing};
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    init_tracing(TracingConfig::from_env("dispatch-service"));

    let config = DispatchConfig::from_env()?;

    tracing::info!(
        "Dispatch Service サーバーを起動します: {}:{}",
        config.host,
        config.port
    );

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("データベースに接続しました");

    // 依存コンポーネントを初期化
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sleeper = Arc::new(TokioSleeper);
    let records: Arc<dyn TrackingRecordRepository> =
        Arc::new(PostgresTrackingRecordRepository::new(pool.clone()));
    let mail_api: Arc<dyn MailApi> = match config.mail.backend {
        MailBackend::Gmail => Arc::new(GmailApi::new(
            config.mail.base_url.clone(),
            config.mail.request_timeout,
        )?),
        MailBackend::Noop => {
            tracing::warn!("MAIL_BACKEND=noop: メールは送信されません");
            Arc::new(NoopMailApi)
        }
    };

    let credentials = Arc::new(CredentialService::new(
        Arc::new(PostgresTokenStateRepository::new(pool)),
        Arc::new(HttpTokenRefresher::new(config.mail.request_timeout)),
        config.oauth.clone(),
        clock.clone(),
    ));

    let pipeline = SendPipeline::new(
        mail_api.clone(),
        credentials.clone(),
        sleeper.clone(),
        RetryPolicy {
            max_attempts: config.dispatch.max_attempts,
            base_delay: config.dispatch.base_delay,
            ..RetryPolicy::default()
        },
    );
    let dispatcher = Arc::new(BulkDispatcher::new(
        records.clone(),
        Arc::new(FsAttachmentStore::new(&config.attachment_root)),
        credentials.clone(),
        pipeline,
        ApplicationRenderer::new()?,
        sleeper.clone(),
        clock.clone(),
        config.dispatch.pacing,
    ));
    let tracker = Arc::new(StatusTracker::new(
        records.clone(),
        credentials,
        mail_api,
        sleeper,
        clock,
        TrackerSettings {
            pacing:        config.tracking.pacing,
            inference:     DeliveryInference {
                delivered_after: config.tracking.delivered_after,
                read_after:      config.tracking.read_after,
            },
            recent_window: config.tracking.recent_window,
        },
    ));

    let (queue, worker) = spawn_dispatch_worker(dispatcher, config.dispatch.queue_capacity);

    let dispatch_state = Arc::new(DispatchState { queue });
    let tracking_state = Arc::new(TrackingState { tracker, records });

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/internal/principals/{principal_id}/dispatches",
            post(create_dispatch),
        )
        .with_state(dispatch_state)
        .route(
            "/internal/principals/{principal_id}/tracking-records",
            get(list_tracking_records),
        )
        .route(
            "/internal/principals/{principal_id}/tracking-records/sync",
            post(sync_tracking_records),
        )
        .route(
            "/internal/principals/{principal_id}/tracking-records/{record_id}/refresh",
            post(refresh_tracking_record),
        )
        .with_state(tracking_state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Dispatch Service サーバーが起動しました: {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ルーターの破棄でキューが閉じるので、受付済みのジョブを処理し終えるまで待つ
    worker.await?;
    tracing::info!("Dispatch Service サーバーを停止しました");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("シグナルハンドラを登録できません: {e}");
    }
}
