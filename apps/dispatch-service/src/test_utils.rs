//! ユースケーステストのセットアップ
//!
//! モックを組み合わせたディスパッチャーとトラッカーを生成する。
//! 時刻は [`FixedClock`]、待機は [`RecordingSleeper`] で置き換える。

use std::{sync::Arc, time::Duration};

use applytrack_domain::{
    clock::FixedClock,
    credential::{OAuthClientDefaults, TokenState},
    principal::{EmailAddress, Principal, PrincipalId},
};
use applytrack_infra::mock::{
    MockAttachmentStore,
    MockMailApi,
    MockTokenRefresher,
    MockTokenStateRepository,
    MockTrackingRecordRepository,
};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::usecase::{
    ApplicationRenderer,
    BulkDispatcher,
    CredentialService,
    RetryPolicy,
    SendPipeline,
    StatusTracker,
    TrackerSettings,
    pacing::RecordingSleeper,
};

/// テストの基準時刻
pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// 有効なトークン状態（基準時刻から 1 時間有効）
pub fn valid_token_state() -> TokenState {
    serde_json::from_value(json!({
        "token": "ya29.current",
        "refresh_token": "1//refresh",
        "client_id": "client",
        "client_secret": "secret",
        "scopes": ["https://www.googleapis.com/auth/gmail.send"],
        "expiry": base_time() + chrono::Duration::hours(1)
    }))
    .unwrap()
}

pub fn principal(id: &PrincipalId) -> Principal {
    Principal {
        id:         id.clone(),
        email:      EmailAddress::new("thandi@example.com").unwrap(),
        full_name:  Some("Thandi Mokoena".to_string()),
        phone:      None,
        email_body: None,
    }
}

/// モックとテスト対象のセット
pub struct ServiceTestSetup {
    pub principal_id: PrincipalId,
    pub clock:        Arc<FixedClock>,
    pub token_repo:   MockTokenStateRepository,
    pub records:      MockTrackingRecordRepository,
    pub attachments:  MockAttachmentStore,
    pub mail:         MockMailApi,
    pub refresher:    MockTokenRefresher,
    pub sleeper:      RecordingSleeper,
    pub credentials:  Arc<CredentialService>,
}

impl ServiceTestSetup {
    /// トークン状態を保存済みのセットアップ
    pub fn with_token_state() -> Self {
        let setup = Self::without_token_state();
        setup
            .token_repo
            .add_state(setup.principal_id.clone(), valid_token_state());
        setup
    }

    pub fn without_token_state() -> Self {
        let clock = Arc::new(FixedClock::new(base_time()));
        let token_repo = MockTokenStateRepository::new();
        let refresher = MockTokenRefresher::new();
        let credentials = Arc::new(CredentialService::new(
            Arc::new(token_repo.clone()),
            Arc::new(refresher.clone()),
            OAuthClientDefaults::default(),
            clock.clone(),
        ));
        Self {
            principal_id: PrincipalId::new(),
            clock,
            token_repo,
            records: MockTrackingRecordRepository::new(),
            attachments: MockAttachmentStore::new(),
            mail: MockMailApi::new(),
            refresher,
            sleeper: RecordingSleeper::new(),
            credentials,
        }
    }

    pub fn principal(&self) -> Principal {
        principal(&self.principal_id)
    }

    pub fn dispatcher(&self) -> BulkDispatcher {
        let pipeline = SendPipeline::new(
            Arc::new(self.mail.clone()),
            self.credentials.clone(),
            Arc::new(self.sleeper.clone()),
            RetryPolicy::default(),
        );
        BulkDispatcher::new(
            Arc::new(self.records.clone()),
            Arc::new(self.attachments.clone()),
            self.credentials.clone(),
            pipeline,
            ApplicationRenderer::new().unwrap(),
            Arc::new(self.sleeper.clone()),
            self.clock.clone(),
            Duration::from_secs(2),
        )
    }

    pub fn tracker(&self) -> StatusTracker {
        StatusTracker::new(
            Arc::new(self.records.clone()),
            self.credentials.clone(),
            Arc::new(self.mail.clone()),
            Arc::new(self.sleeper.clone()),
            self.clock.clone(),
            TrackerSettings::default(),
        )
    }
}
