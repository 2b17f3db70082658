//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリのリポジトリと外部サービスのモック。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! applytrack-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use applytrack_domain::{
    credential::{AuthError, Credential, RefreshedToken, TokenState},
    mail_api::{MailApiError, RemoteMessage, RemoteMessageRef, RemoteThread, label},
    message::AttachmentRef,
    principal::PrincipalId,
    tracking::{TrackingRecord, TrackingRecordId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    attachment_store::AttachmentStore,
    error::InfraError,
    mail::{MailApi, RawMessage},
    oauth::TokenRefresher,
    repository::{TokenStateRepository, TrackingRecordFilter, TrackingRecordRepository},
};

// ===== MockTokenStateRepository =====

#[derive(Clone, Default)]
pub struct MockTokenStateRepository {
    states: Arc<Mutex<HashMap<PrincipalId, TokenState>>>,
    saves:  Arc<Mutex<usize>>,
}

impl MockTokenStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&self, principal_id: PrincipalId, state: TokenState) {
        self.states.lock().unwrap().insert(principal_id, state);
    }

    pub fn state(&self, principal_id: &PrincipalId) -> Option<TokenState> {
        self.states.lock().unwrap().get(principal_id).cloned()
    }

    /// `save` が呼ばれた回数
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl TokenStateRepository for MockTokenStateRepository {
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<TokenState>, InfraError> {
        Ok(self.state(principal_id))
    }

    async fn save(&self, principal_id: &PrincipalId, state: &TokenState) -> Result<(), InfraError> {
        self.states
            .lock()
            .unwrap()
            .insert(principal_id.clone(), state.clone());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

// ===== MockTrackingRecordRepository =====

#[derive(Clone, Default)]
pub struct MockTrackingRecordRepository {
    records: Arc<Mutex<Vec<TrackingRecord>>>,
}

impl MockTrackingRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: TrackingRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// 保存済みの全レコード（挿入順）
    pub fn records(&self) -> Vec<TrackingRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackingRecordRepository for MockTrackingRecordRepository {
    async fn insert(&self, record: &TrackingRecord) -> Result<(), InfraError> {
        let mut records = self.records.lock().unwrap();
        let duplicated = records.iter().any(|r| {
            r.principal_id() == record.principal_id()
                && r.recipient_email() == record.recipient_email()
        });
        if duplicated {
            return Err(InfraError::unexpected(format!(
                "追跡レコードが重複しています: {}",
                record.recipient_email()
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &TrackingRecord) -> Result<(), InfraError> {
        let mut records = self.records.lock().unwrap();
        match records.iter().position(|r| r.id() == record.id()) {
            Some(pos) => {
                records[pos] = record.clone();
                Ok(())
            }
            None => Err(InfraError::unexpected(format!(
                "更新対象の追跡レコードが存在しません: {}",
                record.id()
            ))),
        }
    }

    async fn find_by_id(
        &self,
        principal_id: &PrincipalId,
        id: &TrackingRecordId,
    ) -> Result<Option<TrackingRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.principal_id() == principal_id && r.id() == id)
            .cloned())
    }

    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
        filter: TrackingRecordFilter,
    ) -> Result<Vec<TrackingRecord>, InfraError> {
        let mut records: Vec<TrackingRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.principal_id() == principal_id)
            .filter(|r| filter.status.is_none_or(|s| r.status() == s))
            .cloned()
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(records)
    }

    async fn find_by_principal_and_recipient(
        &self,
        principal_id: &PrincipalId,
        recipient_email: &str,
    ) -> Result<Option<TrackingRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.principal_id() == principal_id && r.recipient_email() == recipient_email)
            .cloned())
    }

    async fn find_trackable_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Vec<TrackingRecord>, InfraError> {
        let mut records: Vec<TrackingRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.principal_id() == principal_id && r.is_trackable())
            .cloned()
            .collect();
        records.sort_by_key(TrackingRecord::created_at);
        Ok(records)
    }

    async fn find_recent_without_response(
        &self,
        principal_id: &PrincipalId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrackingRecord>, InfraError> {
        let mut records: Vec<TrackingRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.principal_id() == principal_id
                    && r.sent_at().is_some_and(|at| at >= since)
                    && r.thread_id().is_some()
                    && !r.has_response()
                    && r.status() != applytrack_domain::tracking::DeliveryStatus::Failed
            })
            .cloned()
            .collect();
        records.sort_by_key(TrackingRecord::sent_at);
        Ok(records)
    }
}

// ===== MockMailApi =====

/// 台本どおりに応答するメール API
///
/// 送信の応答は登録順に消費し、尽きたら成功を返す。
/// メッセージ・スレッドは登録されていなければ NotFound を返す。
#[derive(Clone, Default)]
pub struct MockMailApi {
    send_script:  Arc<Mutex<VecDeque<Result<RemoteMessageRef, MailApiError>>>>,
    sent:         Arc<Mutex<Vec<RawMessage>>>,
    bearer_seen:  Arc<Mutex<Vec<String>>>,
    messages:     Arc<Mutex<HashMap<String, Result<RemoteMessage, MailApiError>>>>,
    threads:      Arc<Mutex<HashMap<String, Result<RemoteThread, MailApiError>>>>,
    lookup_calls: Arc<Mutex<usize>>,
}

impl MockMailApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次の送信呼び出しの応答を追加する
    pub fn push_send(&self, response: Result<RemoteMessageRef, MailApiError>) {
        self.send_script.lock().unwrap().push_back(response);
    }

    pub fn set_message(&self, message_id: &str, response: Result<RemoteMessage, MailApiError>) {
        self.messages
            .lock()
            .unwrap()
            .insert(message_id.to_string(), response);
    }

    pub fn set_thread(&self, thread_id: &str, response: Result<RemoteThread, MailApiError>) {
        self.threads
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), response);
    }

    /// `send_message` の呼び出し回数
    pub fn send_calls(&self) -> usize {
        self.bearer_seen.lock().unwrap().len()
    }

    /// 送信に成功したメッセージ
    pub fn sent_messages(&self) -> Vec<RawMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// `send_message` に渡されたアクセストークン（呼び出し順）
    pub fn bearer_tokens(&self) -> Vec<String> {
        self.bearer_seen.lock().unwrap().clone()
    }

    /// `get_message` / `get_thread` の呼び出し回数
    pub fn lookup_calls(&self) -> usize {
        *self.lookup_calls.lock().unwrap()
    }
}

#[async_trait]
impl MailApi for MockMailApi {
    async fn send_message(
        &self,
        credential: &Credential,
        raw: &RawMessage,
    ) -> Result<RemoteMessageRef, MailApiError> {
        self.bearer_seen
            .lock()
            .unwrap()
            .push(credential.access_token().to_string());
        let scripted = self.send_script.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            let id = uuid::Uuid::now_v7().simple().to_string();
            Ok(RemoteMessageRef {
                message_id: format!("msg-{id}"),
                thread_id:  format!("thr-{id}"),
            })
        });
        if result.is_ok() {
            self.sent.lock().unwrap().push(raw.clone());
        }
        result
    }

    async fn get_message(
        &self,
        _credential: &Credential,
        message_id: &str,
    ) -> Result<RemoteMessage, MailApiError> {
        *self.lookup_calls.lock().unwrap() += 1;
        self.messages
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .unwrap_or_else(|| Err(MailApiError::not_found(message_id)))
    }

    async fn get_thread(
        &self,
        _credential: &Credential,
        thread_id: &str,
    ) -> Result<RemoteThread, MailApiError> {
        *self.lookup_calls.lock().unwrap() += 1;
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| Err(MailApiError::not_found(thread_id)))
    }
}

/// SENT ラベル付きのリモートメッセージを作る
pub fn sent_message(message_id: &str, thread_id: &str) -> RemoteMessage {
    RemoteMessage {
        id:            message_id.to_string(),
        thread_id:     thread_id.to_string(),
        label_ids:     vec![label::SENT.to_string()],
        internal_date: None,
    }
}

// ===== MockTokenRefresher =====

/// 台本どおりに応答するトークンリフレッシャー
///
/// 応答が尽きたら `RefreshFailed` を返す。
#[derive(Clone, Default)]
pub struct MockTokenRefresher {
    script: Arc<Mutex<VecDeque<Result<RefreshedToken, AuthError>>>>,
    calls:  Arc<Mutex<usize>>,
}

impl MockTokenRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<RefreshedToken, AuthError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn refresh(&self, _credential: &Credential) -> Result<RefreshedToken, AuthError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::RefreshFailed("応答が登録されていません".to_string())))
    }
}

// ===== MockAttachmentStore =====

#[derive(Clone, Default)]
pub struct MockAttachmentStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, key: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(key.to_string(), data);
    }
}

#[async_trait]
impl AttachmentStore for MockAttachmentStore {
    async fn load(&self, reference: &AttachmentRef) -> Result<Option<Vec<u8>>, InfraError> {
        Ok(self.files.lock().unwrap().get(&reference.key).cloned())
    }
}
