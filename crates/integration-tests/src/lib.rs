//! Integration tests for chatops.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p chatops-integration-tests
//! ```
//!
//! No database or network is needed: the fakes below stand in for Feishu,
//! Jenkins, OA and durable storage.
//!
//! # Test Categories
//!
//! - `request_store` - Persistence, idempotence and concurrency of card state
//! - `card_renderer` - Card layout and button rules
//! - `callback_state_machine` - Button click transitions
//! - `release_orchestrator` - Build lifecycle notifications
//! - `polling_scheduler` - OA request processing and single-flight passes

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatops_core::{CardState, DeployType, ReleaseRequest, RequestId, ServiceSpec};
use chatops_server::feishu::{FeishuError, MessageType, Sender};
use chatops_server::jenkins::{BuildOutcome, JenkinsError};
use chatops_server::oa::OaError;
use chatops_server::services::{
    Builder, GroupProvisioner, ReleaseLauncher, UpstreamRequest, UpstreamSource,
};
use chatops_server::store::{CardStateBackend, RequestStore, StoreError};
use serde_json::Value;

// =============================================================================
// Storage
// =============================================================================

/// In-memory durable backend that counts loads.
#[derive(Default)]
pub struct MemoryBackend {
    states: Mutex<HashMap<RequestId, CardState>>,
    loads: AtomicUsize,
    save_delay: Option<Duration>,
}

impl MemoryBackend {
    /// Make every save yield for `delay` before writing.
    #[must_use]
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = Some(delay);
        self
    }

    /// Number of `load` calls so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Raw persisted state, bypassing any cache.
    pub fn persisted(&self, id: &RequestId) -> Option<CardState> {
        self.states.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl CardStateBackend for MemoryBackend {
    async fn load(&self, id: &RequestId) -> Result<Option<CardState>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.states.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, id: &RequestId, state: &CardState) -> Result<(), StoreError> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        self.states
            .lock()
            .unwrap()
            .insert(id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, id: &RequestId) -> Result<(), StoreError> {
        self.states.lock().unwrap().remove(id);
        Ok(())
    }
}

/// A store over a fresh [`MemoryBackend`].
pub fn memory_store(capacity: u64) -> (RequestStore, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::default());
    (RequestStore::new(backend.clone(), capacity), backend)
}

// =============================================================================
// Chat
// =============================================================================

/// One delivered message.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub receive_id: String,
    pub receive_id_type: String,
    pub msg_type: MessageType,
    pub content: String,
}

impl SentMessage {
    /// The `text` of a text message.
    pub fn text(&self) -> Option<String> {
        let value: Value = serde_json::from_str(&self.content).ok()?;
        value.get("text")?.as_str().map(ToString::to_string)
    }

    /// The card of an interactive message.
    pub fn card(&self) -> Option<Value> {
        (self.msg_type == MessageType::Interactive)
            .then(|| serde_json::from_str(&self.content).ok())
            .flatten()
    }
}

/// Sender that records every message and can be told to fail.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        let sender = Self::default();
        sender.fail.store(true, Ordering::SeqCst);
        sender
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Texts of all text messages, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent().iter().filter_map(SentMessage::text).collect()
    }

    /// All delivered cards, in order.
    pub fn cards(&self) -> Vec<(SentMessage, Value)> {
        self.sent()
            .into_iter()
            .filter_map(|m| m.card().map(|card| (m, card)))
            .collect()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(
        &self,
        receive_id: &str,
        receive_id_type: &str,
        msg_type: MessageType,
        content: &str,
    ) -> Result<(), FeishuError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FeishuError::Api {
                code: 230_002,
                msg: "bot is not in the chat".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            receive_id: receive_id.to_string(),
            receive_id_type: receive_id_type.to_string(),
            msg_type,
            content: content.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Builds
// =============================================================================

/// One `launch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub job: String,
    pub branch: String,
    pub deploy_type: DeployType,
    pub request_id: RequestId,
}

/// Launcher that only records what would have been built.
#[derive(Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<Launch>>,
}

impl RecordingLauncher {
    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().unwrap().clone()
    }
}

impl ReleaseLauncher for RecordingLauncher {
    fn launch(&self, job: &str, branch: &str, deploy_type: DeployType, request_id: &RequestId) {
        self.launches.lock().unwrap().push(Launch {
            job: job.to_string(),
            branch: branch.to_string(),
            deploy_type,
            request_id: request_id.clone(),
        });
    }
}

/// Builder whose every step result is fixed up front.
pub struct ScriptedBuilder {
    trigger: Result<u64, String>,
    start: Result<u64, String>,
    monitor: Result<(String, Duration), String>,
    triggered: Mutex<Vec<(String, String, DeployType)>>,
}

impl ScriptedBuilder {
    /// Queue 42, build 7, finishing with `result` after 95 seconds.
    pub fn finishing_with(result: &str) -> Self {
        Self {
            trigger: Ok(42),
            start: Ok(7),
            monitor: Ok((result.to_string(), Duration::from_secs(95))),
            triggered: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing_trigger(mut self, error: &str) -> Self {
        self.trigger = Err(error.to_string());
        self
    }

    #[must_use]
    pub fn failing_start(mut self, error: &str) -> Self {
        self.start = Err(error.to_string());
        self
    }

    #[must_use]
    pub fn failing_monitor(mut self, error: &str) -> Self {
        self.monitor = Err(error.to_string());
        self
    }

    pub fn triggered(&self) -> Vec<(String, String, DeployType)> {
        self.triggered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Builder for ScriptedBuilder {
    async fn trigger(
        &self,
        job: &str,
        branch: &str,
        deploy_type: DeployType,
    ) -> Result<u64, JenkinsError> {
        self.triggered
            .lock()
            .unwrap()
            .push((job.to_string(), branch.to_string(), deploy_type));
        self.trigger.clone().map_err(JenkinsError::Trigger)
    }

    async fn wait_for_start(&self, queue_id: u64, _timeout: Duration) -> Result<u64, JenkinsError> {
        self.start
            .clone()
            .map_err(|_| JenkinsError::StartTimeout(queue_id))
    }

    async fn monitor_until_done(
        &self,
        _job: &str,
        _build_number: u64,
    ) -> Result<BuildOutcome, JenkinsError> {
        self.monitor
            .clone()
            .map(|(result, duration)| BuildOutcome { result, duration })
            .map_err(JenkinsError::Monitor)
    }
}

// =============================================================================
// OA
// =============================================================================

/// Upstream source over a fixed list of documents.
#[derive(Default)]
pub struct FakeSource {
    pending: Mutex<VecDeque<UpstreamRequest>>,
    marked: Mutex<Vec<String>>,
    users: Mutex<BTreeMap<String, String>>,
    fetch_delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl FakeSource {
    pub fn push(&self, id: &str, document: Value) {
        self.pending.lock().unwrap().push_back(UpstreamRequest {
            id: id.to_string(),
            document,
        });
    }

    pub fn with_user(self, name: &str, user_id: &str) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(name.to_string(), user_id.to_string());
        self
    }

    /// Make every fetch take `delay`.
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamSource for FakeSource {
    async fn fetch_unprocessed(&self) -> Result<Vec<UpstreamRequest>, OaError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let marked = self.marked();
        Ok(self
            .pending
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !marked.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: &str) -> Result<(), OaError> {
        self.marked.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn resolve_user_id(&self, name: &str) -> Result<String, OaError> {
        self.users
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| FeishuError::UserNotFound(name.to_string()).into())
    }
}

/// Group provisioner that hands out `oc_{n}` chat ids, or always fails.
#[derive(Default)]
pub struct FakeProvisioner {
    created: Mutex<Vec<(String, String, String, String)>>,
    fail: bool,
}

impl FakeProvisioner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(name, description, owner_id, uuid)` per created group.
    pub fn created(&self) -> Vec<(String, String, String, String)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl GroupProvisioner for FakeProvisioner {
    async fn create_group(
        &self,
        name: &str,
        description: &str,
        owner_id: &str,
        uuid: &str,
    ) -> Result<String, FeishuError> {
        if self.fail {
            return Err(FeishuError::Api {
                code: 99_991_663,
                msg: "no permission".to_string(),
            });
        }
        let mut created = self.created.lock().unwrap();
        created.push((
            name.to_string(),
            description.to_string(),
            owner_id.to_string(),
            uuid.to_string(),
        ));
        Ok(format!("oc_{}", created.len()))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A service with one branch.
pub fn service(name: &str, branch: &str, actions: &[&str]) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        object_id: name.to_string(),
        branches: vec![branch.to_string()],
        actions: actions.iter().map(ToString::to_string).collect(),
    }
}

/// A request addressed to chat `oc_release`.
pub fn release_request(services: Vec<ServiceSpec>) -> ReleaseRequest {
    ReleaseRequest {
        title: "发布申请".to_string(),
        services,
        object_id: String::new(),
        receive_id: "oc_release".to_string(),
        receive_id_type: "chat_id".to_string(),
    }
}

/// `(service, action)` of every button in a serialized card.
pub fn card_buttons(card: &Value) -> Vec<(String, String)> {
    card["elements"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|e| e["tag"] == "action")
        .flat_map(|e| e["actions"].as_array().cloned().unwrap_or_default())
        .map(|b| {
            (
                b["value"]["service"].as_str().unwrap_or_default().to_string(),
                b["value"]["action"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// An OA document as the webhook stores it.
pub fn oa_document(initiator: &str, request_name: &str, fwm: &str) -> Value {
    serde_json::json!({
        "id": "a1b2c3d4",
        "original_data": {
            "requestManager": {
                "sqr": initiator,
                "requestname": request_name,
                "requestid": "9001"
            },
            "fwm": fwm
        }
    })
}
