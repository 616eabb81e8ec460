//! OA polling scheduler.
//!
//! Two independent loops: a short one that turns newly approved OA requests
//! into release cards, and a long one that refreshes the delegated Feishu
//! user token. Polling passes are single-flight: a tick that arrives while a
//! pass is still running is dropped, not queued.
//!
//! A request is marked processed once it has been handled, even if the
//! initiator could not be resolved or the card could not be delivered.
//! Only unparseable documents and cards that fail to build stay pending.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatops_core::{ReleaseRequest, RequestId, ServiceSpec};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::cards::{CardError, CardService};
use crate::feishu::{FeishuError, Sender};
use crate::oa::{OaError, OaRelease, parse_release};

const CARD_TITLE: &str = "应用发布申请";
const DEFAULT_ACTIONS: [&str; 3] = ["gray", "rollback", "restart"];

/// Shortest interval either loop will run at.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A pending upstream document.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub id: String,
    pub document: Value,
}

/// Supplier of approved release requests.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// All requests not yet marked processed, oldest first.
    async fn fetch_unprocessed(&self) -> Result<Vec<UpstreamRequest>, OaError>;

    async fn mark_processed(&self, id: &str) -> Result<(), OaError>;

    /// Chat user id for a display name.
    async fn resolve_user_id(&self, name: &str) -> Result<String, OaError>;
}

/// Creates a group chat for a release.
#[async_trait]
pub trait GroupProvisioner: Send + Sync {
    /// Create a private group and return its chat id. `uuid` deduplicates
    /// repeated creation for the same request.
    async fn create_group(
        &self,
        name: &str,
        description: &str,
        owner_id: &str,
        uuid: &str,
    ) -> Result<String, FeishuError>;
}

/// Keeps delegated credentials fresh.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), FeishuError>;
}

/// Optional collaborators and settings.
#[derive(Default)]
pub struct SchedulerOptions {
    pub provisioner: Option<Arc<dyn GroupProvisioner>>,
    pub refresher: Option<Arc<dyn CredentialRefresher>>,
    /// `(receive_id, receive_id_type)` used when the initiator is unknown.
    pub fallback_receiver: Option<(String, String)>,
}

/// What happened to one upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Card delivered.
    Sent(RequestId),
    /// The document lists no jobs.
    NoJobs,
    /// No group, user or fallback receiver.
    NoReceiver,
    /// Card built and stored but delivery failed.
    SendFailed,
    /// The card could not be built; left pending.
    CardRejected,
    /// The document could not be parsed; left pending.
    ParseFailed,
}

impl RequestOutcome {
    /// Whether the request counts as handled.
    #[must_use]
    pub const fn should_mark_processed(&self) -> bool {
        !matches!(self, Self::ParseFailed | Self::CardRejected)
    }
}

/// Summary of one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub fetched: usize,
    pub marked: usize,
    pub pending: usize,
}

/// Progress reporting target for manually triggered runs.
pub struct Progress {
    sender: Arc<dyn Sender>,
    receive_id: String,
    receive_id_type: String,
}

impl Progress {
    #[must_use]
    pub fn new(sender: Arc<dyn Sender>, receive_id: String, receive_id_type: String) -> Self {
        Self {
            sender,
            receive_id,
            receive_id_type,
        }
    }

    /// Send a progress line. Failures are logged.
    pub async fn report(&self, text: &str) {
        if let Err(e) = self
            .sender
            .send_text(&self.receive_id, &self.receive_id_type, text)
            .await
        {
            warn!(error = %e, "Failed to send progress message");
        }
    }
}

/// Turns OA approvals into release cards.
#[derive(Clone)]
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    source: Arc<dyn UpstreamSource>,
    cards: CardService,
    options: SchedulerOptions,
    pass_lock: Mutex<()>,
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("provisioner", &self.inner.options.provisioner.is_some())
            .field("refresher", &self.inner.options.refresher.is_some())
            .field("fallback_receiver", &self.inner.options.fallback_receiver)
            .finish_non_exhaustive()
    }
}

impl PollingScheduler {
    #[must_use]
    pub fn new(
        source: Arc<dyn UpstreamSource>,
        cards: CardService,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                source,
                cards,
                options,
                pass_lock: Mutex::new(()),
            }),
        }
    }

    /// Start both loops. Each runs once immediately, then on its interval.
    /// Intervals shorter than one second are raised to one second. Abort the
    /// handle to stop.
    #[must_use]
    pub fn spawn(self, poll_interval: Duration, refresh_interval: Duration) -> JoinHandle<()> {
        if poll_interval < MIN_INTERVAL || refresh_interval < MIN_INTERVAL {
            warn!(
                poll_ms = poll_interval.as_millis(),
                refresh_ms = refresh_interval.as_millis(),
                "Scheduler interval below one second, using one second"
            );
        }
        let poll_interval = poll_interval.max(MIN_INTERVAL);
        let refresh_interval = refresh_interval.max(MIN_INTERVAL);

        info!(
            poll_secs = poll_interval.as_secs(),
            refresh_secs = refresh_interval.as_secs(),
            "Starting OA scheduler"
        );

        tokio::spawn(async move {
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut refresh = tokio::time::interval(refresh_interval);
            refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        let scheduler = self.clone();
                        tokio::spawn(async move {
                            scheduler.run_pass().await;
                        });
                    }
                    _ = refresh.tick() => self.refresh_credentials().await,
                }
            }
        })
    }

    /// Run one polling pass. Returns `None` when another pass is still
    /// running.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Option<PassReport> {
        let Ok(_guard) = self.inner.pass_lock.try_lock() else {
            info!("Previous OA pass still running, skipping this round");
            return None;
        };

        let requests = match self.inner.source.fetch_unprocessed().await {
            Ok(requests) => requests,
            Err(e) => {
                error!(error = %e, "Failed to fetch unprocessed OA requests");
                return Some(PassReport::default());
            }
        };

        let mut report = PassReport {
            fetched: requests.len(),
            ..PassReport::default()
        };
        if !requests.is_empty() {
            info!(count = requests.len(), "Found unprocessed OA requests");
        }

        for request in &requests {
            let outcome = self.process_request(request, None).await;
            debug!(id = %request.id, outcome = ?outcome, "OA request handled");

            if !outcome.should_mark_processed() {
                report.pending += 1;
                continue;
            }

            match self.inner.source.mark_processed(&request.id).await {
                Ok(()) => {
                    report.marked += 1;
                    info!(id = %request.id, "OA request processed and marked");
                }
                Err(e) => {
                    report.pending += 1;
                    error!(error = %e, id = %request.id, "Failed to mark OA request processed");
                }
            }
        }

        Some(report)
    }

    /// Refresh delegated credentials, if a refresher is configured.
    pub async fn refresh_credentials(&self) {
        let Some(refresher) = &self.inner.options.refresher else {
            return;
        };

        match refresher.refresh().await {
            Ok(()) => info!("User token refreshed"),
            Err(e) => error!(error = %e, "Failed to refresh user token"),
        }
    }

    /// Turn one upstream request into a release card.
    ///
    /// With `progress`, each step is reported there and the progress
    /// receiver is used when no group or user receiver is found.
    #[instrument(skip(self, request, progress), fields(id = %request.id))]
    pub async fn process_request(
        &self,
        request: &UpstreamRequest,
        progress: Option<&Progress>,
    ) -> RequestOutcome {
        let release = match parse_release(&request.document) {
            Ok(release) => release,
            Err(e) => {
                error!(error = %e, "Failed to parse OA request");
                report(progress, &format!("❌ 解析 OA 数据失败: {e}")).await;
                return RequestOutcome::ParseFailed;
            }
        };

        if release.jobs.is_empty() {
            warn!("OA request lists no jobs");
            report(progress, "⚠️ OA 数据中没有找到 Job").await;
            return RequestOutcome::NoJobs;
        }

        let (receive_id, receive_id_type) = match self.resolve_receiver(&release, progress).await {
            Some(receiver) => receiver,
            None => {
                warn!("No receiver for OA request, card not sent");
                return RequestOutcome::NoReceiver;
            }
        };

        let services = release
            .jobs
            .iter()
            .map(|job| ServiceSpec {
                name: format!("{}-prod", job.project),
                object_id: job.project.clone(),
                branches: vec![job.branch.clone()],
                actions: DEFAULT_ACTIONS.iter().map(ToString::to_string).collect(),
            })
            .collect();

        let card_request = ReleaseRequest {
            title: CARD_TITLE.to_string(),
            services,
            object_id: String::new(),
            receive_id,
            receive_id_type,
        };

        match self.inner.cards.send_card(card_request).await {
            Ok(request_id) => {
                info!(request_id = %request_id, "OA release card sent");
                report(progress, "✅ 卡片已发送，请点击卡片按钮测试 Jenkins 触发").await;
                RequestOutcome::Sent(request_id)
            }
            Err(e @ (CardError::InvalidCard | CardError::MissingReceiver)) => {
                error!(error = %e, "OA release card rejected");
                report(progress, &format!("❌ 发送卡片失败: {e}")).await;
                RequestOutcome::CardRejected
            }
            Err(e) => {
                error!(error = %e, "Failed to send OA release card");
                report(progress, &format!("❌ 发送卡片失败: {e}")).await;
                RequestOutcome::SendFailed
            }
        }
    }

    /// Pick the card destination: a new release group, the initiator, the
    /// progress receiver, then the configured fallback.
    async fn resolve_receiver(
        &self,
        release: &OaRelease,
        progress: Option<&Progress>,
    ) -> Option<(String, String)> {
        let name = release.display_name();
        let user_id = if name.is_empty() {
            debug!("OA request has no initiator");
            None
        } else {
            report(progress, &format!("🔍 正在查找发起人: {name}")).await;
            match self.inner.source.resolve_user_id(name).await {
                Ok(user_id) => {
                    debug!(user_id = %user_id, "Initiator resolved");
                    Some(user_id)
                }
                Err(e) => {
                    warn!(error = %e, initiator = %name, "Failed to resolve initiator");
                    report(progress, &format!("⚠️ 无法找到发起人 '{name}' 的 ID: {e}")).await;
                    None
                }
            }
        };

        if let Some(user_id) = &user_id
            && let Some(chat_id) = self.provision_group(release, name, user_id, progress).await
        {
            return Some((chat_id, "chat_id".to_string()));
        }

        user_id
            .map(|id| (id, "user_id".to_string()))
            .or_else(|| {
                progress.map(|p| (p.receive_id.clone(), p.receive_id_type.clone()))
            })
            .or_else(|| self.inner.options.fallback_receiver.clone())
            .filter(|(id, id_type)| !id.is_empty() && !id_type.is_empty())
    }

    async fn provision_group(
        &self,
        release: &OaRelease,
        name: &str,
        owner_id: &str,
        progress: Option<&Progress>,
    ) -> Option<String> {
        let provisioner = self.inner.options.provisioner.as_ref()?;

        let request_name = if release.request_name.is_empty() {
            "OA Release"
        } else {
            release.request_name.as_str()
        };
        let group_name = format!("🚀 发布群 - {request_name}");
        let description = format!("OA发布申请: {request_name}\n发起人: {name}");
        let uuid = [release.request_id.as_str(), release.request_name.as_str()]
            .into_iter()
            .find(|key| !key.is_empty())
            .map_or_else(
                || chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string(),
                ToString::to_string,
            );

        match provisioner
            .create_group(&group_name, &description, owner_id, &uuid)
            .await
        {
            Ok(chat_id) => {
                info!(chat_id = %chat_id, "Release group created");
                if let Err(e) = self
                    .inner
                    .cards
                    .sender()
                    .send_text(&chat_id, "chat_id", &format!("✅ 群已创建，欢迎 {name}"))
                    .await
                {
                    warn!(error = %e, "Failed to send group welcome message");
                }
                Some(chat_id)
            }
            Err(e) => {
                error!(error = %e, "Failed to create release group");
                report(progress, &format!("❌ 创建群失败: {e}")).await;
                None
            }
        }
    }
}

async fn report(progress: Option<&Progress>, text: &str) {
    if let Some(progress) = progress {
        progress.report(text).await;
    }
}
