//! Build orchestration for card button clicks.
//!
//! Each triggered build runs as its own detached task: trigger, wait for the
//! queue item to start, poll until the build finishes. Every step reports to
//! the chat that owns the card. Notification failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatops_core::{DeployType, RequestId};
use tracing::{Instrument, error, info, info_span, warn};

use crate::feishu::Sender;
use crate::jenkins::{BuildOutcome, JenkinsError};
use crate::store::RequestStore;

/// CI capability used by the orchestrator.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Queue a build and return its queue id.
    async fn trigger(
        &self,
        job: &str,
        branch: &str,
        deploy_type: DeployType,
    ) -> Result<u64, JenkinsError>;

    /// Wait until the queued build starts and return its build number.
    async fn wait_for_start(&self, queue_id: u64, timeout: Duration) -> Result<u64, JenkinsError>;

    /// Poll a running build until it finishes.
    async fn monitor_until_done(
        &self,
        job: &str,
        build_number: u64,
    ) -> Result<BuildOutcome, JenkinsError>;
}

/// Starts a build pipeline without waiting for it.
pub trait ReleaseLauncher: Send + Sync {
    fn launch(&self, job: &str, branch: &str, deploy_type: DeployType, request_id: &RequestId);
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The request id has no stored state, so nobody can be notified.
    UnknownRequest,
    TriggerFailed,
    StartFailed,
    MonitorFailed,
    Succeeded,
    /// Finished with a non-success result.
    Failed(String),
}

/// Runs trigger/wait/monitor pipelines and reports progress to chat.
#[derive(Clone)]
pub struct ReleaseOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    store: RequestStore,
    builder: Arc<dyn Builder>,
    sender: Arc<dyn Sender>,
    start_timeout: Duration,
}

impl std::fmt::Debug for ReleaseOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseOrchestrator")
            .field("start_timeout", &self.inner.start_timeout)
            .finish_non_exhaustive()
    }
}

impl ReleaseOrchestrator {
    #[must_use]
    pub fn new(
        store: RequestStore,
        builder: Arc<dyn Builder>,
        sender: Arc<dyn Sender>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                builder,
                sender,
                start_timeout,
            }),
        }
    }

    /// Run one pipeline to completion.
    pub async fn run(
        &self,
        job: &str,
        branch: &str,
        deploy_type: DeployType,
        request_id: &RequestId,
    ) -> RunOutcome {
        let Some(state) = self.inner.store.get(request_id).await else {
            error!(request_id = %request_id, "Request not found in store, cannot send notifications");
            return RunOutcome::UnknownRequest;
        };
        let receiver = Receiver {
            id: state.original_request.receive_id,
            id_type: state.original_request.receive_id_type,
        };
        let builder = &self.inner.builder;

        let queue_id = match builder.trigger(job, branch, deploy_type).await {
            Ok(queue_id) => queue_id,
            Err(e) => {
                self.notify(
                    &receiver,
                    &format!(
                        "❌ 构建触发失败: {job}\nBranch: {branch}\nType: {deploy_type}\nError: {e}"
                    ),
                )
                .await;
                return RunOutcome::TriggerFailed;
            }
        };

        self.notify(
            &receiver,
            &format!("⏳ 正在排队: {job}\nBranch: {branch}\nType: {deploy_type}\nQueueID: {queue_id}"),
        )
        .await;

        let build_number = match builder
            .wait_for_start(queue_id, self.inner.start_timeout)
            .await
        {
            Ok(number) => number,
            Err(e) => {
                self.notify(
                    &receiver,
                    &format!("❌ 等待构建开始超时: {job}\nQueueID: {queue_id}\nError: {e}"),
                )
                .await;
                return RunOutcome::StartFailed;
            }
        };

        self.notify(
            &receiver,
            &format!("🚀 构建已开始: {job} #{build_number}\nBranch: {branch}\nType: {deploy_type}"),
        )
        .await;

        let outcome = match builder.monitor_until_done(job, build_number).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notify(
                    &receiver,
                    &format!("❌ 监控构建出错: {job} #{build_number}\nError: {e}"),
                )
                .await;
                return RunOutcome::MonitorFailed;
            }
        };

        if outcome.is_success() {
            self.notify(
                &receiver,
                &format!(
                    "✅ 构建成功: {job} #{build_number}\nBranch: {branch}\nType: {deploy_type}\nDuration: {}s",
                    outcome.duration.as_secs()
                ),
            )
            .await;
            RunOutcome::Succeeded
        } else {
            self.notify(
                &receiver,
                &format!(
                    "❌ 构建失败: {job} #{build_number}\nBranch: {branch}\nType: {deploy_type}\nResult: {}",
                    outcome.result
                ),
            )
            .await;
            RunOutcome::Failed(outcome.result)
        }
    }

    async fn notify(&self, receiver: &Receiver, text: &str) {
        if let Err(e) = self
            .inner
            .sender
            .send_text(&receiver.id, &receiver.id_type, text)
            .await
        {
            warn!(error = %e, receive_id = %receiver.id, "Failed to send build notification");
        }
    }
}

impl ReleaseLauncher for ReleaseOrchestrator {
    fn launch(&self, job: &str, branch: &str, deploy_type: DeployType, request_id: &RequestId) {
        let orchestrator = self.clone();
        let job = job.to_string();
        let branch = branch.to_string();
        let request_id = request_id.clone();
        let span = info_span!("release", job = %job, branch = %branch, deploy_type = %deploy_type, request_id = %request_id);

        info!(parent: &span, "Launching build pipeline");
        tokio::spawn(
            async move {
                let outcome = orchestrator
                    .run(&job, &branch, deploy_type, &request_id)
                    .await;
                info!(outcome = ?outcome, "Build pipeline finished");
            }
            .instrument(span),
        );
    }
}

struct Receiver {
    id: String,
    id_type: String,
}
