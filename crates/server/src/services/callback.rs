//! Card button click handling.
//!
//! A click is checked against the stored card state, recorded (click count,
//! disabled flag), dispatched, and answered with a toast plus the re-rendered
//! card. Build pipelines are launched in the background; the response never
//! waits for them.

use std::sync::Arc;

use chatops_core::{ActionKind, BATCH_SERVICE, ButtonAction, CardState, DeployType, RequestId};
use tracing::{debug, error, info, instrument, warn};

use super::orchestrator::ReleaseLauncher;
use crate::card::{build_card, render_state};
use crate::feishu::{ButtonValue, CallbackResponse, MessageType, Sender};
use crate::store::{DisableOutcome, RequestStore, StoreError};

pub const MSG_INVALID_PAYLOAD: &str = "无效的操作数据";
pub const MSG_MISSING_REQUEST_ID: &str = "无法获取请求ID，请重试";
pub const MSG_ALREADY_DONE: &str = "该操作已执行，请勿重复点击";
pub const MSG_REQUEST_MISSING: &str = "请求数据不存在";
pub const MSG_REQUEST_EXPIRED: &str = "请求数据已过期或不存在";
pub const MSG_SUCCESS: &str = "操作成功";

/// Applies button clicks to card state.
#[derive(Clone)]
pub struct CallbackService {
    store: RequestStore,
    launcher: Arc<dyn ReleaseLauncher>,
    sender: Option<Arc<dyn Sender>>,
}

impl std::fmt::Debug for CallbackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackService")
            .field("store", &self.store)
            .field("has_sender", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

impl CallbackService {
    /// `sender` delivers the follow-up card of `stop_batch_release`; without
    /// one the follow-up is stored but not sent.
    #[must_use]
    pub fn new(
        store: RequestStore,
        launcher: Arc<dyn ReleaseLauncher>,
        sender: Option<Arc<dyn Sender>>,
    ) -> Self {
        Self {
            store,
            launcher,
            sender,
        }
    }

    /// Handle one click. Always produces a response; failures surface as
    /// toasts.
    #[instrument(skip(self, value), fields(action, service, request_id))]
    pub async fn handle_button_click(&self, value: Option<ButtonValue>) -> CallbackResponse {
        let Some(value) = value.filter(|v| !v.action.is_empty()) else {
            return CallbackResponse::info(MSG_INVALID_PAYLOAD);
        };
        if value.request_id.is_empty() {
            return CallbackResponse::info(MSG_MISSING_REQUEST_ID);
        }

        let span = tracing::Span::current();
        span.record("action", value.action.as_str());
        span.record("service", value.service.as_str());
        span.record("request_id", value.request_id.as_str());

        let request_id = RequestId::new(value.request_id.as_str());
        let action = ButtonAction::parse(&value.action);
        let service = value.service.as_str();

        if self
            .store
            .is_action_disabled(&request_id, service, action.as_str())
            .await
        {
            info!("Ignoring click on disabled action");
            return self.already_done(&request_id).await;
        }

        // One-shot buttons are claimed atomically so concurrent clicks
        // dispatch at most once.
        if action.disables_on_click() {
            match self
                .store
                .try_disable(&request_id, service, action.as_str())
                .await
            {
                Ok(DisableOutcome::AlreadyDisabled) => {
                    info!("Action claimed by a concurrent click");
                    return self.already_done(&request_id).await;
                }
                Ok(DisableOutcome::Disabled | DisableOutcome::NotFound) => {}
                Err(e) => log_store_error("disable action", Err(e)),
            }
        }
        if action.counts_clicks() {
            log_store_error(
                "increment click count",
                self.store
                    .increment_action_count(&request_id, service, action.as_str())
                    .await,
            );
        }

        match &action {
            ButtonAction::BatchReleaseAll => {
                if let Err(response) = self.release_all(&request_id, &value).await {
                    return response;
                }
            }
            ButtonAction::StopBatchRelease => self.stop_batch(&request_id).await,
            other => match other.deploy_type() {
                Some(deploy_type) => {
                    let branch = value.branch.as_deref().unwrap_or_default();
                    info!(branch = %branch, deploy_type = %deploy_type, "Triggering release");
                    self.launcher
                        .launch(service, branch, deploy_type, &request_id);
                }
                None => debug!("Action has no build to trigger"),
            },
        }

        let Some(state) = self.store.get(&request_id).await else {
            return CallbackResponse::info(MSG_REQUEST_EXPIRED);
        };

        CallbackResponse::success(MSG_SUCCESS, render_state(&state, &request_id))
    }

    /// Info toast with the card re-rendered from current state.
    async fn already_done(&self, request_id: &RequestId) -> CallbackResponse {
        let card = self
            .store
            .get(request_id)
            .await
            .and_then(|state| render_state(&state, request_id));
        CallbackResponse::info_with_card(MSG_ALREADY_DONE, card)
    }

    /// Launch every service carried by the batch button.
    ///
    /// A service with a gray action in the stored request gets a gray build,
    /// anything else an official one. The per-service gray counters are
    /// bumped but the buttons stay enabled. `batch_release_all` never reads
    /// as an official tag, so official counters are left alone.
    async fn release_all(
        &self,
        request_id: &RequestId,
        value: &ButtonValue,
    ) -> Result<(), CallbackResponse> {
        let Some(state) = self.store.get(request_id).await else {
            error!(request_id = %request_id, "Request not found for batch release");
            return Err(CallbackResponse::info(MSG_REQUEST_MISSING));
        };

        let branches = value.all_branches.clone().unwrap_or_default();
        for (service, branch) in &branches {
            let deploy_type = match state.original_request.service(service) {
                Some(spec) if spec.has_action(&ActionKind::Gray) => DeployType::Gray,
                _ => DeployType::Deploy,
            };
            info!(service = %service, branch = %branch, deploy_type = %deploy_type, "Batch triggering release");
            self.launcher
                .launch(service, branch, deploy_type, request_id);
        }

        for spec in &state.original_request.services {
            log_store_error(
                "increment gray count",
                self.store
                    .increment_action_count(
                        request_id,
                        &spec.name,
                        ButtonAction::GrayRelease.as_str(),
                    )
                    .await,
            );
        }

        Ok(())
    }

    /// End the batch phase: send the official follow-up card, lock the batch
    /// start button and disable every per-service button except official
    /// release.
    async fn stop_batch(&self, request_id: &RequestId) {
        let Some(state) = self.store.get(request_id).await else {
            warn!(request_id = %request_id, "Request not found for stop batch release");
            return;
        };

        self.send_follow_up(&state).await;

        log_store_error(
            "disable batch release",
            self.store
                .mark_action_disabled(
                    request_id,
                    BATCH_SERVICE,
                    ButtonAction::BatchReleaseAll.as_str(),
                )
                .await,
        );

        for spec in &state.original_request.services {
            let mut to_disable = vec![
                ButtonAction::Rollback,
                ButtonAction::Restart,
                ButtonAction::GrayRelease,
            ];
            for kind in spec.action_kinds() {
                let action = kind.button_action();
                if action != ButtonAction::OfficialRelease && !to_disable.contains(&action) {
                    to_disable.push(action);
                }
            }

            for action in &to_disable {
                log_store_error(
                    "disable service action",
                    self.store
                        .mark_action_disabled(request_id, &spec.name, action.as_str())
                        .await,
                );
            }
        }
    }

    /// Store the official-release follow-up under a new id and send it to
    /// the original receiver. Failures are logged.
    async fn send_follow_up(&self, state: &CardState) {
        let Some(follow_up) = state.official_follow_up() else {
            info!("All services already released, no follow-up card");
            return;
        };

        let new_id = RequestId::generate();
        let card = build_card(
            &follow_up,
            &new_id,
            &std::collections::BTreeMap::new(),
            &std::collections::BTreeMap::new(),
        );
        let has_receiver = follow_up.has_receiver();
        let (receive_id, receive_id_type) =
            (follow_up.receive_id.clone(), follow_up.receive_id_type.clone());

        if let Err(e) = self.store.save(&new_id, follow_up).await {
            error!(error = %e, request_id = %new_id, "Failed to store follow-up card");
            return;
        }
        info!(request_id = %new_id, "Follow-up card stored");

        let (Some(sender), Some(card), true) = (&self.sender, card, has_receiver) else {
            debug!("Follow-up card not sent: no sender, card or receiver");
            return;
        };

        let content = match serde_json::to_string(&card) {
            Ok(content) => content,
            Err(e) => {
                error!(error = %e, "Failed to serialize follow-up card");
                return;
            }
        };

        if let Err(e) = sender
            .send(
                &receive_id,
                &receive_id_type,
                MessageType::Interactive,
                &content,
            )
            .await
        {
            warn!(error = %e, receive_id = %receive_id, "Failed to send follow-up card");
        }
    }
}

fn log_store_error(operation: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        error!(error = %e, operation, "Card state update failed");
    }
}
