//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::config::{SenderKind, ServerConfig};
use crate::feishu::{FeishuClient, GroupChatClient, Sender, WebhookSender};
use crate::jenkins::{JenkinsClient, JenkinsError};
use crate::oa::OaSource;
use crate::services::{
    CallbackService, CardService, CredentialRefresher, GroupProvisioner, PollingScheduler,
    ReleaseLauncher, ReleaseOrchestrator, SchedulerOptions, UpstreamSource,
};
use crate::store::{CardStateBackend, FileCardStateBackend, PgCardStateBackend, RequestStore};

/// Errors that can occur while assembling the application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Jenkins client error: {0}")]
    Jenkins(#[from] JenkinsError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// The replaceable collaborators behind the HTTP surface.
pub struct Capabilities {
    pub store: RequestStore,
    pub sender: Arc<dyn Sender>,
    pub launcher: Arc<dyn ReleaseLauncher>,
    pub source: Arc<dyn UpstreamSource>,
    pub group_chat: GroupChatClient,
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pool: PgPool,
    feishu: FeishuClient,
    store: RequestStore,
    sender: Arc<dyn Sender>,
    cards: CardService,
    callback: CallbackService,
    group_chat: GroupChatClient,
    scheduler: PollingScheduler,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the production state: Feishu and Jenkins clients from config,
    /// card state in Postgres (or `CARD_STATE_DIR`), OA records in Postgres.
    ///
    /// # Errors
    ///
    /// Returns an error if the Jenkins client cannot be built or the webhook
    /// sender is selected without a webhook URL.
    pub fn new(config: ServerConfig, pool: PgPool) -> Result<Self, StateError> {
        let feishu = FeishuClient::from_config(&config.feishu);

        let backend: Arc<dyn CardStateBackend> = match &config.store.state_dir {
            Some(dir) => Arc::new(FileCardStateBackend::new(dir.clone())),
            None => Arc::new(PgCardStateBackend::new(pool.clone())),
        };
        let store = RequestStore::new(backend, config.store.cache_capacity);

        let sender: Arc<dyn Sender> = match config.feishu.sender {
            SenderKind::Api => Arc::new(feishu.clone()),
            SenderKind::Webhook => {
                let webhook = config.feishu.webhook.as_ref().ok_or_else(|| {
                    StateError::Config("webhook sender selected without FEISHU_WEBHOOK_URL".into())
                })?;
                Arc::new(WebhookSender::from_config(webhook))
            }
        };

        let jenkins = JenkinsClient::from_config(&config.jenkins)?;
        let launcher = Arc::new(ReleaseOrchestrator::new(
            store.clone(),
            Arc::new(jenkins),
            Arc::clone(&sender),
            config.jenkins.start_timeout,
        ));

        let group_chat = GroupChatClient::new(
            feishu.clone(),
            Some(pool.clone()),
            config.feishu.refresh_token.clone(),
        );

        let capabilities = Capabilities {
            store,
            sender,
            launcher,
            source: Arc::new(OaSource::new(pool.clone(), feishu.clone())),
            group_chat,
        };

        Ok(Self::with_capabilities(config, pool, feishu, capabilities))
    }

    /// Build the state around explicitly supplied collaborators.
    #[must_use]
    pub fn with_capabilities(
        config: ServerConfig,
        pool: PgPool,
        feishu: FeishuClient,
        capabilities: Capabilities,
    ) -> Self {
        let Capabilities {
            store,
            sender,
            launcher,
            source,
            group_chat,
        } = capabilities;

        let cards = CardService::new(store.clone(), Arc::clone(&sender));
        let callback = CallbackService::new(store.clone(), launcher, Some(Arc::clone(&sender)));

        // Group provisioning needs a delegated user token to start from.
        let provisioning = config.feishu.refresh_token.is_some();
        let options = SchedulerOptions {
            provisioner: provisioning
                .then(|| Arc::new(group_chat.clone()) as Arc<dyn GroupProvisioner>),
            refresher: provisioning
                .then(|| Arc::new(group_chat.clone()) as Arc<dyn CredentialRefresher>),
            fallback_receiver: config.scheduler.fallback_receiver.clone(),
        };
        let scheduler = PollingScheduler::new(source, cards.clone(), options);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                feishu,
                store,
                sender,
                cards,
                callback,
                group_chat,
                scheduler,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Feishu API client, also used for callback verification.
    #[must_use]
    pub fn feishu(&self) -> &FeishuClient {
        &self.inner.feishu
    }

    #[must_use]
    pub fn store(&self) -> &RequestStore {
        &self.inner.store
    }

    #[must_use]
    pub fn sender(&self) -> &Arc<dyn Sender> {
        &self.inner.sender
    }

    #[must_use]
    pub fn cards(&self) -> &CardService {
        &self.inner.cards
    }

    #[must_use]
    pub fn callback(&self) -> &CallbackService {
        &self.inner.callback
    }

    #[must_use]
    pub fn group_chat(&self) -> &GroupChatClient {
        &self.inner.group_chat
    }

    #[must_use]
    pub fn scheduler(&self) -> &PollingScheduler {
        &self.inner.scheduler
    }
}
