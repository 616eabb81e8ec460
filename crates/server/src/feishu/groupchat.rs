//! Release group provisioning.
//!
//! Group chats are created with a delegated user token when one is
//! available so the initiator owns the chat; otherwise the bot's tenant
//! token is used.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use super::client::FeishuClient;
use super::error::FeishuError;
use super::types::ApiEnvelope;
use crate::db::{FeishuTokenRepository, StoredUserToken};
use crate::services::scheduler::{CredentialRefresher, GroupProvisioner};

#[derive(Debug, Deserialize)]
struct UserTokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default, alias = "expire")]
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct CreatedChat {
    #[serde(default)]
    chat_id: String,
}

/// Creates release group chats and keeps the delegated user token fresh.
#[derive(Clone)]
pub struct GroupChatClient {
    inner: Arc<GroupChatInner>,
}

struct GroupChatInner {
    feishu: FeishuClient,
    pool: Option<PgPool>,
    token: RwLock<Option<StoredUserToken>>,
}

impl std::fmt::Debug for GroupChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChatClient")
            .field("feishu", &self.inner.feishu)
            .field("persistent", &self.inner.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl GroupChatClient {
    /// Create a client, optionally seeded with a refresh token.
    ///
    /// A seeded token has no access token until the first refresh.
    #[must_use]
    pub fn new(
        feishu: FeishuClient,
        pool: Option<PgPool>,
        refresh_token: Option<SecretString>,
    ) -> Self {
        let token = refresh_token.map(|refresh_token| StoredUserToken {
            access_token: SecretString::from(String::new()),
            refresh_token,
            expires_at: Utc::now(),
        });

        Self {
            inner: Arc::new(GroupChatInner {
                feishu,
                pool,
                token: RwLock::new(token),
            }),
        }
    }

    /// Replace the in-memory token with the persisted one, if any.
    pub async fn load_persisted(&self) {
        let Some(pool) = &self.inner.pool else {
            return;
        };

        match FeishuTokenRepository::new(pool).load().await {
            Ok(Some(token)) => {
                info!(expires_at = %token.expires_at, "Loaded persisted Feishu user token");
                *self.inner.token.write().await = Some(token);
            }
            Ok(None) => debug!("No persisted Feishu user token"),
            Err(e) => error!(error = %e, "Failed to load Feishu user token"),
        }
    }

    /// Store a new user token pair and persist it when a database is
    /// configured.
    pub async fn update_token(&self, access_token: String, refresh_token: String, expires_in: i64) {
        let token = StoredUserToken {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
            expires_at: Utc::now() + Duration::seconds(expires_in),
        };

        if let Some(pool) = &self.inner.pool
            && let Err(e) = FeishuTokenRepository::new(pool).save(&token).await
        {
            error!(error = %e, "Failed to persist Feishu user token");
        }

        *self.inner.token.write().await = Some(token);
        info!(expires_in, "Feishu user token updated");
    }

    /// A usable user access token, if one is held and not expired.
    pub async fn user_access_token(&self) -> Option<SecretString> {
        let guard = self.inner.token.read().await;
        guard
            .as_ref()
            .filter(|t| !t.access_token.expose_secret().is_empty() && t.expires_at > Utc::now())
            .map(|t| t.access_token.clone())
    }

    /// Exchange the held refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// Returns `FeishuError::Token` when no refresh token is held or Feishu
    /// rejects the refresh.
    #[instrument(skip(self))]
    pub async fn refresh_user_token(&self) -> Result<(), FeishuError> {
        let refresh_token = self
            .inner
            .token
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .filter(|t| !t.expose_secret().is_empty())
            .ok_or_else(|| FeishuError::Token("no refresh token available".to_string()))?;

        let feishu = &self.inner.feishu;
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": feishu.app_id(),
            "client_secret": feishu.app_secret().expose_secret(),
            "refresh_token": refresh_token.expose_secret(),
        });

        let response = feishu
            .http()
            .post(feishu.url("/authen/v2/oauth/token", &[])?)
            .json(&body)
            .send()
            .await
            .map_err(|e| FeishuError::Request(e.to_string()))?;

        let result: UserTokenResponse = response
            .json()
            .await
            .map_err(|e| FeishuError::Response(e.to_string()))?;

        if result.code != 0 || result.access_token.is_empty() {
            let reason = result
                .error_description
                .or(result.error)
                .unwrap_or_else(|| format!("code {}", result.code));
            error!(code = result.code, reason = %reason, "Feishu user token refresh failed");
            return Err(FeishuError::Token(reason));
        }

        // Feishu may not rotate the refresh token on every exchange
        let next_refresh = if result.refresh_token.is_empty() {
            refresh_token.expose_secret().to_string()
        } else {
            result.refresh_token
        };

        self.update_token(result.access_token, next_refresh, result.expires_in)
            .await;
        Ok(())
    }

    /// Create a private group chat and return its `chat_id`.
    ///
    /// `uuid` makes creation idempotent on Feishu's side. When `owner_id` is
    /// empty the chat is created without an owner or initial members.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or Feishu returns a non-zero code.
    #[instrument(skip(self, description))]
    pub async fn create_group_chat(
        &self,
        name: &str,
        description: &str,
        owner_id: &str,
        uuid: &str,
    ) -> Result<String, FeishuError> {
        let feishu = &self.inner.feishu;
        let token = match self.user_access_token().await {
            Some(token) => token,
            None => {
                debug!("No user token; creating group with tenant token");
                feishu.tenant_access_token().await?
            }
        };

        let mut body = serde_json::json!({
            "name": name,
            "description": description,
            "chat_mode": "group",
            "chat_type": "private",
        });
        if !owner_id.is_empty() {
            body["owner_id"] = owner_id.into();
            body["user_id_list"] = serde_json::json!([owner_id]);
        }

        let response = feishu
            .http()
            .post(feishu.url(
                "/im/v1/chats",
                &[("user_id_type", "user_id"), ("uuid", uuid)],
            )?)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| FeishuError::Request(e.to_string()))?;

        let result: ApiEnvelope<CreatedChat> = response
            .json()
            .await
            .map_err(|e| FeishuError::Response(e.to_string()))?;

        if result.code != 0 {
            error!(code = result.code, msg = %result.msg, "Feishu API error creating chat");
            return Err(FeishuError::Api {
                code: result.code,
                msg: result.msg,
            });
        }

        let chat_id = result
            .data
            .map(|d| d.chat_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FeishuError::Response("chat_id missing from response".to_string()))?;

        info!(chat_id = %chat_id, "Group chat created");
        Ok(chat_id)
    }
}

#[async_trait]
impl GroupProvisioner for GroupChatClient {
    async fn create_group(
        &self,
        name: &str,
        description: &str,
        owner_id: &str,
        uuid: &str,
    ) -> Result<String, FeishuError> {
        self.create_group_chat(name, description, owner_id, uuid)
            .await
    }
}

#[async_trait]
impl CredentialRefresher for GroupChatClient {
    async fn refresh(&self) -> Result<(), FeishuError> {
        if self.inner.token.read().await.is_none() {
            warn!("Skipping user token refresh: no token configured");
            return Ok(());
        }
        self.refresh_user_token().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn feishu(server: &MockServer) -> FeishuClient {
        FeishuClient::new(
            "cli_test".to_string(),
            SecretString::from("app-secret"),
            server.base_url(),
        )
    }

    #[tokio::test]
    async fn test_create_group_with_tenant_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/v3/tenant_access_token/internal");
            then.status(200).json_body(json!({
                "code": 0, "tenant_access_token": "t-1", "expire": 7200
            }));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/im/v1/chats")
                .query_param("uuid", "REQ-1")
                .header("authorization", "Bearer t-1")
                .json_body_includes(r#"{"owner_id": "u1", "user_id_list": ["u1"]}"#);
            then.status(200)
                .json_body(json!({"code": 0, "data": {"chat_id": "oc_9"}}));
        });

        let client = GroupChatClient::new(feishu(&server), None, None);
        let chat_id = client
            .create_group_chat("🚀 发布群 - X", "desc", "u1", "REQ-1")
            .await
            .unwrap();

        assert_eq!(chat_id, "oc_9");
        create.assert();
    }

    #[tokio::test]
    async fn test_refresh_then_create_with_user_token() {
        let server = MockServer::start();
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/authen/v2/oauth/token")
                .json_body_includes(r#"{"grant_type": "refresh_token", "refresh_token": "r-0"}"#);
            then.status(200).json_body(json!({
                "code": 0,
                "access_token": "u-1",
                "refresh_token": "r-1",
                "expires_in": 7200
            }));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/im/v1/chats")
                .header("authorization", "Bearer u-1");
            then.status(200)
                .json_body(json!({"code": 0, "data": {"chat_id": "oc_7"}}));
        });

        let client = GroupChatClient::new(
            feishu(&server),
            None,
            Some(SecretString::from("r-0")),
        );
        assert!(client.user_access_token().await.is_none());

        client.refresh().await.unwrap();
        assert_eq!(
            client.user_access_token().await.unwrap().expose_secret(),
            "u-1"
        );

        let chat_id = client.create_group("g", "d", "", "x").await.unwrap();
        assert_eq!(chat_id, "oc_7");
        refresh.assert();
        create.assert();
    }

    #[tokio::test]
    async fn test_refresh_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/authen/v2/oauth/token");
            then.status(400).json_body(json!({
                "code": 20037,
                "error": "invalid_grant",
                "error_description": "refresh token revoked"
            }));
        });

        let client = GroupChatClient::new(feishu(&server), None, Some(SecretString::from("r")));
        let result = client.refresh_user_token().await;

        assert!(matches!(result, Err(FeishuError::Token(msg)) if msg == "refresh token revoked"));
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_skipped() {
        let server = MockServer::start();
        let client = GroupChatClient::new(feishu(&server), None, None);

        assert!(client.refresh().await.is_ok());
        assert!(matches!(
            client.refresh_user_token().await,
            Err(FeishuError::Token(_))
        ));
    }
}
