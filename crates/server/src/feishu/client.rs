//! Feishu Open API client.
//!
//! Provides tenant token management, message sending, directory lookup and
//! callback verification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::{debug, error, instrument};
use url::Url;

use super::error::FeishuError;
use super::types::{
    ApiEnvelope, MessageType, SendMessageRequest, TenantTokenResponse, UserPage,
};
use crate::config::FeishuConfig;

/// Tenant tokens are refreshed this long before Feishu expires them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(600);
const TENANT_TOKEN_KEY: &str = "tenant";
/// Maximum age of a signed callback.
const CALLBACK_MAX_AGE_SECS: i64 = 300;
const DIRECTORY_PAGE_SIZE: &str = "50";
const DIRECTORY_MAX_PAGES: usize = 20;

#[derive(Clone)]
struct TenantToken {
    token: SecretString,
    ttl: Duration,
}

struct TenantTokenExpiry;

impl moka::Expiry<&'static str, TenantToken> for TenantTokenExpiry {
    fn expire_after_create(
        &self,
        _key: &&'static str,
        value: &TenantToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Feishu API client.
///
/// Cheap to clone; clones share the HTTP client and the token cache.
#[derive(Clone)]
pub struct FeishuClient {
    inner: Arc<FeishuClientInner>,
}

struct FeishuClientInner {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: SecretString,
    verification_token: Option<SecretString>,
    encrypt_key: Option<SecretString>,
    tenant_token: Cache<&'static str, TenantToken>,
}

impl std::fmt::Debug for FeishuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuClient")
            .field("base_url", &self.inner.base_url)
            .field("app_id", &self.inner.app_id)
            .field("app_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl FeishuClient {
    /// Create a client without callback verification.
    #[must_use]
    pub fn new(app_id: String, app_secret: SecretString, base_url: impl Into<String>) -> Self {
        Self::build(app_id, app_secret, base_url.into(), None, None)
    }

    /// Create a client from configuration.
    #[must_use]
    pub fn from_config(config: &FeishuConfig) -> Self {
        Self::build(
            config.app_id.clone(),
            config.app_secret.clone(),
            config.base_url.clone(),
            config.verification_token.clone(),
            config.encrypt_key.clone(),
        )
    }

    /// Set the secrets used to authenticate inbound callbacks.
    #[must_use]
    pub fn with_callback_secrets(
        self,
        verification_token: Option<SecretString>,
        encrypt_key: Option<SecretString>,
    ) -> Self {
        Self::build(
            self.inner.app_id.clone(),
            self.inner.app_secret.clone(),
            self.inner.base_url.clone(),
            verification_token,
            encrypt_key,
        )
    }

    fn build(
        app_id: String,
        app_secret: SecretString,
        base_url: String,
        verification_token: Option<SecretString>,
        encrypt_key: Option<SecretString>,
    ) -> Self {
        let tenant_token = Cache::builder()
            .max_capacity(1)
            .expire_after(TenantTokenExpiry)
            .build();

        Self {
            inner: Arc::new(FeishuClientInner {
                client: Client::new(),
                base_url: base_url.trim_end_matches('/').to_string(),
                app_id,
                app_secret,
                verification_token,
                encrypt_key,
                tenant_token,
            }),
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.inner.client
    }

    pub(crate) fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    pub(crate) fn app_secret(&self) -> &SecretString {
        &self.inner.app_secret
    }

    /// Build an API URL from a path below the Open API base.
    pub(crate) fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, FeishuError> {
        Url::parse_with_params(&format!("{}{path}", self.inner.base_url), query)
            .map_err(|e| FeishuError::Config(format!("invalid API URL: {e}")))
    }

    /// Get a tenant access token, fetching a new one when the cached token
    /// is missing or close to expiry. Concurrent callers share one fetch.
    ///
    /// # Errors
    ///
    /// Returns `FeishuError::Token` if the token endpoint fails.
    pub async fn tenant_access_token(&self) -> Result<SecretString, FeishuError> {
        self.inner
            .tenant_token
            .try_get_with(TENANT_TOKEN_KEY, self.fetch_tenant_token())
            .await
            .map(|cached| cached.token)
            .map_err(|e| FeishuError::Token(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn fetch_tenant_token(&self) -> Result<TenantToken, FeishuError> {
        let body = serde_json::json!({
            "app_id": self.inner.app_id,
            "app_secret": self.inner.app_secret.expose_secret(),
        });

        let response = self
            .inner
            .client
            .post(self.url("/auth/v3/tenant_access_token/internal", &[])?)
            .json(&body)
            .send()
            .await
            .map_err(|e| FeishuError::Request(e.to_string()))?;

        let result: TenantTokenResponse = response
            .json()
            .await
            .map_err(|e| FeishuError::Response(e.to_string()))?;

        if result.code != 0 || result.tenant_access_token.is_empty() {
            error!(code = result.code, msg = %result.msg, "Feishu tenant token request failed");
            return Err(FeishuError::Api {
                code: result.code,
                msg: result.msg,
            });
        }

        let lifetime = Duration::from_secs(result.expire);
        let ttl = lifetime
            .checked_sub(TOKEN_EXPIRY_MARGIN)
            .unwrap_or(lifetime / 2);

        debug!(ttl_secs = ttl.as_secs(), "Tenant access token refreshed");

        Ok(TenantToken {
            token: SecretString::from(result.tenant_access_token),
            ttl,
        })
    }

    /// Send a message through the bot API.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or Feishu returns a non-zero code.
    #[instrument(skip(self, content), fields(receive_id = %receive_id, msg_type = msg_type.as_str()))]
    pub async fn send_message(
        &self,
        receive_id: &str,
        receive_id_type: &str,
        msg_type: MessageType,
        content: &str,
    ) -> Result<(), FeishuError> {
        let token = self.tenant_access_token().await?;
        let body = SendMessageRequest {
            receive_id,
            msg_type,
            content,
        };

        let response = self
            .inner
            .client
            .post(self.url("/im/v1/messages", &[("receive_id_type", receive_id_type)])?)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| FeishuError::Request(e.to_string()))?;

        let result: ApiEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| FeishuError::Response(e.to_string()))?;

        if result.code != 0 {
            error!(code = result.code, msg = %result.msg, "Feishu API error sending message");
            return Err(FeishuError::Api {
                code: result.code,
                msg: result.msg,
            });
        }

        debug!("Message sent to Feishu");
        Ok(())
    }

    /// Find a user's `user_id` by display name.
    ///
    /// # Errors
    ///
    /// Returns `FeishuError::UserNotFound` when no user matches, or a request
    /// error if the directory cannot be read.
    #[instrument(skip(self))]
    pub async fn find_user_id_by_name(&self, name: &str) -> Result<String, FeishuError> {
        let token = self.tenant_access_token().await?;
        let mut page_token: Option<String> = None;

        for _ in 0..DIRECTORY_MAX_PAGES {
            let mut query = vec![
                ("page_size", DIRECTORY_PAGE_SIZE),
                ("user_id_type", "user_id"),
                ("department_id_type", "open_department_id"),
            ];
            if let Some(page) = page_token.as_deref() {
                query.push(("page_token", page));
            }

            let response = self
                .inner
                .client
                .get(self.url("/contact/v3/users", &query)?)
                .bearer_auth(token.expose_secret())
                .send()
                .await
                .map_err(|e| FeishuError::Request(e.to_string()))?;

            let result: ApiEnvelope<UserPage> = response
                .json()
                .await
                .map_err(|e| FeishuError::Response(e.to_string()))?;

            if result.code != 0 {
                error!(code = result.code, msg = %result.msg, "Feishu directory lookup failed");
                return Err(FeishuError::Api {
                    code: result.code,
                    msg: result.msg,
                });
            }

            let Some(page) = result.data else {
                break;
            };

            if let Some(user) = page
                .items
                .into_iter()
                .find(|u| u.name == name && !u.user_id.is_empty())
            {
                debug!(user_id = %user.user_id, "Directory user found");
                return Ok(user.user_id);
            }

            match page.page_token {
                Some(next) if page.has_more && !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Err(FeishuError::UserNotFound(name.to_string()))
    }

    /// Check the verification token carried in a callback body.
    ///
    /// Passes when no verification token is configured.
    ///
    /// # Errors
    ///
    /// Returns `FeishuError::InvalidSignature` on mismatch.
    pub fn verify_token(&self, token: Option<&str>) -> Result<(), FeishuError> {
        let Some(expected) = &self.inner.verification_token else {
            return Ok(());
        };

        match token {
            Some(token) if constant_time_compare(expected.expose_secret(), token) => Ok(()),
            _ => Err(FeishuError::InvalidSignature(
                "Verification token mismatch".to_string(),
            )),
        }
    }

    /// Whether callbacks must carry an `X-Lark-Signature`.
    #[must_use]
    pub fn requires_signature(&self) -> bool {
        self.inner.encrypt_key.is_some()
    }

    /// Verify a callback signature.
    ///
    /// The signature is the hex SHA-256 of
    /// `timestamp + nonce + encrypt_key + body`. Passes when no encrypt key
    /// is configured.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - The `X-Lark-Request-Timestamp` header value
    /// * `nonce` - The `X-Lark-Request-Nonce` header value
    /// * `body` - The raw request body
    /// * `signature` - The `X-Lark-Signature` header value
    ///
    /// # Errors
    ///
    /// Returns error if the timestamp is stale or the signature does not match.
    #[instrument(skip(self, body, signature))]
    pub fn verify_signature(
        &self,
        timestamp: &str,
        nonce: &str,
        body: &str,
        signature: &str,
    ) -> Result<(), FeishuError> {
        let Some(encrypt_key) = &self.inner.encrypt_key else {
            return Ok(());
        };

        // Check timestamp to prevent replay attacks (5 minutes)
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| FeishuError::InvalidSignature("Invalid timestamp".to_string()))?;
        let now = chrono::Utc::now().timestamp();
        if (now - ts).abs() > CALLBACK_MAX_AGE_SECS {
            return Err(FeishuError::InvalidSignature(
                "Request timestamp too old".to_string(),
            ));
        }

        let expected = callback_signature(timestamp, nonce, encrypt_key.expose_secret(), body);
        if !constant_time_compare(&expected, signature) {
            return Err(FeishuError::InvalidSignature(
                "Signature mismatch".to_string(),
            ));
        }

        debug!("Feishu signature verified");
        Ok(())
    }
}

/// Hex SHA-256 of the concatenated callback fields.
pub(crate) fn callback_signature(timestamp: &str, nonce: &str, key: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(key.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn client(base_url: &str) -> FeishuClient {
        FeishuClient::new(
            "cli_test".to_string(),
            SecretString::from("app-secret"),
            base_url,
        )
    }

    fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST)
                .path("/auth/v3/tenant_access_token/internal")
                .json_body(json!({"app_id": "cli_test", "app_secret": "app-secret"}));
            then.status(200).json_body(json!({
                "code": 0,
                "msg": "ok",
                "tenant_access_token": "t-123",
                "expire": 7200
            }));
        })
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    #[tokio::test]
    async fn test_tenant_token_is_cached() {
        let server = MockServer::start();
        let token_mock = mock_token(&server);
        let client = client(&server.base_url());

        let first = client.tenant_access_token().await.unwrap();
        let second = client.tenant_access_token().await.unwrap();

        assert_eq!(first.expose_secret(), "t-123");
        assert_eq!(second.expose_secret(), "t-123");
        token_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_send_message() {
        let server = MockServer::start();
        mock_token(&server);
        let send_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/im/v1/messages")
                .query_param("receive_id_type", "chat_id")
                .header("authorization", "Bearer t-123")
                .json_body(json!({
                    "receive_id": "oc_1",
                    "msg_type": "text",
                    "content": "{\"text\":\"hi\"}"
                }));
            then.status(200)
                .json_body(json!({"code": 0, "msg": "success", "data": {}}));
        });

        client(&server.base_url())
            .send_message("oc_1", "chat_id", MessageType::Text, "{\"text\":\"hi\"}")
            .await
            .unwrap();

        send_mock.assert();
    }

    #[tokio::test]
    async fn test_send_message_api_error() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/im/v1/messages");
            then.status(400)
                .json_body(json!({"code": 230002, "msg": "bot not in chat"}));
        });

        let result = client(&server.base_url())
            .send_message("oc_1", "chat_id", MessageType::Text, "{}")
            .await;

        assert!(matches!(result, Err(FeishuError::Api { code: 230002, .. })));
    }

    #[tokio::test]
    async fn test_find_user_id_by_name_pages() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(GET)
                .path("/contact/v3/users")
                .query_param_missing("page_token");
            then.status(200).json_body(json!({
                "code": 0,
                "data": {
                    "items": [{"name": "李四", "user_id": "u2"}],
                    "has_more": true,
                    "page_token": "p2"
                }
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/contact/v3/users")
                .query_param("page_token", "p2");
            then.status(200).json_body(json!({
                "code": 0,
                "data": {"items": [{"name": "张三", "user_id": "u3"}], "has_more": false}
            }));
        });

        let client = client(&server.base_url());
        assert_eq!(client.find_user_id_by_name("张三").await.unwrap(), "u3");
        assert!(matches!(
            client.find_user_id_by_name("王五").await,
            Err(FeishuError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_verify_token() {
        let open = client("http://localhost");
        assert!(open.verify_token(None).is_ok());

        let guarded = open.with_callback_secrets(Some(SecretString::from("vt")), None);
        assert!(guarded.verify_token(Some("vt")).is_ok());
        assert!(guarded.verify_token(Some("other")).is_err());
        assert!(guarded.verify_token(None).is_err());
    }

    #[test]
    fn test_signature_verification() {
        let client = client("http://localhost")
            .with_callback_secrets(None, Some(SecretString::from("encrypt-key")));
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let body = r#"{"schema":"2.0"}"#;
        let signature = callback_signature(&timestamp, "nonce", "encrypt-key", body);

        assert!(client.requires_signature());
        assert!(
            client
                .verify_signature(&timestamp, "nonce", body, &signature)
                .is_ok()
        );
        assert!(matches!(
            client.verify_signature(&timestamp, "nonce", body, "deadbeef"),
            Err(FeishuError::InvalidSignature(_))
        ));
        assert!(matches!(
            client.verify_signature("1000", "nonce", body, &signature),
            Err(FeishuError::InvalidSignature(_))
        ));
    }
}
