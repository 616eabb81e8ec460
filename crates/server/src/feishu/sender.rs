//! Outbound message delivery.
//!
//! Two transports implement [`Sender`]: the bot API through [`FeishuClient`]
//! and a group custom-bot webhook through [`WebhookSender`].

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{debug, error, instrument};

use super::client::FeishuClient;
use super::error::FeishuError;
use super::types::{ApiEnvelope, MessageType, text_content};
use crate::config::WebhookConfig;

/// Delivers text and card messages to a Feishu receiver.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send a message whose `content` is a JSON-encoded string.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails.
    async fn send(
        &self,
        receive_id: &str,
        receive_id_type: &str,
        msg_type: MessageType,
        content: &str,
    ) -> Result<(), FeishuError>;

    /// Send a plain text message.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails.
    async fn send_text(
        &self,
        receive_id: &str,
        receive_id_type: &str,
        text: &str,
    ) -> Result<(), FeishuError> {
        self.send(
            receive_id,
            receive_id_type,
            MessageType::Text,
            &text_content(text),
        )
        .await
    }
}

#[async_trait]
impl Sender for FeishuClient {
    async fn send(
        &self,
        receive_id: &str,
        receive_id_type: &str,
        msg_type: MessageType,
        content: &str,
    ) -> Result<(), FeishuError> {
        self.send_message(receive_id, receive_id_type, msg_type, content)
            .await
    }
}

/// Custom-bot webhook transport.
///
/// The webhook is bound to one group, so receiver fields are ignored.
#[derive(Clone)]
pub struct WebhookSender {
    client: Client,
    url: SecretString,
    secret: Option<SecretString>,
}

impl std::fmt::Debug for WebhookSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSender")
            .field("url", &"[REDACTED]")
            .field("signed", &self.secret.is_some())
            .finish_non_exhaustive()
    }
}

impl WebhookSender {
    /// Create a webhook sender.
    #[must_use]
    pub fn new(url: SecretString, secret: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            url,
            secret,
        }
    }

    /// Create a webhook sender from configuration.
    #[must_use]
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.url.clone(), config.secret.clone())
    }

    fn payload(
        &self,
        msg_type: MessageType,
        content: &str,
        timestamp: i64,
    ) -> Result<serde_json::Value, FeishuError> {
        let parsed: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| FeishuError::InvalidPayload(e.to_string()))?;

        let mut payload = serde_json::Map::new();
        payload.insert("msg_type".to_string(), msg_type.as_str().into());
        match msg_type {
            MessageType::Interactive => payload.insert("card".to_string(), parsed),
            MessageType::Text => payload.insert("content".to_string(), parsed),
        };

        if let Some(secret) = &self.secret {
            payload.insert("timestamp".to_string(), timestamp.to_string().into());
            payload.insert(
                "sign".to_string(),
                webhook_sign(timestamp, secret.expose_secret())?.into(),
            );
        }

        Ok(serde_json::Value::Object(payload))
    }
}

#[async_trait]
impl Sender for WebhookSender {
    #[instrument(skip(self, content), fields(msg_type = msg_type.as_str()))]
    async fn send(
        &self,
        _receive_id: &str,
        _receive_id_type: &str,
        msg_type: MessageType,
        content: &str,
    ) -> Result<(), FeishuError> {
        let payload = self.payload(msg_type, content, chrono::Utc::now().timestamp())?;

        let response = self
            .client
            .post(self.url.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| FeishuError::Request(e.to_string()))?;

        let result: ApiEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| FeishuError::Response(e.to_string()))?;

        if result.code != 0 {
            error!(code = result.code, msg = %result.msg, "Feishu webhook rejected message");
            return Err(FeishuError::Api {
                code: result.code,
                msg: result.msg,
            });
        }

        debug!("Message sent via webhook");
        Ok(())
    }
}

/// Webhook signature: base64 HMAC-SHA256 keyed with `"{timestamp}\n{secret}"`
/// over an empty message.
fn webhook_sign(timestamp: i64, secret: &str) -> Result<String, FeishuError> {
    let key = format!("{timestamp}\n{secret}");
    let mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| FeishuError::Config(e.to_string()))?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload_shapes() {
        let sender = WebhookSender::new(SecretString::from("http://hook"), None);

        let text = sender
            .payload(MessageType::Text, r#"{"text":"hi"}"#, 0)
            .unwrap();
        assert_eq!(text, json!({"msg_type": "text", "content": {"text": "hi"}}));

        let card = sender
            .payload(MessageType::Interactive, r#"{"elements":[]}"#, 0)
            .unwrap();
        assert_eq!(
            card,
            json!({"msg_type": "interactive", "card": {"elements": []}})
        );
    }

    #[test]
    fn test_payload_is_signed_when_secret_set() {
        let sender = WebhookSender::new(
            SecretString::from("http://hook"),
            Some(SecretString::from("s3cret")),
        );
        let payload = sender
            .payload(MessageType::Text, r#"{"text":"hi"}"#, 1_700_000_000)
            .unwrap();

        assert_eq!(payload["timestamp"], "1700000000");
        assert_eq!(
            payload["sign"],
            webhook_sign(1_700_000_000, "s3cret").unwrap()
        );
    }

    #[test]
    fn test_payload_rejects_invalid_json() {
        let sender = WebhookSender::new(SecretString::from("http://hook"), None);
        assert!(matches!(
            sender.payload(MessageType::Text, "not json", 0),
            Err(FeishuError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_send_text_via_webhook() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST)
                .path("/hook")
                .json_body(json!({"msg_type": "text", "content": {"text": "部署完成"}}));
            then.status(200).json_body(json!({"code": 0, "msg": "success"}));
        });

        let sender = WebhookSender::new(SecretString::from(server.url("/hook")), None);
        sender.send_text("", "", "部署完成").await.unwrap();

        hook.assert();
    }

    #[tokio::test]
    async fn test_webhook_error_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(200)
                .json_body(json!({"code": 19021, "msg": "sign match fail"}));
        });

        let sender = WebhookSender::new(SecretString::from(server.url("/hook")), None);
        let result = sender.send_text("", "", "x").await;

        assert!(matches!(result, Err(FeishuError::Api { code: 19021, .. })));
    }
}
