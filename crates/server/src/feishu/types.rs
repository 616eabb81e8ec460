//! Feishu card and message types.
//!
//! These types cover the subset of the Feishu message card (v1) format the
//! release cards use, the card action callback payload and the API envelopes.
//!
//! See: <https://open.feishu.cn/document/common-capabilities/message-card>

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Cards
// =============================================================================

/// An interactive message card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    pub header: CardHeader,
    pub elements: Vec<CardElement>,
}

impl Card {
    /// All buttons on the card, in display order.
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                CardElement::Action { actions } => Some(actions),
                _ => None,
            })
            .flatten()
            .map(|ActionElement::Button(button)| button)
    }

    /// Find the button with this `value.service` and `value.action`.
    #[must_use]
    pub fn button(&self, service: &str, action: &str) -> Option<&Button> {
        self.buttons()
            .find(|b| b.value.service == service && b.value.action == action)
    }
}

/// Card header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardHeader {
    pub title: Text,
    pub template: HeaderTemplate,
}

/// Header color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderTemplate {
    Blue,
}

/// Card body elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum CardElement {
    /// Text block.
    Div { text: Text },
    /// Horizontal divider.
    Hr,
    /// Row of interactive elements.
    Action { actions: Vec<ActionElement> },
}

impl CardElement {
    /// Markdown text block.
    #[must_use]
    pub fn markdown(content: impl Into<String>) -> Self {
        Self::Div {
            text: Text::lark_md(content),
        }
    }
}

/// Text object types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Text {
    /// Plain text (no formatting).
    PlainText { content: String },
    /// Lark markdown.
    LarkMd { content: String },
}

impl Text {
    /// Create a plain text object.
    #[must_use]
    pub fn plain(content: impl Into<String>) -> Self {
        Self::PlainText {
            content: content.into(),
        }
    }

    /// Create a markdown text object.
    #[must_use]
    pub fn lark_md(content: impl Into<String>) -> Self {
        Self::LarkMd {
            content: content.into(),
        }
    }

    /// The text content regardless of format.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::PlainText { content } | Self::LarkMd { content } => content,
        }
    }
}

/// Interactive elements inside an action row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ActionElement {
    Button(Button),
}

/// A card button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: Text,
    #[serde(rename = "type")]
    pub button_type: ButtonType,
    pub disabled: bool,
    pub value: ButtonValue,
    pub confirm: Confirm,
}

/// Button style (affects color).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonType {
    Primary,
    Danger,
    Default,
}

/// Confirmation dialog shown before the click is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirm {
    pub title: Text,
    pub ok_text: Text,
    pub cancel_text: Text,
}

impl Confirm {
    /// Dialog with the standard confirm/cancel labels.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Text::plain(title),
            ok_text: Text::plain("确认"),
            cancel_text: Text::plain("取消"),
        }
    }
}

/// Context carried by a button and echoed back in the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonValue {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// `service -> first branch`, batch buttons only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_branches: Option<BTreeMap<String, String>>,
}

// =============================================================================
// Callback payloads
// =============================================================================

/// Top-level callback body. Covers both the URL verification handshake and
/// v2 event deliveries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub encrypt: Option<String>,
    #[serde(default)]
    pub header: Option<EventHeader>,
    #[serde(default)]
    pub event: Option<CardActionEvent>,
}

impl CallbackEnvelope {
    /// Verification token from either payload generation.
    #[must_use]
    pub fn verification_token(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|h| h.token.as_deref())
            .or(self.token.as_deref())
    }
}

/// Event header (schema 2.0).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// `card.action.trigger` event body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardActionEvent {
    #[serde(default)]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub action: Option<CardAction>,
}

/// The user who clicked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operator {
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// The clicked element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardAction {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Synchronous answer to a card action callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackResponse {
    pub toast: Toast,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<RawCard>,
}

impl CallbackResponse {
    /// Toast only, card left as is.
    #[must_use]
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            toast: Toast {
                kind: ToastKind::Info,
                content: content.into(),
            },
            card: None,
        }
    }

    /// Info toast plus a card refresh.
    #[must_use]
    pub fn info_with_card(content: impl Into<String>, card: Option<Card>) -> Self {
        Self {
            card: card.map(RawCard::new),
            ..Self::info(content)
        }
    }

    /// Success toast plus a card refresh.
    #[must_use]
    pub fn success(content: impl Into<String>, card: Option<Card>) -> Self {
        Self {
            toast: Toast {
                kind: ToastKind::Success,
                content: content.into(),
            },
            card: card.map(RawCard::new),
        }
    }
}

/// Transient acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    #[serde(rename = "type")]
    pub kind: ToastKind,
    pub content: String,
}

/// Toast style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Card replacement in a callback response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawCard {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Card,
}

impl RawCard {
    #[must_use]
    pub const fn new(data: Card) -> Self {
        Self { kind: "raw", data }
    }
}

// =============================================================================
// Messages and API envelopes
// =============================================================================

/// `msg_type` of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Interactive,
}

impl MessageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Interactive => "interactive",
        }
    }
}

/// Serialized `content` of a text message.
#[must_use]
pub fn text_content(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

/// Body of `im/v1/messages`.
#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub receive_id: &'a str,
    pub msg_type: MessageType,
    pub content: &'a str,
}

/// Common `{code, msg, data}` response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

/// `auth/v3/tenant_access_token/internal` response.
#[derive(Debug, Deserialize)]
pub(crate) struct TenantTokenResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub tenant_access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expire: u64,
}

/// `contact/v3/users` page.
#[derive(Debug, Deserialize)]
pub(crate) struct UserPage {
    #[serde(default)]
    pub items: Vec<DirectoryUser>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DirectoryUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: String,
}
