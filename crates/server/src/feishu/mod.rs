//! Feishu (Lark) integration.
//!
//! - [`FeishuClient`]: tenant token, bot messages, directory lookup and
//!   callback verification
//! - [`Sender`]: the outbound message seam, implemented by the bot API and
//!   by [`WebhookSender`]
//! - [`GroupChatClient`]: release group provisioning with a delegated user
//!   token

mod client;
mod error;
mod groupchat;
mod sender;
pub mod types;

pub use client::FeishuClient;
pub use error::FeishuError;
pub use groupchat::GroupChatClient;
pub use sender::{Sender, WebhookSender};
pub use types::{
    ButtonValue, CallbackEnvelope, CallbackResponse, Card, MessageType, text_content,
};
