//! Card distribution: store state, render, send.

use std::collections::BTreeMap;
use std::sync::Arc;

use chatops_core::{ReleaseRequest, RequestId};
use thiserror::Error;
use tracing::{info, instrument};

use crate::card::build_card;
use crate::feishu::{FeishuError, MessageType, Sender};
use crate::store::{RequestStore, StoreError};

/// Errors that can occur when distributing a card.
#[derive(Debug, Error)]
pub enum CardError {
    /// `receive_id` or `receive_id_type` is empty.
    #[error("receive_id and receive_id_type are required")]
    MissingReceiver,

    /// The request does not render (no services, or the first service lacks
    /// an object id, actions or branches).
    #[error("card request is invalid: services[0] needs object_id, actions and branches")]
    InvalidCard,

    /// Card state could not be persisted.
    #[error("failed to store card state: {0}")]
    Store(#[from] StoreError),

    /// Card could not be serialized.
    #[error("failed to serialize card: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Delivery failed.
    #[error("failed to send card: {0}")]
    Send(#[from] FeishuError),
}

/// Creates and delivers release cards.
#[derive(Clone)]
pub struct CardService {
    store: RequestStore,
    sender: Arc<dyn Sender>,
}

impl std::fmt::Debug for CardService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardService")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CardService {
    #[must_use]
    pub fn new(store: RequestStore, sender: Arc<dyn Sender>) -> Self {
        Self { store, sender }
    }

    /// The sender cards are delivered through.
    #[must_use]
    pub fn sender(&self) -> &Arc<dyn Sender> {
        &self.sender
    }

    /// Store a new card state under a fresh id, render it and send it to the
    /// request's receiver.
    ///
    /// Nothing is stored when the request fails to render.
    ///
    /// # Errors
    ///
    /// Returns `CardError::MissingReceiver` or `CardError::InvalidCard` for
    /// bad input, otherwise the storage or delivery failure.
    #[instrument(skip(self, request), fields(services = request.services.len()))]
    pub async fn send_card(&self, request: ReleaseRequest) -> Result<RequestId, CardError> {
        if !request.has_receiver() {
            return Err(CardError::MissingReceiver);
        }

        let request_id = RequestId::generate();
        let card = build_card(
            &request.display_view(),
            &request_id,
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .ok_or(CardError::InvalidCard)?;
        let content = serde_json::to_string(&card)?;

        let receive_id = request.receive_id.clone();
        let receive_id_type = request.receive_id_type.clone();
        self.store.save(&request_id, request).await?;

        self.sender
            .send(
                &receive_id,
                &receive_id_type,
                MessageType::Interactive,
                &content,
            )
            .await?;

        info!(request_id = %request_id, receive_id = %receive_id, "Release card sent");
        Ok(request_id)
    }

    /// Send pre-serialized content without touching card state.
    ///
    /// # Errors
    ///
    /// Returns error if the receiver is missing or delivery fails.
    pub async fn send_raw(
        &self,
        receive_id: &str,
        receive_id_type: &str,
        msg_type: MessageType,
        content: &str,
    ) -> Result<(), CardError> {
        if receive_id.is_empty() || receive_id_type.is_empty() {
            return Err(CardError::MissingReceiver);
        }
        self.sender
            .send(receive_id, receive_id_type, msg_type, content)
            .await?;
        Ok(())
    }
}
