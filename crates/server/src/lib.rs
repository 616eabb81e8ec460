//! Chatops server library.
//!
//! Release cards in Feishu, driven by button callbacks that trigger and
//! monitor Jenkins builds, plus an OA poller that turns approved release
//! requests into cards.
//!
//! # Components
//!
//! - [`store`] - Card state per request id, cached over Postgres or files
//! - [`card`] - Card rendering from request state
//! - [`services`] - Callback state machine, build orchestration, OA scheduler
//! - [`feishu`], [`jenkins`], [`oa`] - External system adapters
//! - [`routes`] - HTTP surface

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod card;
pub mod config;
pub mod db;
pub mod error;
pub mod feishu;
pub mod jenkins;
pub mod oa;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
