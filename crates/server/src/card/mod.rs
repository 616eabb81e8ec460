//! Release card rendering.
//!
//! Turns a [`ReleaseRequest`](chatops_core::ReleaseRequest) and its button
//! state into a Feishu [`Card`](crate::feishu::Card). Rendering is pure; the
//! callers own storage and delivery.

mod renderer;

pub use renderer::{build_card, render_state};
