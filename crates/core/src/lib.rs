//! Chatops Core - Shared types library.
//!
//! This crate provides the domain types used across all chatops components:
//! - `server` - Card callbacks, release orchestration and OA polling
//! - `cli` - Command-line tools for migrations and card rendering
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Release requests, card state, action canonicalization and ids

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
