// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP front door for the chatdify bridge.
//!
//! Receives Chatwoot webhooks, hands them to the dispatcher, and exposes the
//! conversation action endpoints used by Dify tools and operators.

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::AuthConfig;
pub use server::{router, serve, AppState, HealthState};
