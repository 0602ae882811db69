// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for chatdify integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic tests without a Chatwoot or Dify instance.
//!
//! # Components
//!
//! - [`MockChatwoot`] - Mock conversation gateway with call recording and fault injection
//! - [`MockDify`] - Mock completion provider with queued responses
//! - [`TestHarness`] - Full bridge over temp SQLite with both mocks

pub mod harness;
pub mod mock_chatwoot;
pub mod mock_dify;

pub use harness::{payloads, TestHarness, TestHarnessBuilder};
pub use mock_chatwoot::{ChatwootCall, Fault, MockChatwoot};
pub use mock_dify::MockDify;
