// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The webhook-to-AI-to-action core of chatdify.
//!
//! - [`normalizer`] turns webhook payloads into canonical events.
//! - [`dispatcher`] enqueues them as durable, idempotent tasks.
//! - [`worker`] executes tasks with retry, backoff, and time limits.
//! - [`pipeline`] is the per-event state machine that talks to the state
//!   store, the completion provider, and Chatwoot.
//! - [`actions`] exposes validated direct conversation actions.

pub mod actions;
pub mod context;
pub mod dispatcher;
pub mod normalizer;
pub mod pipeline;
pub mod retry;
pub mod shutdown;
pub mod tasks;
pub mod teams;
pub mod worker;

pub use actions::{ActionService, AssignTarget};
pub use dispatcher::{Dispatcher, SubmitOutcome};
pub use normalizer::{EventNormalizer, Normalized, RejectReason, Rejection};
pub use pipeline::{
    DispatchPipeline, EscalationReason, EscalationSettings, MutationReport, PipelineSettings,
    RunOutcome, RunReport, RunState, SkipReason,
};
pub use retry::RetryPolicy;
pub use tasks::BridgeTask;
pub use teams::TeamDirectory;
pub use worker::{TaskDisposition, TaskExecutor, WorkerPool, WorkerSettings};
