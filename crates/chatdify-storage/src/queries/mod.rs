// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the conversation state store and the task queue.

pub mod conversations;
pub mod tasks;
