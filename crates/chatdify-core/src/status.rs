// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation status state machine and write policy.
//!
//! The edge set is an explicit table so that the store can check it
//! mechanically. [`StatusPolicy`] is the separate allowlist of statuses the
//! bridge may write at all.

use std::collections::BTreeSet;

use crate::error::BridgeError;
use crate::types::ConversationStatus;

use ConversationStatus::{Open, Pending, Resolved, Snoozed};

/// Every allowed `(from, to)` status transition. Anything absent is rejected.
pub const ALLOWED_TRANSITIONS: &[(ConversationStatus, ConversationStatus)] = &[
    (Open, Pending),
    (Pending, Open),
    (Open, Resolved),
    (Pending, Resolved),
    (Resolved, Open),
    (Open, Snoozed),
    (Pending, Snoozed),
    (Snoozed, Open),
];

/// Whether `from -> to` is in the transition table.
pub fn is_allowed_transition(from: ConversationStatus, to: ConversationStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Statuses from which `to` may be reached.
pub fn sources_for(to: ConversationStatus) -> Vec<ConversationStatus> {
    ALLOWED_TRANSITIONS
        .iter()
        .filter(|(_, target)| *target == to)
        .map(|(from, _)| *from)
        .collect()
}

/// The set of statuses this bridge is permitted to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    allowed: BTreeSet<ConversationStatus>,
}

impl StatusPolicy {
    pub fn new(allowed: impl IntoIterator<Item = ConversationStatus>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Build from configuration strings; unknown names are dropped.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(
            names
                .iter()
                .filter_map(|n| ConversationStatus::parse(n.as_ref()).ok()),
        )
    }

    pub fn allowed(&self) -> &BTreeSet<ConversationStatus> {
        &self.allowed
    }

    pub fn permits(&self, status: ConversationStatus) -> bool {
        self.allowed.contains(&status)
    }

    /// Fail with [`BridgeError::PolicyRejected`] unless `status` may be written.
    pub fn check(&self, status: ConversationStatus) -> Result<(), BridgeError> {
        if self.permits(status) {
            Ok(())
        } else {
            Err(BridgeError::PolicyRejected(format!(
                "status `{status}` is not in allowed statuses [{}]",
                self.describe()
            )))
        }
    }

    /// Parse and check a raw status string. Unknown strings are policy rejections.
    pub fn resolve(&self, raw: &str) -> Result<ConversationStatus, BridgeError> {
        let status = ConversationStatus::parse(raw).map_err(|_| {
            BridgeError::PolicyRejected(format!(
                "status `{raw}` is not in allowed statuses [{}]",
                self.describe()
            ))
        })?;
        self.check(status)?;
        Ok(status)
    }

    fn describe(&self) -> String {
        self.allowed
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::new([Open, Pending])
    }
}
