// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cached lookup of Chatwoot teams by name.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatdify_core::{BridgeError, ConversationGateway, Team};
use tokio::sync::RwLock;
use tracing::debug;

/// Team list fetched through the gateway and kept for a TTL.
pub struct TeamDirectory {
    gateway: Arc<dyn ConversationGateway>,
    ttl: Duration,
    cache: RwLock<Option<(Instant, Vec<Team>)>>,
}

impl TeamDirectory {
    pub fn new(gateway: Arc<dyn ConversationGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// All teams, served from cache while fresh.
    pub async fn teams(&self) -> Result<Vec<Team>, BridgeError> {
        {
            let cache = self.cache.read().await;
            if let Some((fetched_at, teams)) = cache.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(teams.clone());
                }
            }
        }
        self.refresh().await
    }

    /// Resolve a team name (case-insensitive) to its id. A miss on a cached
    /// list triggers one refresh in case the team was created since.
    pub async fn resolve(&self, name: &str) -> Result<Option<i64>, BridgeError> {
        if let Some(id) = find(&self.teams().await?, name) {
            return Ok(Some(id));
        }
        Ok(find(&self.refresh().await?, name))
    }

    async fn refresh(&self) -> Result<Vec<Team>, BridgeError> {
        let teams = self.gateway.get_teams().await?;
        debug!(count = teams.len(), "team directory refreshed");
        *self.cache.write().await = Some((Instant::now(), teams.clone()));
        Ok(teams)
    }
}

fn find(teams: &[Team], name: &str) -> Option<i64> {
    let name = name.trim();
    teams
        .iter()
        .find(|t| t.name.trim().eq_ignore_ascii_case(name))
        .map(|t| t.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdify_test_utils::MockChatwoot;

    #[tokio::test]
    async fn resolves_names_case_insensitively_and_caches() {
        let chatwoot = Arc::new(MockChatwoot::new());
        chatwoot.set_teams(vec![Team { id: 4, name: "Tier 2".into() }]).await;
        let directory = TeamDirectory::new(chatwoot.clone(), Duration::from_secs(60));

        assert_eq!(directory.resolve("tier 2").await.unwrap(), Some(4));
        assert_eq!(directory.resolve("Tier 2").await.unwrap(), Some(4));
        assert_eq!(chatwoot.call_count("get_teams").await, 1);
    }

    #[tokio::test]
    async fn miss_refreshes_once() {
        let chatwoot = Arc::new(MockChatwoot::new());
        let directory = TeamDirectory::new(chatwoot.clone(), Duration::from_secs(60));
        assert_eq!(directory.resolve("Billing").await.unwrap(), None);

        chatwoot.set_teams(vec![Team { id: 8, name: "Billing".into() }]).await;
        assert_eq!(directory.resolve("billing").await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let chatwoot = Arc::new(MockChatwoot::new());
        let directory = TeamDirectory::new(chatwoot.clone(), Duration::ZERO);
        directory.teams().await.unwrap();
        directory.teams().await.unwrap();
        assert_eq!(chatwoot.call_count("get_teams").await, 2);
    }
}
