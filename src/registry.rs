//! Business-connection ownership index and the set of known chats.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{info, warn};

use crate::platform::RelayApi;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The event carried no business connection id; nothing to look up.
    #[error("event carries no business connection id")]
    NoConnection,

    /// The external lookup failed. Not cached: the next event retries.
    #[error("connection lookup for {id} failed: {reason}")]
    Lookup { id: String, reason: anyhow::Error },
}

/// Maps business connection ids to their owning user, with lazy resolution
/// through the transport and permanent caching. Also tracks every chat known
/// to the bot (owners and `/start` users) as the broadcast fan-out list.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Write-once per id: the first resolution wins.
    owners: HashMap<String, u64>,
    connections: HashMap<String, serde_json::Value>,
    active_chats: HashSet<i64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the owner of `connection_id`, consulting the cache first and
    /// falling back to a live lookup. Lookup failures are never cached.
    pub async fn resolve_owner(
        &mut self,
        api: &impl RelayApi,
        connection_id: Option<&str>,
    ) -> Result<u64, ResolveError> {
        let id = match connection_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ResolveError::NoConnection),
        };

        if let Some(owner) = self.owners.get(id) {
            return Ok(*owner);
        }

        match api.get_connection(id).await {
            Ok(conn) => {
                let owner = conn.owner_id;
                self.record_connection(id, owner, conn.raw);
                info!("Registered owner {} for connection {}", owner, id);
                Ok(owner)
            }
            Err(reason) => {
                warn!("Failed to look up business connection {}: {:#}", id, reason);
                Err(ResolveError::Lookup {
                    id: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Apply a connection registration, from either a push update or a
    /// successful lookup. The owner index is write-once; the active-chat
    /// registration is idempotent.
    pub fn record_connection(&mut self, connection_id: &str, owner_id: u64, raw: serde_json::Value) {
        self.owners
            .entry(connection_id.to_string())
            .or_insert(owner_id);
        self.connections.insert(connection_id.to_string(), raw);
        self.register_chat(owner_id as i64);
    }

    /// Add a chat to the broadcast fan-out list. Returns true when the chat
    /// was not known before.
    pub fn register_chat(&mut self, chat_id: i64) -> bool {
        self.active_chats.insert(chat_id)
    }

    pub fn active_chats(&self) -> Vec<i64> {
        self.active_chats.iter().copied().collect()
    }

    pub fn chat_count(&self) -> usize {
        self.active_chats.len()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    #[allow(dead_code)]
    pub fn connection_meta(&self, connection_id: &str) -> Option<&serde_json::Value> {
        self.connections.get(connection_id)
    }
}
