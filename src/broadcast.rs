//! Admin broadcast flow: a small per-chat state machine plus the fan-out
//! over every chat known to the registry.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::content::{ContentKind, Snapshot};
use crate::platform::RelayApi;
use crate::reconcile::Relay;

/// Kinds offered in the broadcast menu.
pub const BROADCAST_KINDS: [ContentKind; 5] = [
    ContentKind::Text,
    ContentKind::Photo,
    ContentKind::Video,
    ContentKind::Document,
    ContentKind::Animation,
];

#[derive(Debug, Clone)]
enum State {
    Menu,
    AwaitingContent(ContentKind),
    Confirm(Snapshot),
}

/// Per-admin-chat broadcast state. Volatile, like everything else here.
#[derive(Default)]
pub struct BroadcastSessions {
    states: Mutex<HashMap<i64, State>>,
}

impl BroadcastSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The admin opened the broadcast menu.
    pub async fn begin(&self, chat_id: i64) {
        self.states.lock().await.insert(chat_id, State::Menu);
    }

    /// The admin picked a content kind. Returns the kind now awaited, or
    /// None when the tag is not broadcastable.
    pub async fn choose(&self, chat_id: i64, tag: &str) -> Option<ContentKind> {
        let kind = ContentKind::from_tag(tag).filter(|k| BROADCAST_KINDS.contains(k))?;
        self.states
            .lock()
            .await
            .insert(chat_id, State::AwaitingContent(kind));
        Some(kind)
    }

    /// The kind this chat's session is waiting content for, if any.
    pub async fn awaiting_kind(&self, chat_id: i64) -> Option<ContentKind> {
        match self.states.lock().await.get(&chat_id) {
            Some(State::AwaitingContent(kind)) => Some(*kind),
            _ => None,
        }
    }

    /// Content arrived for a waiting session; move to the confirm step.
    /// Returns false when the session was not awaiting content or the
    /// content kind does not match the chosen one.
    pub async fn capture(&self, chat_id: i64, snapshot: Snapshot) -> bool {
        let mut states = self.states.lock().await;
        match states.get(&chat_id) {
            Some(State::AwaitingContent(kind)) if *kind == snapshot.kind => {
                states.insert(chat_id, State::Confirm(snapshot));
                true
            }
            _ => false,
        }
    }

    /// Consume the confirmed content, ending the session.
    pub async fn take_confirmed(&self, chat_id: i64) -> Option<Snapshot> {
        let mut states = self.states.lock().await;
        match states.remove(&chat_id) {
            Some(State::Confirm(snapshot)) => Some(snapshot),
            // A stray confirm ends whatever session was in progress.
            _ => None,
        }
    }

    pub async fn cancel(&self, chat_id: i64) {
        self.states.lock().await.remove(&chat_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub sent: u32,
    pub failed: u32,
}

/// Fan the confirmed content out to every known chat through the delivery
/// layer, pausing between sends.
pub async fn run_broadcast<A: RelayApi>(
    relay: &Relay<A>,
    snapshot: &Snapshot,
    pause: Duration,
) -> BroadcastOutcome {
    let chats = relay.active_chats().await;
    info!(
        "Broadcasting {} to {} chats",
        snapshot.kind.tag(),
        chats.len()
    );

    let mut outcome = BroadcastOutcome { sent: 0, failed: 0 };
    for chat_id in chats {
        let ok = relay
            .delivery()
            .deliver(
                chat_id,
                snapshot.kind,
                &snapshot.payload,
                snapshot.caption.as_deref(),
                None,
            )
            .await;
        if ok {
            outcome.sent += 1;
        } else {
            outcome.failed += 1;
        }
        tokio::time::sleep(pause).await;
    }

    info!(
        "Broadcast finished: {} sent, {} failed",
        outcome.sent, outcome.failed
    );
    outcome
}
