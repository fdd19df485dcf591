//! Edit/delete reconciliation: decides what to report to the chat owner and
//! reconstructs lost content from the ledger.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::content::{ContentKind, Snapshot, UNKNOWN_DISPLAY};
use crate::delivery::Delivery;
use crate::ledger::{LedgerEntry, MessageLedger, SenderRecord};
use crate::platform::RelayApi;
use crate::registry::{ConnectionRegistry, ResolveError};

const UNKNOWN_SENDER: &str = "Unknown sender";

/// Inbound business message in transport-agnostic form.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub connection_id: Option<String>,
    pub chat_id: i64,
    pub message_id: i32,
    pub sender: Option<SenderRecord>,
    pub snapshot: Snapshot,
}

/// One batch of deletions for a single connection/chat.
#[derive(Debug, Clone)]
pub struct DeletedBatch {
    pub connection_id: Option<String>,
    pub chat_id: i64,
    pub message_ids: Vec<i32>,
}

/// Push registration of a business connection.
#[derive(Debug, Clone)]
pub struct ConnectionUpdate {
    pub connection_id: String,
    pub owner_id: u64,
    pub enabled: bool,
    pub raw: serde_json::Value,
}

/// Escape `<`, `>` and `&` for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Process-wide relay state: connection registry, message ledger and the
/// delivery layer, mutated only through the event handlers below.
pub struct Relay<A: RelayApi> {
    api: Arc<A>,
    registry: Mutex<ConnectionRegistry>,
    ledger: Mutex<MessageLedger>,
    delivery: Delivery<A>,
}

impl<A: RelayApi> Relay<A> {
    pub fn new(api: Arc<A>, delivery: Delivery<A>) -> Self {
        Self {
            api,
            registry: Mutex::new(ConnectionRegistry::new()),
            ledger: Mutex::new(MessageLedger::new()),
            delivery,
        }
    }

    pub fn delivery(&self) -> &Delivery<A> {
        &self.delivery
    }

    pub async fn register_chat(&self, chat_id: i64) -> bool {
        self.registry.lock().await.register_chat(chat_id)
    }

    pub async fn active_chats(&self) -> Vec<i64> {
        self.registry.lock().await.active_chats()
    }

    /// (known chats, resolved business owners) — shown in the broadcast menu.
    pub async fn stats(&self) -> (usize, usize) {
        let registry = self.registry.lock().await;
        (registry.chat_count(), registry.owner_count())
    }

    /// A business account was connected or its settings changed.
    pub async fn on_connection_update(&self, update: ConnectionUpdate) {
        info!(
            "Business connection {}: owner {}, enabled: {}",
            update.connection_id, update.owner_id, update.enabled
        );
        self.registry.lock().await.record_connection(
            &update.connection_id,
            update.owner_id,
            update.raw,
        );
    }

    /// A new business message was seen: record it so a later edit or delete
    /// can be reconstructed. Resolution precedes tracking; unresolvable
    /// events are dropped.
    pub async fn on_message(&self, msg: InboundMessage) {
        if self.resolve_owner(msg.connection_id.as_deref()).await.is_none() {
            return;
        }

        let mut ledger = self.ledger.lock().await;
        debug!(
            "Stored {} message ({}, {})",
            msg.snapshot.kind.tag(),
            msg.chat_id,
            msg.message_id
        );
        ledger.record(msg.chat_id, msg.message_id, msg.snapshot, msg.sender);
        debug!("{} messages tracked", ledger.len());
    }

    /// A business message was edited: update the ledger and notify the owner
    /// with the old and new renditions, unless the owner edited their own
    /// message.
    pub async fn on_edit(&self, msg: InboundMessage) {
        let Some(owner) = self.resolve_owner(msg.connection_id.as_deref()).await else {
            return;
        };

        debug!("Edit detected for ({}, {})", msg.chat_id, msg.message_id);

        let (old, sender) = {
            let mut ledger = self.ledger.lock().await;
            ledger.apply_edit(
                msg.chat_id,
                msg.message_id,
                msg.snapshot.clone(),
                msg.sender.clone(),
            )
        };

        // Suppression uses the sender stored in the ledger: edit events may
        // not carry reliable sender identity.
        if sender.as_ref().and_then(|s| s.user_id) == Some(owner) {
            debug!("Edit by owner {}, notification suppressed", owner);
            return;
        }

        let sender_display = sender
            .map(|s| s.display)
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        let old_display = old
            .map(|s| s.display())
            .unwrap_or_else(|| UNKNOWN_DISPLAY.to_string());

        let text = format!(
            "✏️ <b>Message edited</b>\nfrom: {}\n\n<b>Before:</b> {}\n\n<b>After:</b> {}",
            escape_html(&sender_display),
            escape_html(&old_display),
            escape_html(&msg.snapshot.display()),
        );

        if !self
            .delivery
            .deliver(owner as i64, ContentKind::Text, &text, None, Some(msg.chat_id))
            .await
        {
            warn!(
                "Could not notify owner {} about edit in chat {}",
                owner, msg.chat_id
            );
        }
    }

    /// A batch of business messages was deleted: reconstruct each one for the
    /// owner. A failure on one message never aborts the rest of the batch.
    pub async fn on_deleted(&self, batch: DeletedBatch) {
        let Some(owner) = self.resolve_owner(batch.connection_id.as_deref()).await else {
            return;
        };

        // Deletions inside the owner's own 1:1 chat are invisible.
        if batch.chat_id == owner as i64 {
            debug!("Deletion in owner {}'s own chat, suppressed", owner);
            return;
        }

        debug!(
            "Processing {} deletions in chat {} for owner {}",
            batch.message_ids.len(),
            batch.chat_id,
            owner
        );

        for message_id in batch.message_ids {
            // The entry is consumed whether or not we end up notifying.
            let entry = self.ledger.lock().await.remove(batch.chat_id, message_id);

            let Some(entry) = entry else {
                self.notify_unrecovered(owner, batch.chat_id, message_id).await;
                continue;
            };

            if entry.sender.as_ref().and_then(|s| s.user_id) == Some(owner) {
                debug!("Message deleted by owner {}, skipped", owner);
                continue;
            }

            if let Err(e) = self.redeliver(owner, batch.chat_id, &entry).await {
                let text = format!(
                    "❌ <b>Failed to restore message</b>\nKind: {}\nError: {}",
                    entry.snapshot.kind.descriptor().label,
                    escape_html(&format!("{e:#}")),
                );
                self.delivery
                    .deliver(owner as i64, ContentKind::Text, &text, None, Some(batch.chat_id))
                    .await;
            }
        }
    }

    async fn resolve_owner(&self, connection_id: Option<&str>) -> Option<u64> {
        let mut registry = self.registry.lock().await;
        match registry.resolve_owner(self.api.as_ref(), connection_id).await {
            Ok(owner) => Some(owner),
            Err(ResolveError::NoConnection) => {
                warn!("Event without a business connection, dropped");
                None
            }
            // Already logged by the registry; the next event retries.
            Err(ResolveError::Lookup { .. }) => None,
        }
    }

    /// The deleted message was never captured (e.g. the bot restarted after
    /// it was sent): tell the owner what little we know.
    async fn notify_unrecovered(&self, owner: u64, chat_id: i64, message_id: i32) {
        let text = format!(
            "🗑️ Message deleted\nfrom: {UNKNOWN_SENDER}\n\nContent was not captured\n📋 Message id: {message_id}",
        );
        self.delivery
            .deliver(owner as i64, ContentKind::Text, &text, None, Some(chat_id))
            .await;
    }

    /// Redeliver the captured content to the owner with a deletion banner.
    /// Caption kinds merge the banner into the caption; kinds without
    /// captions get the banner as a separate message before the content;
    /// stickers are always a banner message followed by the raw sticker.
    async fn redeliver(&self, owner: u64, chat_id: i64, entry: &LedgerEntry) -> anyhow::Result<()> {
        let target = owner as i64;
        let snapshot = &entry.snapshot;
        let desc = snapshot.kind.descriptor();
        let sender_display = entry
            .sender
            .as_ref()
            .map(|s| s.display.as_str())
            .unwrap_or(UNKNOWN_SENDER);
        let banner = format!(
            "🗑️ <b>Deleted: {}</b>\nfrom {}",
            desc.label,
            escape_html(sender_display)
        );

        if snapshot.kind.is_textual() {
            let text = format!("{banner}:\n\n{}", escape_html(&snapshot.payload));
            self.delivery
                .deliver(target, ContentKind::Text, &text, None, Some(chat_id))
                .await;
        } else if snapshot.kind == ContentKind::Sticker {
            self.delivery
                .deliver(target, ContentKind::Text, &banner, None, Some(chat_id))
                .await;
            // Raw sticker send has no retry budget; an error here becomes a
            // reconstruction notice for this message id only.
            self.api
                .send_content(target, ContentKind::Sticker, &snapshot.payload, None, None)
                .await?;
        } else if snapshot.kind.has_caption() {
            let mut caption = banner;
            if let Some(original) = &snapshot.caption {
                caption.push_str("\ncaption: ");
                caption.push_str(&escape_html(original));
            }
            self.delivery
                .deliver(
                    target,
                    snapshot.kind,
                    &snapshot.payload,
                    Some(&caption),
                    Some(chat_id),
                )
                .await;
        } else {
            self.delivery
                .deliver(target, ContentKind::Text, &banner, None, Some(chat_id))
                .await;
            self.delivery
                .deliver(target, snapshot.kind, &snapshot.payload, None, Some(chat_id))
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ConnectionInfo;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        target: i64,
        kind: ContentKind,
        payload: String,
        caption: Option<String>,
    }

    struct MockApi {
        owners: HashMap<String, u64>,
        lookups: AtomicU32,
        sent: StdMutex<Vec<Sent>>,
        fail_kind: Option<ContentKind>,
    }

    impl MockApi {
        fn with_connection(connection_id: &str, owner: u64) -> Self {
            let mut owners = HashMap::new();
            owners.insert(connection_id.to_string(), owner);
            Self {
                owners,
                lookups: AtomicU32::new(0),
                sent: StdMutex::new(Vec::new()),
                fail_kind: None,
            }
        }

        fn failing_kind(mut self, kind: ContentKind) -> Self {
            self.fail_kind = Some(kind);
            self
        }

        fn lookups(&self) -> u32 {
            self.lookups.load(Ordering::SeqCst)
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RelayApi for MockApi {
        async fn get_connection(&self, connection_id: &str) -> anyhow::Result<ConnectionInfo> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match self.owners.get(connection_id) {
                Some(owner_id) => Ok(ConnectionInfo {
                    owner_id: *owner_id,
                    enabled: true,
                    raw: serde_json::Value::Null,
                }),
                None => Err(anyhow::anyhow!("unknown connection")),
            }
        }

        async fn send_content(
            &self,
            target: i64,
            kind: ContentKind,
            payload: &str,
            caption: Option<&str>,
            _link_chat: Option<i64>,
        ) -> anyhow::Result<()> {
            if self.fail_kind == Some(kind) {
                return Err(anyhow::anyhow!("send rejected"));
            }
            self.sent.lock().unwrap().push(Sent {
                target,
                kind,
                payload: payload.to_string(),
                caption: caption.map(|c| c.to_string()),
            });
            Ok(())
        }
    }

    fn relay_with(api: MockApi) -> (Arc<MockApi>, Relay<MockApi>) {
        let api = Arc::new(api);
        let delivery = Delivery::new(api.clone(), 3, Duration::from_millis(1));
        (api.clone(), Relay::new(api, delivery))
    }

    fn sender(id: u64, display: &str) -> Option<SenderRecord> {
        Some(SenderRecord {
            display: display.to_string(),
            user_id: Some(id),
        })
    }

    fn inbound(
        connection: &str,
        chat_id: i64,
        message_id: i32,
        from: Option<SenderRecord>,
        snapshot: Snapshot,
    ) -> InboundMessage {
        InboundMessage {
            connection_id: Some(connection.to_string()),
            chat_id,
            message_id,
            sender: from,
            snapshot,
        }
    }

    #[tokio::test]
    async fn tracking_resolves_connection_only_once() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        for id in 1..=3 {
            relay
                .on_message(inbound(
                    "c1",
                    200,
                    id,
                    sender(42, "Alice"),
                    Snapshot::new(ContentKind::Text, "hi"),
                ))
                .await;
        }

        assert_eq!(api.lookups(), 1);
        assert!(relay.active_chats().await.contains(&100));
    }

    #[tokio::test]
    async fn unresolvable_connection_drops_event_and_retries_later() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        let msg = inbound(
            "c9",
            200,
            1,
            sender(42, "Alice"),
            Snapshot::new(ContentKind::Text, "hi"),
        );
        relay.on_message(msg.clone()).await;
        relay.on_message(msg).await;

        // No negative caching: both events hit the transport, neither is
        // tracked or reported.
        assert_eq!(api.lookups(), 2);
        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn edit_by_other_sender_notifies_owner_with_both_versions() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Text, "hello"),
            ))
            .await;
        relay
            .on_edit(inbound(
                "c1",
                200,
                1,
                None,
                Snapshot::new(ContentKind::Text, "hello world"),
            ))
            .await;

        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, 100);
        assert_eq!(sent[0].kind, ContentKind::Text);
        assert!(sent[0].payload.contains("hello"));
        assert!(sent[0].payload.contains("hello world"));
        assert!(sent[0].payload.contains("Alice"));
    }

    #[tokio::test]
    async fn edit_by_owner_is_suppressed() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(100, "Owner"),
                Snapshot::new(ContentKind::Text, "mine"),
            ))
            .await;
        relay
            .on_edit(inbound(
                "c1",
                200,
                1,
                None,
                Snapshot::new(ContentKind::Text, "mine, edited"),
            ))
            .await;

        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn edit_suppression_uses_ledger_sender_not_event_sender() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Text, "hello"),
            ))
            .await;
        // The edit event claims the owner sent it; the ledger knows better.
        relay
            .on_edit(inbound(
                "c1",
                200,
                1,
                sender(100, "Owner"),
                Snapshot::new(ContentKind::Text, "hello!"),
            ))
            .await;

        assert_eq!(api.sent().len(), 1);
    }

    #[tokio::test]
    async fn edit_of_unseen_message_reports_unknown_old_content() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_edit(inbound(
                "c1",
                200,
                9,
                None,
                Snapshot::new(ContentKind::Text, "surprise"),
            ))
            .await;

        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].payload.contains("[unknown] ?"));
        assert!(sent[0].payload.contains("surprise"));
    }

    #[tokio::test]
    async fn edit_updates_ledger_so_delete_sees_latest_payload() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice (@alice)"),
                Snapshot::new(ContentKind::Text, "hello"),
            ))
            .await;
        relay
            .on_edit(inbound(
                "c1",
                200,
                1,
                None,
                Snapshot::new(ContentKind::Text, "hello world"),
            ))
            .await;
        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 200,
                message_ids: vec![1],
            })
            .await;

        let sent = api.sent();
        // Edit notification, then the restored text.
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].target, 100);
        assert_eq!(sent[1].kind, ContentKind::Text);
        assert!(sent[1].payload.contains("hello world"));
        assert!(sent[1].payload.contains("Alice (@alice)"));
        assert!(sent[1].payload.contains("Deleted"));
    }

    #[tokio::test]
    async fn delete_in_owner_chat_suppresses_whole_batch() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                100,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Text, "hi"),
            ))
            .await;
        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 100,
                message_ids: vec![1, 2, 3],
            })
            .await;

        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn delete_of_owner_message_is_suppressed_but_consumed() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(100, "Owner"),
                Snapshot::new(ContentKind::Text, "mine"),
            ))
            .await;
        let batch = DeletedBatch {
            connection_id: Some("c1".to_string()),
            chat_id: 200,
            message_ids: vec![1],
        };
        relay.on_deleted(batch.clone()).await;
        assert!(api.sent().is_empty());

        // The entry was consumed: deleting again is a ledger miss.
        relay.on_deleted(batch).await;
        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].payload.contains("not captured"));
    }

    #[tokio::test]
    async fn delete_without_ledger_entry_sends_single_unrecovered_notice() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 200,
                message_ids: vec![77],
            })
            .await;

        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, 100);
        assert!(sent[0].payload.contains("not captured"));
        assert!(sent[0].payload.contains("77"));
    }

    #[tokio::test]
    async fn deleted_photo_redelivers_with_banner_merged_into_caption() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Photo, "file-abc")
                    .with_caption(Some("sunset".to_string())),
            ))
            .await;
        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 200,
                message_ids: vec![1],
            })
            .await;

        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ContentKind::Photo);
        assert_eq!(sent[0].payload, "file-abc");
        let caption = sent[0].caption.as_deref().unwrap();
        assert!(caption.contains("Deleted"));
        assert!(caption.contains("Alice"));
        assert!(caption.contains("caption: sunset"));
    }

    #[tokio::test]
    async fn deleted_voice_gets_separate_banner_before_content() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Voice, "voice-file"),
            ))
            .await;
        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 200,
                message_ids: vec![1],
            })
            .await;

        let sent = api.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, ContentKind::Text);
        assert!(sent[0].payload.contains("Deleted"));
        assert_eq!(sent[1].kind, ContentKind::Voice);
        assert_eq!(sent[1].payload, "voice-file");
        assert_eq!(sent[1].caption, None);
    }

    #[tokio::test]
    async fn deleted_sticker_is_banner_then_raw_sticker() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Sticker, "sticker-file"),
            ))
            .await;
        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 200,
                message_ids: vec![1],
            })
            .await;

        let sent = api.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, ContentKind::Text);
        assert_eq!(sent[1].kind, ContentKind::Sticker);
        assert_eq!(sent[1].payload, "sticker-file");
    }

    #[tokio::test]
    async fn redelivery_failure_reports_error_and_continues_batch() {
        let (api, relay) =
            relay_with(MockApi::with_connection("c1", 100).failing_kind(ContentKind::Sticker));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Sticker, "sticker-file"),
            ))
            .await;
        relay
            .on_message(inbound(
                "c1",
                200,
                2,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Text, "still here"),
            ))
            .await;
        relay
            .on_deleted(DeletedBatch {
                connection_id: Some("c1".to_string()),
                chat_id: 200,
                message_ids: vec![1, 2],
            })
            .await;

        let sent = api.sent();
        // Sticker banner, then the error notice, then the restored text.
        assert_eq!(sent.len(), 3);
        assert!(sent[1].payload.contains("Failed to restore"));
        assert!(sent[1].payload.contains("Sticker"));
        assert!(sent[2].payload.contains("still here"));
    }

    #[tokio::test]
    async fn html_in_user_content_is_escaped() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_message(inbound(
                "c1",
                200,
                1,
                sender(42, "<Alice & Bob>"),
                Snapshot::new(ContentKind::Text, "a <b>bold</b> move"),
            ))
            .await;
        relay
            .on_edit(inbound(
                "c1",
                200,
                1,
                None,
                Snapshot::new(ContentKind::Text, "plain"),
            ))
            .await;

        let sent = api.sent();
        assert!(sent[0].payload.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(sent[0].payload.contains("&lt;Alice &amp; Bob&gt;"));
    }

    #[tokio::test]
    async fn connection_update_registers_owner_without_lookup() {
        let (api, relay) = relay_with(MockApi::with_connection("c1", 100));

        relay
            .on_connection_update(ConnectionUpdate {
                connection_id: "c2".to_string(),
                owner_id: 300,
                enabled: true,
                raw: serde_json::Value::Null,
            })
            .await;
        relay
            .on_message(inbound(
                "c2",
                400,
                1,
                sender(42, "Alice"),
                Snapshot::new(ContentKind::Text, "hi"),
            ))
            .await;

        assert_eq!(api.lookups(), 0);
        assert!(relay.active_chats().await.contains(&300));
    }
}
