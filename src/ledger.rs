//! Volatile ledger of the last-known state of every tracked business message.

use std::collections::HashMap;

use crate::content::Snapshot;

/// Identity of the user who originally sent a tracked message.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderRecord {
    /// Formatted name/username string, ready for display.
    pub display: String,
    pub user_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub snapshot: Snapshot,
    pub sender: Option<SenderRecord>,
}

/// In-memory map from `(chat_id, message_id)` to the last observed snapshot
/// and the original sender. Entries are created on first sight, overwritten
/// on edit (sender preserved) and consumed by delete events. Never persisted
/// and never evicted.
#[derive(Debug, Default)]
pub struct MessageLedger {
    entries: HashMap<(i64, i32), LedgerEntry>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the first observed state of a message.
    pub fn record(
        &mut self,
        chat_id: i64,
        message_id: i32,
        snapshot: Snapshot,
        sender: Option<SenderRecord>,
    ) {
        self.entries
            .insert((chat_id, message_id), LedgerEntry { snapshot, sender });
    }

    /// Overwrite the snapshot for an edited message, returning the previous
    /// snapshot (None when the message was never seen) and the sender the
    /// entry now carries.
    ///
    /// The stored sender is always retained; `fallback_sender` is used only
    /// when the edit creates the entry fresh, since edit events may not carry
    /// reliable sender identity.
    pub fn apply_edit(
        &mut self,
        chat_id: i64,
        message_id: i32,
        snapshot: Snapshot,
        fallback_sender: Option<SenderRecord>,
    ) -> (Option<Snapshot>, Option<SenderRecord>) {
        match self.entries.get_mut(&(chat_id, message_id)) {
            Some(entry) => {
                let old = std::mem::replace(&mut entry.snapshot, snapshot);
                (Some(old), entry.sender.clone())
            }
            None => {
                self.entries.insert(
                    (chat_id, message_id),
                    LedgerEntry {
                        snapshot,
                        sender: fallback_sender.clone(),
                    },
                );
                (None, fallback_sender)
            }
        }
    }

    /// Read-and-remove the entry for a deleted message. The entry is consumed
    /// whether or not the caller ends up sending a notification.
    pub fn remove(&mut self, chat_id: i64, message_id: i32) -> Option<LedgerEntry> {
        self.entries.remove(&(chat_id, message_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
