pub mod telegram;

use async_trait::async_trait;

use crate::content::ContentKind;

/// A resolved business connection as returned by the transport.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// User who connected their business account to the bot.
    pub owner_id: u64,
    pub enabled: bool,
    /// Raw connection metadata, kept for diagnostics.
    pub raw: serde_json::Value,
}

/// Outbound operations the relay needs from the messaging transport.
///
/// Production code uses [`telegram::TelegramApi`]; tests provide a mock
/// implementation.
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Look up a business connection by its opaque identifier.
    async fn get_connection(&self, connection_id: &str) -> anyhow::Result<ConnectionInfo>;

    /// Send one piece of content to a chat. `caption` applies only to
    /// caption-bearing kinds; `link_chat` attaches an "open chat" button
    /// pointing at the given chat.
    async fn send_content(
        &self,
        target: i64,
        kind: ContentKind,
        payload: &str,
        caption: Option<&str>,
        link_chat: Option<i64>,
    ) -> anyhow::Result<()>;
}
