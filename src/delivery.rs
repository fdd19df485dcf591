//! Best-effort outbound sending with bounded retry and exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::content::ContentKind;
use crate::platform::RelayApi;

/// Wraps the transport's send operation with a fixed retry budget. All
/// failures are converted to a boolean result plus a log line; nothing is
/// ever raised to the caller.
pub struct Delivery<A> {
    api: Arc<A>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl<A: RelayApi> Delivery<A> {
    pub fn new(api: Arc<A>, max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            api,
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Send `payload` of `kind` to `target`, retrying on any failure with
    /// doubling backoff. Transient and permanent failures are treated alike;
    /// the transport gives no fast-fail signal for blocked recipients.
    ///
    /// Returns true on the first success, false once the budget is spent.
    pub async fn deliver(
        &self,
        target: i64,
        kind: ContentKind,
        payload: &str,
        caption: Option<&str>,
        link_chat: Option<i64>,
    ) -> bool {
        for attempt in 0..self.max_attempts {
            match self
                .api
                .send_content(target, kind, payload, caption, link_chat)
                .await
            {
                Ok(()) => {
                    debug!("{} sent to chat {}", kind.descriptor().label, target);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Failed to send {} to chat {} (attempt {}/{}): {:#}",
                        kind.tag(),
                        target,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.base_backoff * 2u32.pow(attempt)).await;
                    }
                }
            }
        }

        warn!(
            "Giving up on chat {} after {} attempts",
            target, self.max_attempts
        );
        false
    }
}
