use async_trait::async_trait;

use crate::model::StoredMessage;

/// Supervisor/poller/sender lifecycle events, delivered to whatever
/// `UiAdapter` is wired in. The CLI's terminal adapter renders these;
/// a headless caller can use `NullUiAdapter` to drop them silently.
#[derive(Clone, Debug)]
pub enum Event {
    SupervisorVerifying,
    SupervisorRunning { was_disconnected: bool },
    SupervisorBlocked { reason: String, retry_in_secs: u64 },
    /// Up to three one-line causes behind the current `Blocked` state,
    /// fired alongside `SupervisorBlocked` for callers that want the
    /// structured list rather than the joined summary string.
    BlockingErrors { messages: Vec<String> },
    /// Every precondition passed again after a `Blocked` spell.
    BlockingCleared,
    /// The RPC connection came back after being observed down mid-poll.
    Reconnected,
    MessageReceived(StoredMessage),
    MessageSent { peer: Option<String> },
    /// Emitted after every successful poll tick. `total` is monotonic
    /// non-decreasing across ticks for a given `Poller`.
    PollComplete {
        date: String,
        new_count: usize,
        total: u64,
        pool_info: Option<String>,
    },
    PollError { message: String },
    StatusLine(String),
}

#[async_trait]
pub trait UiAdapter: Send + Sync {
    async fn handle(&self, event: Event);
}

/// Discards every event. Used by non-interactive callers (tests, a
/// future daemon mode) that have no terminal to render to.
pub struct NullUiAdapter;

#[async_trait]
impl UiAdapter for NullUiAdapter {
    async fn handle(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_adapter_accepts_every_event_variant() {
        let adapter = NullUiAdapter;
        adapter.handle(Event::SupervisorVerifying).await;
        adapter
            .handle(Event::SupervisorBlocked {
                reason: "down".to_string(),
                retry_in_secs: 30,
            })
            .await;
        adapter
            .handle(Event::BlockingErrors {
                messages: vec!["rpc unreachable".to_string()],
            })
            .await;
        adapter.handle(Event::BlockingCleared).await;
        adapter.handle(Event::Reconnected).await;
        adapter
            .handle(Event::PollComplete {
                date: "2026-07-28T00:00:00Z".to_string(),
                new_count: 0,
                total: 0,
                pool_info: None,
            })
            .await;
        adapter
            .handle(Event::PollError {
                message: "timeout".to_string(),
            })
            .await;
        adapter.handle(Event::StatusLine("ok".to_string())).await;
    }
}
