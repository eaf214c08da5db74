//! Ordering of asynchronous view loads.
//!
//! Every load takes a [`Ticket`]. Only the result of the newest ticket may be
//! applied; anything that finishes after a newer load started, or after the
//! view was left, is dropped.
//!
//! This is meant for hosts that keep views alive, such as a UI that reloads a
//! booking list while the user navigates. Wrap each client call in
//! [`ViewSequencer::run`]; the one-shot CLI has no use for it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct ViewSequencer {
    latest: AtomicU64,
}

impl ViewSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a load, superseding every earlier ticket
    pub fn begin(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::Acquire) == ticket.0
    }

    /// The view went away; outstanding loads must not apply
    pub fn leave(&self) {
        self.latest.fetch_add(1, Ordering::AcqRel);
    }

    pub fn apply<T>(&self, ticket: Ticket, value: T) -> Option<T> {
        self.is_current(ticket).then_some(value)
    }

    /// Run a load under a fresh ticket, returning its output only if still current
    pub async fn run<F, T>(&self, load: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let ticket = self.begin();
        let value = load.await;
        self.apply(ticket, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[test]
    fn test_newer_ticket_supersedes_older() {
        let view = ViewSequencer::new();
        let first = view.begin();
        let second = view.begin();
        assert!(!view.is_current(first));
        assert_eq!(view.apply(first, "stale"), None);
        assert_eq!(view.apply(second, "fresh"), Some("fresh"));
    }

    #[test]
    fn test_leaving_discards_outstanding_load() {
        let view = ViewSequencer::new();
        let ticket = view.begin();
        view.leave();
        assert_eq!(view.apply(ticket, 1), None);
    }

    #[tokio::test]
    async fn test_slow_load_finishing_last_is_dropped() {
        let view = Arc::new(ViewSequencer::new());
        let (release, wait) = oneshot::channel::<&str>();

        let slow = {
            let view = view.clone();
            tokio::spawn(async move { view.run(async { wait.await.unwrap_or("none") }).await })
        };
        tokio::task::yield_now().await;
        while view.latest.load(Ordering::Acquire) == 0 {
            tokio::task::yield_now().await;
        }

        let fast = view.run(async { "fast" }).await;
        assert_eq!(fast, Some("fast"));

        release.send("slow").unwrap();
        assert_eq!(slow.await.unwrap(), None);
    }
}
