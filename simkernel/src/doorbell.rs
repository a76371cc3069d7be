//! Scheduler Doorbells
//!
//! Single-slot wake-up signals for the scheduler workers. Ringing never
//! blocks; rings that arrive while a wake-up is already pending coalesce
//! into that one wake-up.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// A coalescing wake-up signal
#[derive(Debug, Default)]
pub struct Doorbell {
    notify: Notify,
    /// Total rings, for diagnostics
    rings: AtomicU64,
}

impl Doorbell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a wake-up. Never blocks.
    pub fn ring(&self) {
        self.rings.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Wait for the next wake-up, consuming a pending one immediately
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Total rings so far
    pub fn rings(&self) -> u64 {
        self.rings.load(Ordering::Relaxed)
    }
}

/// The three scheduler doorbells
#[derive(Debug, Default)]
pub struct Doorbells {
    pub long_term: Doorbell,
    pub medium_term: Doorbell,
    pub short_term: Doorbell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ring_before_wait_is_kept() {
        let bell = Doorbell::new();
        bell.ring();

        tokio::time::timeout(Duration::from_millis(100), bell.wait())
            .await
            .expect("pending ring should wake immediately");
    }

    #[tokio::test]
    async fn test_rings_coalesce() {
        let bell = Doorbell::new();
        bell.ring();
        bell.ring();
        bell.ring();

        bell.wait().await;
        let second = tokio::time::timeout(Duration::from_millis(50), bell.wait()).await;
        assert!(second.is_err(), "only one wake-up should be pending");
        assert_eq!(bell.rings(), 3);
    }
}
