//! Observable network reachability signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable "is network reachable" signal.
///
/// Readers take snapshots at each decision point; nothing holds the state for
/// the duration of an operation.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current snapshot
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Publish a new reachability state; no-op when unchanged
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }

    /// Subscribe to reachability changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Resolve once the network is reachable
    pub async fn wait_until_online(&self) {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = receiver.wait_for(|online| *online).await;
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_reflects_latest_state() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());
        monitor.set_online(true);
        assert!(monitor.is_online());
    }

    #[test]
    fn unchanged_state_does_not_notify() {
        let monitor = ConnectivityMonitor::new(true);
        let receiver = monitor.subscribe();
        monitor.set_online(true);
        assert!(!receiver.has_changed().unwrap());
    }

    #[tokio::test]
    async fn wait_until_online_resolves_after_flip() {
        let monitor = ConnectivityMonitor::new(false);
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_until_online().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        monitor.set_online(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
