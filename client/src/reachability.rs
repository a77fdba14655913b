//! Network reachability as reported by the transport layer.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Online,
    Offline,
}

impl Reachability {
    pub fn is_online(self) -> bool {
        self == Reachability::Online
    }
}

/// Publishes online/offline transitions to the sync engine.
///
/// Starts out online until told otherwise. Transitions only start or abort
/// a sync cycle; they never touch the queue or the store directly.
#[derive(Debug)]
pub struct ReachabilityMonitor {
    tx: watch::Sender<Reachability>,
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReachabilityMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Reachability::Online);
        Self { tx }
    }

    /// Report the current state. Repeating the current state is a no-op.
    pub fn set(&self, state: Reachability) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::info!(?state, "Reachability changed");
        }
    }

    pub fn set_online(&self) {
        self.set(Reachability::Online);
    }

    pub fn set_offline(&self) {
        self.set(Reachability::Offline);
    }

    pub fn current(&self) -> Reachability {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_observed() {
        let monitor = ReachabilityMonitor::new();
        let mut rx = monitor.subscribe();
        assert_eq!(*rx.borrow(), Reachability::Online);

        monitor.set_offline();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Reachability::Offline);

        monitor.set_offline();
        assert!(!rx.has_changed().unwrap());
        assert!(!monitor.current().is_online());
    }
}
