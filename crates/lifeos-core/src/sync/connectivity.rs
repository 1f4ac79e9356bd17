//! Online/offline state shared between the mutation wrapper and the sync manager.

use std::sync::Arc;

use tokio::sync::watch;

/// Observable connectivity flag
#[derive(Clone, Debug)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record a connectivity change. Subscribers are only woken on actual transitions.
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
            tracing::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions_only() {
        let connectivity = Connectivity::new(false);
        let mut receiver = connectivity.subscribe();

        connectivity.set_online(false);
        assert!(!receiver.has_changed().unwrap());

        connectivity.set_online(true);
        receiver.changed().await.unwrap();
        assert!(*receiver.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[test]
    fn clones_share_state() {
        let connectivity = Connectivity::default();
        let other = connectivity.clone();
        other.set_online(false);
        assert!(!connectivity.is_online());
    }
}
