// Connectivity monitor — tracks whether this device currently has a
// usable path to the internet.
//
// Platform code reports path changes; consumers read the current value at
// each decision point rather than caching it, since connectivity can change
// between a command being issued and the gateway acting on it. Absence of
// information is treated as offline.

use tokio::sync::watch;
use tracing::debug;

/// Boolean online/offline signal with change notification
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// New monitor, initially offline
    pub fn new() -> Self {
        Self::with_initial(false)
    }

    /// New monitor with a known initial state
    pub fn with_initial(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Platform callback: the network path changed
    pub fn report_path_change(&self, online: bool) {
        let changed = *self.tx.borrow() != online;
        if changed {
            debug!(online, "connectivity changed");
        }
        // send_replace never fails; the sender keeps the channel alive
        self.tx.send_replace(online);
    }

    /// Current online state, read fresh at every decision point
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to connectivity transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
