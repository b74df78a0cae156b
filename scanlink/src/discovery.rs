//! Discovery feed into the session manager
//!
//! The transport drivers announce scanners as they come into and go out of
//! range. They do so through a `DiscoveryFeed`; the session manager owns the
//! receiving end and applies operating-mode filtering.

use scanlink_types::{AvailableScanner, ScannerId};
use tokio::sync::mpsc;
use tracing::trace;

/// Announcement from a discovery source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Appeared(AvailableScanner),
    Disappeared(ScannerId),
}

/// Sending side of the discovery feed
///
/// Cheap to clone; one clone per transport driver is typical.
#[derive(Debug, Clone)]
pub struct DiscoveryFeed {
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl DiscoveryFeed {
    /// Announce a scanner in range
    ///
    /// Returns `false` once the session manager has stopped.
    pub fn appeared(&self, scanner: AvailableScanner) -> bool {
        trace!("Discovery: appeared {}", scanner);
        self.tx.send(DiscoveryEvent::Appeared(scanner)).is_ok()
    }

    /// Announce a scanner out of range
    pub fn disappeared(&self, id: ScannerId) -> bool {
        trace!("Discovery: disappeared {}", id);
        self.tx.send(DiscoveryEvent::Disappeared(id)).is_ok()
    }
}

pub(crate) fn channel() -> (DiscoveryFeed, mpsc::UnboundedReceiver<DiscoveryEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DiscoveryFeed { tx }, rx)
}
