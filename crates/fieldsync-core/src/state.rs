//! Shared cross-platform state types.

/// Unified sync state shown by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No connectivity; local edits are queued
    Offline,
    /// A reconciliation run is in flight
    Syncing,
    /// Online with local edits still waiting
    Pending,
    /// Nothing left to reconcile
    Synced,
}

impl SyncState {
    /// Derive the state from a connectivity snapshot and engine counters.
    pub const fn derive(online: bool, running: bool, unsynced: usize) -> Self {
        if running {
            Self::Syncing
        } else if !online {
            Self::Offline
        } else if unsynced > 0 {
            Self::Pending
        } else {
            Self::Synced
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }
}
