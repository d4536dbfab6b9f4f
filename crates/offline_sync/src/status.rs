//! Status summary for the offline/sync indicator.

use crate::monitor::SyncIndicator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse connection state shown to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Connected, nothing in flight
    Online,
    /// Disconnected, writes queued locally
    #[default]
    Offline,
    /// Replaying queued writes
    Syncing,
}

/// Display information derived from the indicator and the queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusInfo {
    pub status: ConnectionStatus,
    /// Writes still waiting to reach the remote store
    pub pending_changes: usize,
    /// Writes that ran out of retries
    pub failed_changes: usize,
    /// Seconds since the last completed pass
    pub time_since_sync: Option<u64>,
    pub status_message: String,
}

impl SyncStatusInfo {
    /// Build the summary at the current time.
    pub fn from_parts(indicator: &SyncIndicator, pending: usize, exhausted: usize) -> Self {
        Self::at(indicator, pending, exhausted, Utc::now())
    }

    /// Build the summary as seen at `now`.
    pub fn at(
        indicator: &SyncIndicator,
        pending: usize,
        exhausted: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if indicator.is_syncing {
            ConnectionStatus::Syncing
        } else if indicator.is_online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };

        let status_message = match status {
            ConnectionStatus::Syncing => match indicator.progress {
                Some(p) if p.total > 0 => format!(
                    "Syncing {} of {}...",
                    (p.completed() + 1).min(p.total),
                    p.total
                ),
                _ => "Syncing changes...".to_string(),
            },
            ConnectionStatus::Offline => match pending {
                0 => "Offline".to_string(),
                1 => "Offline - 1 pending change".to_string(),
                n => format!("Offline - {} pending changes", n),
            },
            ConnectionStatus::Online => match (indicator.progress, &indicator.last_report) {
                // Final summary stays up during the grace period
                (Some(_), Some(report)) => report.summary(),
                _ if exhausted > 0 => {
                    format!("Connected - {} changes could not be synced", exhausted)
                }
                _ => "Connected".to_string(),
            },
        };

        let time_since_sync = indicator
            .last_sync_at
            .map(|at| (now - at).num_seconds().max(0) as u64);

        Self {
            status,
            pending_changes: pending,
            failed_changes: exhausted,
            time_since_sync,
            status_message,
        }
    }

    /// Whether the indicator should be visible at all.
    pub fn should_show(&self) -> bool {
        self.status != ConnectionStatus::Online
            || self.pending_changes > 0
            || self.failed_changes > 0
    }

    pub fn short_status(&self) -> &'static str {
        match self.status {
            ConnectionStatus::Online => "Online",
            ConnectionStatus::Offline => "Offline",
            ConnectionStatus::Syncing => "Syncing",
        }
    }

    /// Format time since sync for display
    pub fn formatted_time_since_sync(&self) -> Option<String> {
        self.time_since_sync.map(|seconds| {
            if seconds < 60 {
                format!("{}s ago", seconds)
            } else if seconds < 3600 {
                format!("{}m ago", seconds / 60)
            } else if seconds < 86400 {
                format!("{}h ago", seconds / 3600)
            } else {
                format!("{}d ago", seconds / 86400)
            }
        })
    }
}
