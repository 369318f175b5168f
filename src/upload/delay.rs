//! Deferred Deletion Scheduler
//!
//! Every file staged by an upload is registered here with a due time. A single
//! background task sweeps the queue and removes whatever is due, so abandoned
//! uploads are reclaimed without a cleanup task per file.
//!
//! The queue lives in the shared store as a sorted set (member = path,
//! score = due unix seconds), which makes re-registering a path a reschedule.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::kv::{KvError, KvStore};

/// Default retention window of staged files: 10 minutes
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Default sweep interval: 30 seconds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Clone)]
pub struct DelayScheduler {
    store: Arc<dyn KvStore>,
    queue: String,
    retention: Duration,
}

impl DelayScheduler {
    pub fn new(store: Arc<dyn KvStore>, queue: String, retention: Duration) -> Self {
        Self {
            store,
            queue,
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Retention window formatted for clients, e.g. `10m0s`
    pub fn validity(&self) -> String {
        format_duration(self.retention)
    }

    /// Schedule deletion of `path` after the retention window
    pub async fn add(&self, path: &Path) -> Result<(), KvError> {
        self.schedule(path, self.retention).await
    }

    /// Schedule deletion of `path` after `after`, rescheduling any pending entry
    pub async fn schedule(&self, path: &Path, after: Duration) -> Result<(), KvError> {
        let due = Utc::now().timestamp() + after.as_secs() as i64;
        let member = path.to_string_lossy();

        tracing::debug!(path = %member, due = due, queue = %self.queue, "Scheduling deferred deletion");

        self.store
            .zadd(&self.queue, &member, due)
            .await
            .inspect_err(|e| {
                tracing::error!(path = %member, queue = %self.queue, error = %e, "Failed to schedule deferred deletion");
            })
    }

    /// Cancel a pending deletion; a missing entry is not an error
    pub async fn remove(&self, path: &Path) {
        let member = path.to_string_lossy();

        tracing::debug!(path = %member, queue = %self.queue, "Cancelling deferred deletion");

        if let Err(e) = self.store.zrem(&self.queue, &member).await {
            tracing::error!(path = %member, queue = %self.queue, error = %e, "Failed to cancel deferred deletion");
        }
    }

    /// Claim every entry due at `now` and delete its path.
    ///
    /// Claimed entries are consumed even when the delete fails. Returns the
    /// number of paths actually removed.
    pub async fn sweep(&self, now: i64) -> Result<usize, KvError> {
        let due = self.store.zpop_by_score(&self.queue, now).await?;

        let mut removed = 0;
        for path in &due {
            tracing::debug!(path = %path, queue = %self.queue, "Removing file by deferred deletion");
            match remove_path(Path::new(path)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path, "Deferred deletion target already gone");
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Deferred deletion failed");
                }
            }
        }

        if !due.is_empty() {
            tracing::info!(claimed = due.len(), removed = removed, "Deferred deletion sweep complete");
        }

        Ok(removed)
    }

    /// Sweep at the current time
    pub async fn tick(&self) -> Result<usize, KvError> {
        self.sweep(Utc::now().timestamp()).await
    }

    /// Start background sweep task; a zero interval falls back to the default
    pub fn start(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let interval = poll_interval_or_default(interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!(queue = %self.queue, error = %e, "Failed to fetch deferred deletions");
                }
            }
        })
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

// ============================================================================
// Durations
// ============================================================================

/// Parse a duration such as `10m`, `1h30m`, `45s` or `500ms`.
///
/// Units: `h`, `m`, `s`, `ms`. A bare number is not accepted.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            _ => return None,
        };
        total = total.checked_add(part)?;
    }

    Some(total)
}

/// Sweep interval, with zero replaced by `DEFAULT_POLL_INTERVAL`
pub fn poll_interval_or_default(interval: Duration) -> Duration {
    if interval.is_zero() {
        tracing::warn!("Zero deferred deletion interval, using default");
        DEFAULT_POLL_INTERVAL
    } else {
        interval
    }
}

/// Retention window from configuration, falling back to the default
pub fn retention_from_str(raw: &str) -> Duration {
    parse_duration(raw).unwrap_or_else(|| {
        tracing::warn!(value = %raw, "Invalid retention window, using default");
        DEFAULT_RETENTION
    })
}

/// Format as `1h2m3s`, always ending in seconds (`10m0s`, `45s`, `0s`)
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

// ============================================================================
// Tests
// ============================================================================
