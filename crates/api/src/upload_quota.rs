use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_UPLOADS_PER_WINDOW: u32 = 20;
pub const DEFAULT_UPLOAD_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadQuota {
    pub max_uploads: u32,
    pub window: Duration,
}

impl Default for UploadQuota {
    fn default() -> Self {
        Self {
            max_uploads: DEFAULT_UPLOADS_PER_WINDOW,
            window: DEFAULT_UPLOAD_WINDOW,
        }
    }
}

/// Per-actor upload admission over fixed windows.
///
/// Counters live in process memory only. A window resets lazily on the first
/// check after it expires; [`UploadRateLimiter::evict_expired`] drops idle
/// actors so the map stays bounded.
#[derive(Debug)]
pub struct UploadRateLimiter {
    quota: UploadQuota,
    actors: Mutex<HashMap<Uuid, UsageWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct UsageWindow {
    started: Instant,
    count: u32,
}

impl UploadRateLimiter {
    #[must_use]
    pub fn new(quota: UploadQuota) -> Self {
        Self {
            quota,
            actors: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn quota(&self) -> UploadQuota {
        self.quota
    }

    /// Admits and counts one upload, or returns `false` without counting.
    pub async fn try_admit(&self, actor_id: Uuid) -> bool {
        let now = Instant::now();
        let mut actors = self.actors.lock().await;
        let usage = actors.entry(actor_id).or_insert(UsageWindow {
            started: now,
            count: 0,
        });
        if now.duration_since(usage.started) >= self.quota.window {
            usage.started = now;
            usage.count = 0;
        }
        if usage.count >= self.quota.max_uploads {
            return false;
        }
        usage.count = usage.count.saturating_add(1);
        true
    }

    /// Removes actors whose window has expired. Returns how many were dropped.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut actors = self.actors.lock().await;
        let before = actors.len();
        actors.retain(|_, usage| now.duration_since(usage.started) < self.quota.window);
        before - actors.len()
    }

    pub async fn tracked_actors(&self) -> usize {
        self.actors.lock().await.len()
    }
}

impl Default for UploadRateLimiter {
    fn default() -> Self {
        Self::new(UploadQuota::default())
    }
}
