//! Processed-event cache
//!
//! Remembers the `uid` of every event routed to an owner so a redelivered
//! event never runs a finisher twice. The cache is bulk-cleared once the
//! configured window has elapsed since the last recorded event; there is no
//! per-entry expiry, so a duplicate arriving right after a bulk clear is
//! treated as new.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use super::AuthEvent;

/// Default window after which the whole cache is dropped.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Bounded-lifetime set of processed event identifiers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tokio::time::Instant;
/// use signin_relay::event::{AuthEvent, AuthEventType, DedupCache};
///
/// let mut cache = DedupCache::new(Duration::from_secs(600));
/// let event = AuthEvent::new(AuthEventType::SignInPopup).with_event_id("e1");
///
/// assert!(!cache.is_duplicate(&event, Instant::now()));
/// cache.record(&event, Instant::now());
/// assert!(cache.is_duplicate(&event, Instant::now()));
/// ```
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    seen: HashSet<String>,
    last_recorded: Option<Instant>,
}

impl DedupCache {
    /// Creates an empty cache with the given bulk-clear window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashSet::new(),
            last_recorded: None,
        }
    }

    /// Drops every entry if `window` has elapsed since the last record.
    pub fn expire_if_stale(&mut self, now: Instant) {
        let stale = match self.last_recorded {
            Some(last) => now.saturating_duration_since(last) >= self.window,
            None => true,
        };
        if stale {
            if !self.seen.is_empty() {
                tracing::debug!(entries = self.seen.len(), "Dedup window elapsed; clearing cache");
            }
            self.seen.clear();
            self.last_recorded = None;
        }
    }

    /// Expires stale entries, then reports whether `event` was already
    /// processed. Events without a `uid` are never duplicates.
    pub fn is_duplicate(&mut self, event: &AuthEvent, now: Instant) -> bool {
        self.expire_if_stale(now);
        event.uid().is_some_and(|uid| self.seen.contains(uid))
    }

    /// Records `event` as processed and stamps the window start.
    ///
    /// Events without a `uid` are not recorded and do not move the stamp.
    pub fn record(&mut self, event: &AuthEvent, now: Instant) {
        if let Some(uid) = event.uid() {
            self.seen.insert(uid.to_string());
            self.last_recorded = Some(now);
        }
    }

    /// Forgets every processed identifier.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.last_recorded = None;
    }

    /// Number of remembered identifiers.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
