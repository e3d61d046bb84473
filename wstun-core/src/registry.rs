//! Connection registry
//!
//! Maps a routing key (the textual form of a client's tunnel address) to the
//! live connection currently bound to it. Bindings expire unless refreshed by
//! another `set`; reads never extend them.
//!
//! Every method is a single operation on a sharded map, so callers never hold
//! a lock across two calls and operations on different keys do not contend.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Longest lifetime a binding can be given
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A binding and its deadline
#[derive(Debug, Clone)]
struct Binding<C> {
    conn: C,
    expires_at: Instant,
}

impl<C> Binding<C> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent routing table of key -> connection bindings
#[derive(Debug)]
pub struct Registry<C> {
    bindings: DashMap<String, Binding<C>>,
}

impl<C: Clone> Registry<C> {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Bind `key` to `conn` until now + `ttl`, replacing any existing binding
    ///
    /// A `ttl` too large to represent is clamped to [`MAX_TTL`].
    pub fn set(&self, key: impl Into<String>, conn: C, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        self.bindings.insert(key.into(), Binding { conn, expires_at });
    }

    /// Connection bound to `key`, if the binding is still live
    ///
    /// An expired binding is removed on the way out.
    pub fn get(&self, key: &str) -> Option<C> {
        let now = Instant::now();
        let conn = {
            let binding = self.bindings.get(key)?;
            if binding.is_expired(now) {
                None
            } else {
                Some(binding.conn.clone())
            }
        };

        if conn.is_none() {
            // Only drop it if nobody refreshed it in the meantime
            self.bindings
                .remove_if(key, |_, binding| binding.is_expired(now));
        }
        conn
    }

    /// Remove the binding for `key`
    pub fn delete(&self, key: &str) {
        self.bindings.remove(key);
    }

    /// Remove `key` only while it is still bound to a connection matching `pred`
    ///
    /// Used on delivery failure so that a binding refreshed by a newer
    /// connection in the meantime is left alone.
    pub fn delete_if(&self, key: &str, pred: impl Fn(&C) -> bool) -> bool {
        self.bindings
            .remove_if(key, |_, binding| pred(&binding.conn))
            .is_some()
    }

    /// Drop every expired binding, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.bindings.len();
        self.bindings.retain(|_, binding| !binding.is_expired(now));
        let removed = before.saturating_sub(self.bindings.len());
        if removed > 0 {
            log::debug!("Purged {} expired binding(s)", removed);
        }
        removed
    }

    /// Number of bindings, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<C: Clone> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
