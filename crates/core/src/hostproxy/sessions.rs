//! OAuth callback session buffers
//!
//! The host proxy records one callback per session ID so an agent inside
//! a container can complete a browser-based OAuth flow: the browser hits
//! the proxy, the proxy buffers the request, and the container polls for
//! it. Buffers are evicted after a TTL; eviction runs on write so an idle
//! proxy holds no timer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// How long a buffered callback stays retrievable.
const SESSION_TTL_MINUTES: i64 = 10;

/// One buffered callback request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackRecord {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Mutex-guarded session map with TTL eviction on write.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<String, CallbackRecord>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a callback, replacing any earlier one for the session.
    pub fn record(&self, session: &str, record: CallbackRecord) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = Utc::now() - Duration::minutes(SESSION_TTL_MINUTES);
        map.retain(|_, existing| existing.received_at > cutoff);
        debug!(session, "Recorded callback");
        map.insert(session.to_string(), record);
    }

    /// Retrieve the buffered callback for a session, if any.
    pub fn get(&self, session: &str) -> Option<CallbackRecord> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(session).cloned()
    }

    /// Remove a session buffer. Returns whether one existed.
    pub fn delete(&self, session: &str) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(session).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
