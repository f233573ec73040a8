use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::stealth::fingerprint::{Fingerprint, FingerprintProvider};

/// Everything remembered about one logical browsing session: the
/// identity presented, the cookies accumulated, and request accounting.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub fingerprint: Fingerprint,
    pub cookies: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub last_request: Option<DateTime<Utc>>,
    pub request_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionState>,
    // Keys ordered least- to most-recently used.
    recency: VecDeque<String>,
}

/// Injectable store mapping session keys to consistent identities.
///
/// Sessions are created lazily on first use and capped at
/// `max_sessions`: once the cap is reached the least-recently-used
/// session is evicted, bounding memory in long-running deployments.
/// The recency touch is a linear scan, which is fine at the caps this
/// is configured with (hundreds, not millions).
pub struct SessionStore {
    max_sessions: usize,
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Snapshot of the session for `key`, creating it (and sampling its
    /// fingerprint) on first use.
    pub async fn session(&self, key: &str) -> SessionState {
        let mut inner = self.inner.lock().await;
        self.touch(&mut inner, key);

        if let Some(state) = inner.sessions.get(key) {
            return state.clone();
        }

        let state = SessionState {
            fingerprint: FingerprintProvider::sample(),
            cookies: Vec::new(),
            created_at: Utc::now(),
            last_request: None,
            request_count: 0,
        };
        debug!("created session for key {key}");
        inner.sessions.insert(key.to_string(), state.clone());
        self.evict_over_cap(&mut inner);
        state
    }

    /// The cached fingerprint for `key`; identical on every call for the
    /// lifetime of the session.
    pub async fn fingerprint_for(&self, key: &str) -> Fingerprint {
        self.session(key).await.fingerprint
    }

    /// Replace the session's cookie jar with what the backend returned.
    pub async fn update_cookies(&self, key: &str, cookies: Vec<Value>) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.sessions.get_mut(key) {
            state.cookies = cookies;
        }
    }

    /// Bump request accounting for `key`.
    pub async fn note_request(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.sessions.get_mut(key) {
            state.request_count += 1;
            state.last_request = Some(Utc::now());
        }
        self.touch(&mut inner, key);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    fn touch(&self, inner: &mut Inner, key: &str) {
        if let Some(pos) = inner.recency.iter().position(|k| k == key) {
            let _ = inner.recency.remove(pos);
        }
        inner.recency.push_back(key.to_string());
    }

    fn evict_over_cap(&self, inner: &mut Inner) {
        while inner.sessions.len() > self.max_sessions {
            if let Some(evicted) = inner.recency.pop_front() {
                inner.sessions.remove(&evicted);
                debug!("evicted least-recently-used session {evicted}");
            } else {
                break;
            }
        }
    }
}
