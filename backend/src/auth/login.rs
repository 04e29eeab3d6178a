use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};

/// Default lifetime of a pending login handshake.
const PENDING_LOGIN_TTL_SECS: i64 = 300;
/// Length of generated state and nonce values.
const TOKEN_LEN: usize = 32;

struct PendingLogin {
    nonce: String,
    expires_at: DateTime<Utc>,
}

/// In-memory map of pending OIDC login handshakes, keyed by state.
///
/// A state is single-use: the callback consumes it. Expired entries are
/// pruned whenever a new login begins.
pub struct LoginCache {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

impl Default for LoginCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(PENDING_LOGIN_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start a login handshake: returns freshly generated (state, nonce).
    pub fn begin(&self) -> (String, String) {
        let state = random_token();
        let nonce = random_token();
        let now = Utc::now();

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, entry| entry.expires_at > now);
        pending.insert(
            state.clone(),
            PendingLogin {
                nonce: nonce.clone(),
                expires_at: now + self.ttl,
            },
        );
        (state, nonce)
    }

    /// Consume a pending state, returning its nonce. None for unknown,
    /// already-used, or expired states.
    pub fn take(&self, state: &str) -> Option<String> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let entry = pending.remove(state)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.nonce)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
