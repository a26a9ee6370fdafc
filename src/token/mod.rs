//! Token issuance and single-use consumption.
//!
//! [`TokenIssuer`] is the only state shared across sessions. Raw token
//! values never touch the store; lookups go through their SHA-256 hash.
//! One mutex over the whole store keeps issue/validate/consume atomic per
//! identity, and it is never held across an await point; callers do their
//! directory I/O outside of it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::directory::DirectoryIdentity;

type TokenHash = [u8; 32];

/// A freshly minted token. The raw value exists only here and in the
/// delivery channel; the store keeps its hash.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub identity: DirectoryIdentity,
}

#[derive(Debug, Clone)]
struct StoredToken {
    identity: DirectoryIdentity,
    issued_at: Instant,
    ttl: Duration,
    consumed: bool,
}

impl StoredToken {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.issued_at) >= self.ttl
    }

    fn is_live(&self, now: Instant) -> bool {
        !self.consumed && !self.is_expired(now)
    }
}

#[derive(Debug, Default)]
struct Store {
    by_hash: HashMap<TokenHash, StoredToken>,
    by_identity: HashMap<String, TokenHash>,
}

/// Shared, concurrency-safe store of live reset tokens, keyed by identity.
///
/// At most one live token exists per identity: issuing a new one makes any
/// predecessor permanently unusable, expired entries are treated as absent
/// at validation time, and a token can be consumed exactly once.
#[derive(Debug, Default)]
pub struct TokenIssuer {
    store: Mutex<Store>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token authorizing `identity` for the next `ttl`.
    ///
    /// Any previous token for the identity is dropped from the store, so it
    /// can no longer validate or consume even if unexpired.
    pub fn issue(&self, identity: &DirectoryIdentity, ttl: Duration) -> IssuedToken {
        let value = generate_value();
        let hash = hash_value(&value);

        let mut store = self.lock();
        if let Some(previous) = store
            .by_identity
            .insert(identity.distinguished_name.clone(), hash)
        {
            store.by_hash.remove(&previous);
        }
        store.by_hash.insert(
            hash,
            StoredToken {
                identity: identity.clone(),
                issued_at: Instant::now(),
                ttl,
                consumed: false,
            },
        );

        IssuedToken {
            value,
            identity: identity.clone(),
        }
    }

    /// Look a submitted value up and return the identity it authorizes.
    ///
    /// Absent, expired, and consumed tokens all answer `None`. Expired
    /// entries are removed on the way out, so correctness never depends on
    /// the sweeper. The consumed flag is not touched; consumption is the
    /// caller's explicit decision.
    #[must_use]
    pub fn validate(&self, value: &str) -> Option<DirectoryIdentity> {
        let hash = hash_value(value);
        let now = Instant::now();

        let mut store = self.lock();
        let token = store.by_hash.get(&hash)?;
        if token.is_expired(now) {
            let dn = token.identity.distinguished_name.clone();
            store.by_hash.remove(&hash);
            if store.by_identity.get(&dn) == Some(&hash) {
                store.by_identity.remove(&dn);
            }
            return None;
        }
        if token.consumed {
            return None;
        }
        Some(token.identity.clone())
    }

    /// Atomically mark a still-live token consumed.
    ///
    /// Returns `false` when the value is absent, expired, or already
    /// consumed; at most one caller ever observes `true` for a given token.
    pub fn consume(&self, value: &str) -> bool {
        let hash = hash_value(value);
        let now = Instant::now();

        let mut store = self.lock();
        match store.by_hash.get_mut(&hash) {
            Some(token) if token.is_live(now) => {
                token.consumed = true;
                true
            }
            _ => false,
        }
    }

    /// Drop expired and consumed entries to bound memory. Returns how many
    /// entries were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut store = self.lock();
        let Store {
            by_hash,
            by_identity,
        } = &mut *store;
        let before = by_hash.len();
        by_hash.retain(|_, token| token.is_live(now));
        by_identity.retain(|_, hash| by_hash.contains_key(hash));
        before - by_hash.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodically sweep the store on a fixed cadence.
///
/// Purely a memory bound; validation treats expired entries as absent
/// whether or not this task ever runs.
pub fn spawn_sweeper(issuer: std::sync::Arc<TokenIssuer>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            let removed = issuer.sweep();
            if removed > 0 {
                debug!("swept {removed} dead reset tokens");
            }
        }
    })
}

/// 32 bytes from the OS CSPRNG, rendered base64url without padding.
fn generate_value() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_value(value: &str) -> TokenHash {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}
