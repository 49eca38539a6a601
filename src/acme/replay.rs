use chrono::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use crate::types;

/// A response paired with the fresh nonce the client must use next.
/// Errors carry one too, so a client can retry after a `badNonce`.
#[derive(Debug)]
pub struct ReplayNonce<R> {
    pub nonce: String,
    pub inner: R,
}

impl<R> ReplayNonce<R> {
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn map<F: FnOnce(R) -> S, S>(self, f: F) -> ReplayNonce<S> {
        ReplayNonce {
            nonce: self.nonce,
            inner: f(self.inner),
        }
    }
}

impl<T> ReplayNonce<super::ACMEResult<T>> {
    pub fn into_result(self) -> super::ACMEResult<T> {
        self.inner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
    NotFound,
    AlreadyUsed,
    Malformed,
}

impl From<RedeemError> for types::error::Error {
    fn from(from: RedeemError) -> types::error::Error {
        types::error::Error::bad_nonce(match from {
            RedeemError::NotFound => "The nonce may have expired or was never issued",
            RedeemError::AlreadyUsed => "The nonce has already been used",
            RedeemError::Malformed => "Invalid nonce format",
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum NonceState {
    Outstanding(DateTime<Utc>),
    Redeemed(DateTime<Utc>),
}

impl NonceState {
    fn issued_at(&self) -> DateTime<Utc> {
        match self {
            NonceState::Outstanding(t) | NonceState::Redeemed(t) => *t
        }
    }
}

/// Issues single-use anti-replay tokens. Redeemed tokens are remembered until
/// they age out so a replay is reported as such rather than as unknown.
#[derive(Debug)]
pub struct NonceManager {
    nonces: Mutex<HashMap<uuid::Uuid, NonceState>>,
    lifetime: chrono::Duration,
    clock: Arc<dyn crate::util::Clock>,
}

impl NonceManager {
    pub fn new(lifetime: chrono::Duration, clock: Arc<dyn crate::util::Clock>) -> Self {
        NonceManager {
            nonces: Mutex::new(HashMap::new()),
            lifetime,
            clock,
        }
    }

    fn nonces(&self) -> std::sync::MutexGuard<'_, HashMap<uuid::Uuid, NonceState>> {
        // Entries are plain data, so a panic elsewhere cannot leave them half written.
        match self.nonces.lock() {
            Ok(n) => n,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn issue(&self) -> String {
        let now = self.clock.now();
        let nonce = uuid::Uuid::new_v4();
        let mut nonces = self.nonces();
        Self::prune_locked(&mut nonces, now - self.lifetime);
        nonces.insert(nonce, NonceState::Outstanding(now));
        crate::util::uuid_as_b64(&nonce)
    }

    pub fn redeem(&self, nonce: &str) -> Result<(), RedeemError> {
        let nonce_uuid = match crate::util::b64_to_uuid(nonce) {
            Some(v) => v,
            None => return Err(RedeemError::Malformed)
        };
        let now = self.clock.now();
        let mut nonces = self.nonces();
        match nonces.get(&nonce_uuid).copied() {
            None => Err(RedeemError::NotFound),
            Some(state) if now - state.issued_at() >= self.lifetime => {
                nonces.remove(&nonce_uuid);
                Err(RedeemError::NotFound)
            }
            Some(NonceState::Redeemed(_)) => Err(RedeemError::AlreadyUsed),
            Some(NonceState::Outstanding(issued_at)) => {
                nonces.insert(nonce_uuid, NonceState::Redeemed(issued_at));
                Ok(())
            }
        }
    }

    /// Forgets every nonce older than the configured lifetime.
    pub fn prune(&self) {
        let cutoff = self.clock.now() - self.lifetime;
        Self::prune_locked(&mut self.nonces(), cutoff);
    }

    fn prune_locked(nonces: &mut HashMap<uuid::Uuid, NonceState>, cutoff: DateTime<Utc>) {
        let before = nonces.len();
        nonces.retain(|_, state| state.issued_at() > cutoff);
        let pruned = before - nonces.len();
        if pruned > 0 {
            debug!("Pruned {} stale nonces", pruned);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.nonces().values().filter(|s| matches!(s, NonceState::Outstanding(_))).count()
    }
}
