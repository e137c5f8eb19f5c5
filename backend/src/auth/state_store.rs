use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

const STATE_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_PENDING_STATES: usize = 10_000;

struct Pending {
    issued: Instant,
    seq: u64,
}

#[derive(Default)]
struct PendingStates {
    entries: HashMap<String, Pending>,
    next_seq: u64,
}

/// Pending OAuth `state` values, each usable once before it expires.
/// At most `capacity` states are held; issuing past that drops the oldest.
pub struct OAuthStateStore {
    pending: Mutex<PendingStates>,
    ttl: Duration,
    capacity: usize,
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::with_limits(STATE_TTL, MAX_PENDING_STATES)
    }
}

impl OAuthStateStore {
    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            pending: Mutex::new(PendingStates::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub async fn issue(&self) -> String {
        let state = hex::encode(rand::rng().random::<[u8; 32]>());
        let mut pending = self.pending.lock().await;
        let ttl = self.ttl;
        pending.entries.retain(|_, entry| entry.issued.elapsed() < ttl);

        let mut dropped = 0;
        while pending.entries.len() >= self.capacity {
            let oldest = pending
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    pending.entries.remove(&key);
                    dropped += 1;
                }
                None => break,
            }
        }
        if dropped > 0 {
            log::warn!(
                "OAuth state store full ({} pending); dropped {} oldest state(s)",
                self.capacity,
                dropped
            );
        }

        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.entries.insert(
            state.clone(),
            Pending {
                issued: Instant::now(),
                seq,
            },
        );
        state
    }

    /// Removes the state; true only if it was pending and still fresh.
    pub async fn consume(&self, state: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.entries.remove(state) {
            Some(entry) => entry.issued.elapsed() < self.ttl,
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.entries.len()
    }
}
