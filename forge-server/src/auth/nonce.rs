//! Single-use state nonces for the authorization-code flow.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Nonce lifetime: 10 minutes.
pub const NONCE_TTL: Duration = Duration::from_secs(600);

/// Issues random nonces and consumes each at most once.
#[derive(Default)]
pub struct NonceStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl NonceStore {
    /// Mints a fresh nonce.
    pub fn issue(&self) -> String {
        let mut rng = rand::thread_rng();
        let nonce: String = (0..32)
            .map(|_| {
                let n: u8 = rng.gen_range(0..16);
                char::from_digit(n as u32, 16).unwrap()
            })
            .collect();
        let mut entries = self.entries.lock().expect("nonce store poisoned");
        let now = Instant::now();
        entries.retain(|_, issued| now.duration_since(*issued) < NONCE_TTL);
        entries.insert(nonce.clone(), now);
        nonce
    }

    /// Redeems a nonce. True exactly once per issued value, within the TTL.
    pub fn consume(&self, nonce: &str) -> bool {
        let mut entries = self.entries.lock().expect("nonce store poisoned");
        match entries.remove(nonce) {
            Some(issued) => issued.elapsed() < NONCE_TTL,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_single_use() {
        let store = NonceStore::default();
        let nonce = store.issue();
        assert!(store.consume(&nonce));
        assert!(!store.consume(&nonce));
    }

    #[test]
    fn unknown_nonce_is_rejected() {
        let store = NonceStore::default();
        store.issue();
        assert!(!store.consume("deadbeef"));
    }

    #[test]
    fn nonces_are_distinct() {
        let store = NonceStore::default();
        let a = store.issue();
        let b = store.issue();
        assert_ne!(a, b);
    }
}
