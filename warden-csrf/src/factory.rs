use crate::providers::{Clock, OsRandom, RandomSource};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Length of every issued token.
pub const TOKEN_LENGTH: usize = 40;

const RANDOM_MAX: u32 = 65535;

/// Derives unguessable token strings.
///
/// The entropy base concatenates the logical key, client address, a random
/// draw in `[0, 65535]`, epoch milliseconds, a per-factory sequence number
/// and the session id. The base is hashed with SHA-256 and the first 40 hex
/// characters, uppercased, form the token.
pub struct TokenFactory {
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    sequence: AtomicU64,
}

impl TokenFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_random(clock, Arc::new(OsRandom))
    }

    pub fn with_random(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            clock,
            random,
            sequence: AtomicU64::new(0),
        }
    }

    /// Mint a new token for `logical_key` in the given session.
    pub fn new_token(&self, logical_key: &str, client_ip: &str, session_id: &str) -> String {
        let draw = self.random.rand_range(0, RANDOM_MAX);
        let millis = self.clock.now().timestamp_millis();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        let base = format!("{logical_key}{client_ip}{draw}{millis}{seq}{session_id}");
        let digest = hex::encode(Sha256::digest(base.as_bytes()));

        digest[..TOKEN_LENGTH].to_ascii_uppercase()
    }
}

/// Whether `candidate` has the shape of an issued token.
pub fn is_well_formed(candidate: &str) -> bool {
    candidate.len() == TOKEN_LENGTH
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}
