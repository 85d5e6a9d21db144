use rand::distributions::Uniform;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const BOOKING_REFERENCE_PREFIX: &str = "FF";
const BOOKING_REFERENCE_LEN: usize = 8;
const TICKET_CODE_PREFIX: &str = "TK";
// 20 hex chars = 80 bits of the digest
const TICKET_CODE_HEX_LEN: usize = 20;
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of booking references and ticket codes.
///
/// Generated values are only probably unique; the unique constraints in the
/// store are what guarantee it. Callers regenerate once on a collision.
pub trait ReferenceGenerator: Send + Sync {
    /// Human-readable reference, e.g. `FF7Q2M9KXA`.
    fn booking_reference(&self) -> String;

    /// Opaque check-in code for one passenger. `salt` must be fresh random
    /// bytes so codes cannot be derived from booking data alone.
    fn ticket_code(&self, booking_id: Uuid, passenger_name: &str, salt: &[u8]) -> String;

    fn salt(&self) -> [u8; 16] {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomReferences;

impl ReferenceGenerator for RandomReferences {
    fn booking_reference(&self) -> String {
        let dist = Uniform::from(0..REFERENCE_ALPHABET.len());
        let suffix: String = rand::thread_rng()
            .sample_iter(dist)
            .take(BOOKING_REFERENCE_LEN)
            .map(|i| REFERENCE_ALPHABET[i] as char)
            .collect();
        format!("{}{}", BOOKING_REFERENCE_PREFIX, suffix)
    }

    fn ticket_code(&self, booking_id: Uuid, passenger_name: &str, salt: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(booking_id.as_bytes());
        hasher.update(passenger_name.as_bytes());
        hasher.update(salt);
        let digest = format!("{:X}", hasher.finalize());
        format!("{}{}", TICKET_CODE_PREFIX, &digest[..TICKET_CODE_HEX_LEN])
    }
}
