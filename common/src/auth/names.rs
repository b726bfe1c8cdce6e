// common/src/auth/names.rs
//! Human-readable usernames for auto-provisioned wallets.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ADJECTIVES: [&str; 5] = ["Quick", "Lazy", "Funny", "Serious", "Brave"];
const NOUNS: [&str; 5] = ["Fox", "Dog", "Cat", "Mouse", "Wolf"];

/// Produces `<Adjective><Noun><0-999>` names from a single shared RNG.
pub struct NameGenerator {
    rng: Mutex<StdRng>,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
        let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
        let suffix: u16 = rng.gen_range(0..1000);
        format!("{}{}{}", adjective, noun, suffix)
    }
}
