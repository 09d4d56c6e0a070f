// Process wide seed source. Every session reset and every backend exploration stream draws
// its seed from here, so a fixed seed reproduces a whole experiment.

use rand::{Rng, SeedableRng, rngs::StdRng};
use std::cell::RefCell;

thread_local! {
    pub static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

pub fn set_seed(seed: u64) {
    RNG.with_borrow_mut(|rng| *rng = StdRng::seed_from_u64(seed));
}

pub fn next_seed() -> u64 {
    RNG.with_borrow_mut(|rng| rng.random::<u64>())
}

/// A fresh generator seeded from the process wide source.
pub fn fork() -> StdRng {
    StdRng::seed_from_u64(next_seed())
}
