//! Process-wide seeding for reproducible trials.
//!
//! Each trial reseeds the same two generators with the study seed before the
//! trainer is launched. The trainer's own tensor RNG lives in the child
//! process and receives the seed through its `seed=` argument.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::OnceLock;

/// Stream id used for the numeric generator so it never mirrors the standard one.
const NUMERIC_STREAM: u64 = 1;

/// Which of the seeded generators to draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStream {
    /// General purpose generator.
    Standard,
    /// Generator reserved for numeric work (noise, shuffles, initialisation).
    Numeric,
}

/// A pair of generators derived from one seed.
#[derive(Debug, Clone)]
pub struct SeededRngs {
    seed: u64,
    standard: StdRng,
    numeric: ChaCha8Rng,
}

impl SeededRngs {
    pub fn new(seed: u64) -> Self {
        let mut numeric = ChaCha8Rng::seed_from_u64(seed);
        numeric.set_stream(NUMERIC_STREAM);
        Self {
            seed,
            standard: StdRng::seed_from_u64(seed),
            numeric,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Reset both generators to the start of the sequence for `seed`.
    pub fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    pub fn stream(&mut self, stream: RngStream) -> &mut dyn RngCore {
        match stream {
            RngStream::Standard => &mut self.standard,
            RngStream::Numeric => &mut self.numeric,
        }
    }
}

fn global() -> &'static Mutex<SeededRngs> {
    static GLOBAL: OnceLock<Mutex<SeededRngs>> = OnceLock::new();
    GLOBAL.get_or_init(|| Mutex::new(SeededRngs::new(rand::random())))
}

/// Reseed the process-wide generators.
pub fn set_global_seed(seed: u64) {
    global().lock().reseed(seed);
    tracing::debug!("Global seed set to {}", seed);
}

/// The seed most recently applied with [`set_global_seed`].
pub fn global_seed() -> u64 {
    global().lock().seed()
}

/// Run `f` with exclusive access to one of the process-wide generators.
pub fn with_global_rng<T>(stream: RngStream, f: impl FnOnce(&mut dyn RngCore) -> T) -> T {
    let mut rngs = global().lock();
    f(rngs.stream(stream))
}
