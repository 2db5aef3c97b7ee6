pub mod errors;
pub mod seed;

pub use errors::*;
pub use seed::{global_seed, set_global_seed, with_global_rng, RngStream, SeededRngs};
