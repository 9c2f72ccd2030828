use std::ops::Range;
use rand::{Rng, RngCore};

/// Source of randomness for token suffixes, the initial message id and retransmission timer
///  jitter. None of these need cryptographic quality.
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync + 'static {
    fn next_u32(&self) -> u32;
    fn gen_f64_range(&self, range: Range<f64>) -> f64;
}

pub struct RngRandom;
impl Random for RngRandom {
    fn next_u32(&self) -> u32 {
        rand::thread_rng().next_u32()
    }

    fn gen_f64_range(&self, range: Range<f64>) -> f64 {
        rand::thread_rng().gen_range(range)
    }
}
