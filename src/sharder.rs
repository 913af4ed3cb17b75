//! Hashing of allocation keys into the unit interval.

/// Maps an input string to a uniformly distributed 32-bit integer.
pub trait Sharder {
    fn hash_int(&self, input: &str) -> u32;

    /// Position of `input` in `[0, 1]`.
    fn hash_fraction(&self, input: &str) -> f64 {
        f64::from(self.hash_int(input)) / f64::from(u32::MAX)
    }
}

/// The default (and only) sharder.
///
/// Uses the first four bytes (first 8 hex characters) of the MD5 digest, read as a big-endian
/// integer. Every existing assignment depends on this truncation, so it must not change.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn hash_int(&self, input: &str) -> u32 {
        let hash = md5::compute(input);
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
    }
}

#[cfg(test)]
pub(crate) struct DeterministicSharder(pub std::collections::HashMap<String, u32>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn hash_int(&self, input: &str) -> u32 {
        self.0.get(input).copied().unwrap_or(0)
    }
}

/// Counts calls, so tests can prove that hashing was skipped.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct CountingSharder(pub std::sync::atomic::AtomicUsize);

#[cfg(test)]
impl Sharder for CountingSharder {
    fn hash_int(&self, input: &str) -> u32 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Md5Sharder.hash_int(input)
    }
}
