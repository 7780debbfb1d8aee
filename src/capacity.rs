//! Table sizing for the bucket table and the dense arrays.
//!
//! Bucket tables are always prime-sized so that hashes with poor low-bit
//! entropy still spread across buckets. Reducing a hash against a prime needs
//! a real modulo; on 64-bit targets that division is replaced by the
//! multiply-and-shift sequence from Lemire et al., "Faster Remainder by Direct
//! Computation", using a multiplier precomputed per table size.

use cfg_if::cfg_if;

/// Largest table size handed out. Every dense index and every `index + 1`
/// bucket link must fit in a `u32` with room left for the chain sentinel.
pub const MAX_TABLE_SIZE: usize = 0x7FFF_FFC3;

/// Primes that skip multiples of this value are preferred once we fall off
/// the end of [`PRIMES`], so hash functions built around it do not alias.
const HASH_PRIME: usize = 101;

/// Ascending primes, each roughly 1.2x the previous one.
const PRIMES: [u32; 72] = [
    3, 7, 11, 17, 23, 29, 37, 47, 59, 71, 89, 107, 131, 163, 197, 239, 293, 353, 431, 521, 631,
    761, 919, 1103, 1327, 1597, 1931, 2333, 2801, 3371, 4049, 4861, 5839, 7013, 8419, 10103, 12143,
    14591, 17519, 21023, 25229, 30293, 36353, 43627, 52361, 62851, 75431, 90523, 108631, 130363,
    156437, 187751, 225307, 270371, 324449, 389357, 467237, 560689, 672827, 807403, 968897,
    1162687, 1395263, 1674319, 2009191, 2411033, 2893249, 3471899, 4166287, 4999559, 5999471,
    7199369,
];

fn is_prime(candidate: usize) -> bool {
    if candidate & 1 == 0 {
        return candidate == 2;
    }

    let mut divisor = 3usize;
    while divisor.saturating_mul(divisor) <= candidate {
        if candidate % divisor == 0 {
            return false;
        }
        divisor += 2;
    }

    candidate != 1
}

/// Returns the smallest prime that is at least `min`.
///
/// Sizes inside the precomputed table are a lookup; larger ones fall back to
/// a linear search over odd candidates. Requests above [`MAX_TABLE_SIZE`]
/// saturate to it.
pub fn prime_at_least(min: usize) -> usize {
    if let Some(&prime) = PRIMES.iter().find(|&&p| p as usize >= min) {
        return prime as usize;
    }
    if min >= MAX_TABLE_SIZE {
        return MAX_TABLE_SIZE;
    }

    let mut candidate = min | 1;
    while candidate < MAX_TABLE_SIZE {
        if is_prime(candidate) && (candidate - 1) % HASH_PRIME != 0 {
            return candidate;
        }
        candidate += 2;
    }

    MAX_TABLE_SIZE
}

/// Returns the table size to grow to from `current`: the first prime at or
/// above twice the current size.
pub fn next_table_size(current: usize) -> usize {
    let doubled = current.saturating_mul(2);
    if doubled > MAX_TABLE_SIZE && current < MAX_TABLE_SIZE {
        return MAX_TABLE_SIZE;
    }
    prime_at_least(doubled)
}

/// Computes the multiplier that lets [`fast_mod`] reduce by `divisor`.
///
/// Must be recomputed whenever `divisor` changes.
#[inline]
pub fn fast_mod_multiplier(divisor: u32) -> u64 {
    debug_assert!(divisor != 0);
    (u64::MAX / divisor as u64).wrapping_add(1)
}

/// Computes `value % divisor` with two multiplications.
///
/// Exact for every `value` as long as `divisor <= i32::MAX` and `multiplier`
/// came from [`fast_mod_multiplier`] for the same divisor.
#[inline(always)]
pub fn fast_mod(value: u32, divisor: u32, multiplier: u64) -> u32 {
    let high = multiplier.wrapping_mul(value as u64) >> 32;
    (((high + 1) * divisor as u64) >> 32) as u32
}

/// A bucket table length together with its reduction multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableSize {
    len: u32,
    multiplier: u64,
}

impl From<usize> for TableSize {
    /// Rounds `value` up to a prime. Zero stays zero: an unallocated table.
    #[inline]
    fn from(value: usize) -> Self {
        if value == 0 {
            return Self::EMPTY;
        }
        let len = prime_at_least(value) as u32;
        TableSize {
            len,
            multiplier: fast_mod_multiplier(len),
        }
    }
}

impl TableSize {
    /// The size of a table that has not been allocated yet.
    pub const EMPTY: TableSize = TableSize {
        len: 0,
        multiplier: 0,
    };

    /// Number of buckets.
    #[inline(always)]
    pub fn len(self) -> usize {
        self.len as usize
    }

    /// Returns `true` for the unallocated table.
    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// The precomputed fast-mod multiplier for this length.
    #[inline(always)]
    pub fn multiplier(self) -> u64 {
        self.multiplier
    }

    /// Maps `hash` to a bucket in `0..len`. The table must not be empty.
    #[inline(always)]
    pub fn reduce(self, hash: u32) -> usize {
        debug_assert!(!self.is_empty());
        cfg_if! {
            if #[cfg(target_pointer_width = "64")] {
                fast_mod(hash, self.len, self.multiplier) as usize
            } else {
                (hash % self.len) as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn prime_table_is_ascending_and_prime() {
        for window in PRIMES.windows(2) {
            assert!(window[0] < window[1]);
        }
        for &p in PRIMES.iter() {
            assert!(is_prime(p as usize), "{p} is not prime");
        }
    }

    #[test]
    fn prime_at_least_rounds_up() {
        assert_eq!(prime_at_least(0), 3);
        assert_eq!(prime_at_least(3), 3);
        assert_eq!(prime_at_least(4), 7);
        assert_eq!(prime_at_least(100), 107);
        assert_eq!(prime_at_least(7199369), 7199369);
    }

    #[test]
    fn prime_at_least_searches_past_the_table() {
        let p = prime_at_least(7199370);
        assert!(p >= 7199370);
        assert!(is_prime(p));
        assert_ne!((p - 1) % HASH_PRIME, 0);
    }

    #[test]
    fn prime_at_least_saturates() {
        assert_eq!(prime_at_least(usize::MAX), MAX_TABLE_SIZE);
        assert!(is_prime(MAX_TABLE_SIZE));
    }

    #[test]
    fn next_table_size_at_least_doubles() {
        let mut size = 0;
        for _ in 0..20 {
            let next = next_table_size(size);
            assert!(next >= size * 2);
            assert!(next > size);
            size = next;
        }
        assert_eq!(next_table_size(MAX_TABLE_SIZE - 10), MAX_TABLE_SIZE);
    }

    #[test]
    fn fast_mod_matches_modulo() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let divisors = PRIMES
            .iter()
            .copied()
            .chain([MAX_TABLE_SIZE as u32, 1, 2]);
        for divisor in divisors {
            let multiplier = fast_mod_multiplier(divisor);
            for value in [0, 1, divisor - 1, divisor, u32::MAX, u32::MAX - 1] {
                assert_eq!(fast_mod(value, divisor, multiplier), value % divisor);
            }
            for _ in 0..1000 {
                let value: u32 = rng.random();
                assert_eq!(
                    fast_mod(value, divisor, multiplier),
                    value % divisor,
                    "{value} % {divisor}"
                );
            }
        }
    }

    #[test]
    fn table_size_from_rounds_to_prime() {
        assert!(TableSize::from(0).is_empty());
        let size = TableSize::from(50);
        assert_eq!(size.len(), 59);
        assert_eq!(size.multiplier(), fast_mod_multiplier(59));
        for hash in [0u32, 58, 59, 1234567, u32::MAX] {
            assert_eq!(size.reduce(hash), (hash % 59) as usize);
        }
    }
}
