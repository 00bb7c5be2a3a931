// Deterministic, portable pseudo-random number generator for the Whip engine.
//
// xoshiro256++ (Blackman & Vigna, 2019) seeded through SplitMix64. Every
// probabilistic decision in the engine draws from an `EngineRng`: progression
// transitions, density-layer gating, fill selection, phrase fallbacks and the
// humanizer's noise permutation. Identical seeds and identical input tick
// sequences therefore reproduce identical performances.
//
// Generators that must not perturb each other's streams take a `fork()`ed
// child instead of sharing one generator: the child is seeded from the
// parent's next output mixed with a caller salt, so adding a draw to one
// generator never shifts the notes of another.
//
// **Critical constraint: determinism.** No floating point inside the core
// generator, no OS entropy, no global state.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG: the engine's sole source of randomness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRng {
    s: [u64; 4],
}

impl EngineRng {
    /// Create a generator from a `u64` seed.
    ///
    /// SplitMix64 expands the seed into the 256-bit state, so nearby seeds
    /// still produce unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive an independent child generator.
    ///
    /// Consumes one value from `self`; the child's stream depends on that
    /// value and `salt` only.
    pub fn fork(&mut self, salt: u64) -> Self {
        let base = self.next_u64() ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self::new(base)
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform `f64` in `[low, high)`. Returns `low` when the range is empty.
    pub fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        low + self.next_f64() * (high - low)
    }

    /// Uniform integer in `[low, high)` with rejection sampling.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Uniform `usize` in `[low, high)`. Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// `true` with probability `p`. `p <= 0` never fires, `p >= 1` always does.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick a uniformly random element, or `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.range_usize(0, items.len());
        items.get(idx)
    }

    /// Weighted index selection.
    ///
    /// Negative and non-finite weights count as zero. When every weight is
    /// zero the choice is uniform over all indices, so a degenerate table
    /// still yields a value. Returns `None` only for an empty slice.
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().copied().map(clean).sum();
        if total <= 0.0 {
            return Some(self.range_usize(0, weights.len()));
        }
        let target = self.next_f64() * total;
        let mut cumulative = 0.0;
        let mut last_positive = 0;
        for (i, &w) in weights.iter().enumerate() {
            let w = clean(w);
            if w > 0.0 {
                last_positive = i;
            }
            cumulative += w;
            if cumulative > target {
                return Some(i);
            }
        }
        // Rounding can leave `target` a hair above the final sum.
        Some(last_positive)
    }
}

/// SplitMix64, used only to expand a `u64` seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = EngineRng::new(42);
        let mut b = EngineRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = EngineRng::new(42);
        let mut b = EngineRng::new(43);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = EngineRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn range_f64_empty_range_returns_low() {
        let mut rng = EngineRng::new(1);
        assert_eq!(rng.range_f64(3.0, 3.0), 3.0);
        assert_eq!(rng.range_f64(3.0, 1.0), 3.0);
        for _ in 0..1000 {
            let v = rng.range_f64(-2.0, 2.0);
            assert!((-2.0..2.0).contains(&v));
        }
    }

    #[test]
    fn range_usize_within_bounds() {
        let mut rng = EngineRng::new(555);
        for _ in 0..10_000 {
            let v = rng.range_usize(5, 15);
            assert!((5..15).contains(&v), "range_usize out of range: {v}");
        }
    }

    #[test]
    fn random_bool_extremes() {
        let mut rng = EngineRng::new(42);
        for _ in 0..100 {
            assert!(!rng.random_bool(0.0));
            assert!(rng.random_bool(1.0));
        }
    }

    #[test]
    fn weighted_index_respects_zero_weights() {
        let mut rng = EngineRng::new(7);
        for _ in 0..2000 {
            let idx = rng.weighted_index(&[0.0, 3.0, 0.0, 1.0]).unwrap();
            assert!(idx == 1 || idx == 3, "picked zero-weight index {idx}");
        }
    }

    #[test]
    fn weighted_index_all_zero_is_uniform() {
        let mut rng = EngineRng::new(9);
        let mut counts = [0usize; 4];
        for _ in 0..4000 {
            counts[rng.weighted_index(&[0.0; 4]).unwrap()] += 1;
        }
        for c in counts {
            assert!(c > 800, "uniform fallback is skewed: {counts:?}");
        }
        assert_eq!(rng.weighted_index(&[]), None);
    }

    #[test]
    fn weighted_index_ignores_nan_and_negative() {
        let mut rng = EngineRng::new(11);
        for _ in 0..500 {
            let idx = rng.weighted_index(&[f64::NAN, -4.0, 2.0]).unwrap();
            assert_eq!(idx, 2);
        }
    }

    #[test]
    fn fork_is_deterministic_and_salted() {
        let mut a = EngineRng::new(5);
        let mut b = EngineRng::new(5);
        let mut ca = a.fork(1);
        let mut cb = b.fork(1);
        assert_eq!(ca.next_u64(), cb.next_u64());

        let mut c = EngineRng::new(5);
        let mut other = c.fork(2);
        let mut d = EngineRng::new(5);
        let mut same = d.fork(1);
        assert_ne!(other.next_u64(), same.next_u64());
    }

    #[test]
    fn choose_handles_empty() {
        let mut rng = EngineRng::new(3);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert_eq!(rng.choose(&[4u8]), Some(&4));
    }

    #[test]
    fn serialization_roundtrip_continues_stream() {
        let mut rng = EngineRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: EngineRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
