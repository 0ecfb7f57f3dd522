use core::num::NonZeroU32;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::catalog::{Catalog, ClipId};

/// Uniform random choice of the next clip.
///
/// Seed it once at boot from the hardware RNG so consecutive boots do not replay the
/// same sequence.
pub struct Selector {
    rng: SmallRng,
}

impl Selector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Uniform draw from `[1, catalog_size]`.
    pub fn select(&mut self, catalog_size: NonZeroU32) -> u32 {
        self.rng.gen_range(1..=catalog_size.get())
    }

    pub fn pick(&mut self, catalog: &Catalog) -> ClipId {
        let drawn = self.select(catalog.size());
        // `select` never returns 0.
        ClipId::new(drawn).unwrap_or(ClipId::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draws_stay_in_range() {
        let mut selector = Selector::new(0x5eed);
        for size in [1u32, 2, 3, 7, 100, u32::MAX] {
            let size = NonZeroU32::new(size).unwrap();
            for _ in 0..1000 {
                let drawn = selector.select(size);
                assert!(
                    (1..=size.get()).contains(&drawn),
                    "{drawn} outside [1, {size}]"
                );
            }
        }
    }

    #[test]
    fn test_every_value_is_reachable() {
        let mut selector = Selector::new(42);
        let size = NonZeroU32::new(10).unwrap();
        let mut seen = [0u32; 10];
        for _ in 0..10_000 {
            seen[selector.select(size) as usize - 1] += 1;
        }
        assert!(
            seen.iter().all(|&count| count > 0),
            "some values never drawn: {seen:?}"
        );
    }

    #[test]
    fn test_single_clip_catalog_always_picks_it() {
        let catalog = Catalog::new(1, "clip", "wav").unwrap();
        let mut selector = Selector::new(7);
        for _ in 0..100 {
            assert_eq!(selector.pick(&catalog), ClipId::MIN);
        }
    }

    #[test]
    fn test_different_seeds_give_different_sequences() {
        let size = NonZeroU32::new(1000).unwrap();
        let mut a = Selector::new(1);
        let mut b = Selector::new(2);
        let a: Vec<u32> = (0..16).map(|_| a.select(size)).collect();
        let b: Vec<u32> = (0..16).map(|_| b.select(size)).collect();
        assert_ne!(a, b);
    }
}
