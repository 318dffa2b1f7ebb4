//! Weighted random selection of a place.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::PlaceId;

/// Cumulative-weight roulette over place weights.
///
/// Holds one generator, seeded once at construction, shared by every draw.
pub struct Lottery {
    rng: Mutex<StdRng>,
}

impl fmt::Debug for Lottery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lottery").finish_non_exhaustive()
    }
}

impl Lottery {
    /// Creates a lottery. `None` seeds from OS entropy; a fixed seed makes
    /// draws reproducible.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draws one place with probability proportional to its weight.
    ///
    /// Returns `None` if `weights` is empty or its total is not a positive
    /// finite number.
    pub fn pick(&self, weights: &BTreeMap<PlaceId, f64>) -> Option<PlaceId> {
        let total: f64 = weights.values().sum();
        if !total.is_finite() || total <= 0.0 {
            return None;
        }

        let mut remaining = self.rng.lock().random_range(0.0..total);
        for (place_id, weight) in weights {
            remaining -= weight;
            if remaining < 0.0 {
                return Some(*place_id);
            }
        }
        // Rounding can leave a tiny positive remainder after the last place.
        weights.keys().next_back().copied()
    }
}

/// Normalizes weights into selection probabilities.
#[must_use]
pub fn chances(weights: &BTreeMap<PlaceId, f64>) -> BTreeMap<PlaceId, f64> {
    let total: f64 = weights.values().sum();
    weights
        .iter()
        .map(|(place_id, weight)| {
            let chance = if total > 0.0 { weight / total } else { 0.0 };
            (*place_id, chance)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_weightless_maps_pick_nothing() {
        let lottery = Lottery::new(Some(7));
        assert!(lottery.pick(&BTreeMap::new()).is_none());
        let zero = BTreeMap::from([(PlaceId::new(), 0.0)]);
        assert!(lottery.pick(&zero).is_none());
    }

    #[test]
    fn single_place_always_wins() {
        let lottery = Lottery::new(None);
        let only = PlaceId::new();
        let weights = BTreeMap::from([(only, 3.0)]);
        for _ in 0..50 {
            assert_eq!(lottery.pick(&weights), Some(only));
        }
    }

    #[test]
    fn zero_weight_place_is_never_picked() {
        let lottery = Lottery::new(Some(42));
        let (never, always) = (PlaceId::new(), PlaceId::new());
        let weights = BTreeMap::from([(never, 0.0), (always, 1.0)]);
        for _ in 0..200 {
            assert_eq!(lottery.pick(&weights), Some(always));
        }
    }

    #[test]
    fn draws_follow_the_weights() {
        let lottery = Lottery::new(Some(2021));
        let (heavy, light) = (PlaceId::new(), PlaceId::new());
        let weights = BTreeMap::from([(heavy, 9.0), (light, 1.0)]);
        let heavy_wins = (0..10_000)
            .filter(|_| lottery.pick(&weights) == Some(heavy))
            .count();
        assert!((8_500..=9_500).contains(&heavy_wins), "heavy won {heavy_wins}");
    }

    #[test]
    fn same_seed_same_draws() {
        let places: BTreeMap<PlaceId, f64> =
            (1..=5).map(|w| (PlaceId::new(), f64::from(w))).collect();
        let a = Lottery::new(Some(99));
        let b = Lottery::new(Some(99));
        for _ in 0..20 {
            assert_eq!(a.pick(&places), b.pick(&places));
        }
    }

    #[test]
    fn chances_sum_to_one() {
        let weights: BTreeMap<PlaceId, f64> =
            [3.0, 3.0, 3.0].into_iter().map(|w| (PlaceId::new(), w)).collect();
        let chances = chances(&weights);
        assert!(chances.values().all(|c| (c - 1.0 / 3.0).abs() < 1e-9));
        let sum: f64 = chances.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
