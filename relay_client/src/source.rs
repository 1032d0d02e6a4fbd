//! Position source.
//!
//! Stands in for device geolocation: produces a position report per call,
//! wandering a little from the previous fix. Seeded, so runs are repeatable.

use rand::{rngs::StdRng, Rng, SeedableRng};
use relay_shared::net::LocationUpdate;

/// Synthetic geolocation feed.
#[derive(Debug, Clone)]
pub struct LocationSource {
    latitude: f64,
    longitude: f64,
    /// Largest per-fix move, in degrees.
    step: f64,
    rng: StdRng,
}

impl LocationSource {
    pub fn new(latitude: f64, longitude: f64, step: f64, seed: u64) -> Self {
        Self {
            latitude,
            longitude,
            step: step.abs(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A source that never moves.
    pub fn fixed(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, 0.0, 0)
    }

    /// Produces the next fix, with a reported accuracy in metres.
    pub fn next_fix(&mut self) -> LocationUpdate {
        if self.step > 0.0 {
            self.latitude = (self.latitude + self.rng.gen_range(-self.step..=self.step)).clamp(-90.0, 90.0);
            self.longitude += self.rng.gen_range(-self.step..=self.step);
            if self.longitude >= 180.0 {
                self.longitude -= 360.0;
            } else if self.longitude < -180.0 {
                self.longitude += 360.0;
            }
        }
        let accuracy: f64 = self.rng.gen_range(3.0..25.0);
        LocationUpdate::new(self.latitude, self.longitude)
            .with_field("accuracy", (accuracy * 10.0).round() / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_stays_put() {
        let mut src = LocationSource::fixed(10.0, 20.0);
        for _ in 0..5 {
            let fix = src.next_fix();
            assert_eq!((fix.latitude, fix.longitude), (10.0, 20.0));
            assert!(fix.extra.contains_key("accuracy"));
        }
    }

    #[test]
    fn walk_is_bounded_and_repeatable() {
        let mut a = LocationSource::new(89.99, 179.99, 0.05, 7);
        let mut b = LocationSource::new(89.99, 179.99, 0.05, 7);
        for _ in 0..200 {
            let fa = a.next_fix();
            assert_eq!(fa, b.next_fix());
            assert!((-90.0..=90.0).contains(&fa.latitude));
            assert!((-180.0..180.0).contains(&fa.longitude));
        }
    }
}
