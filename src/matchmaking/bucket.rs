//! Skill sampling and fixed-width bucketing
//!
//! A request's target skill is perturbed by a normal sample (Box–Muller), clipped
//! to three deviations either side, rounded and assigned to a bucket. Looser
//! deviations therefore spread across neighbouring buckets.

use rand::Rng;
use std::f64::consts::PI;

/// Width used when none is configured
pub const DEFAULT_BUCKET_WIDTH: i64 = 50;

/// Largest skill magnitude a request may sample; keeps buckets well inside `i64`
pub const MAX_SKILL_MAGNITUDE: f64 = 1.0e9;

/// Half-open skill range `[lower, upper)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkillBucket {
    pub lower: i64,
    pub upper: i64,
}

impl SkillBucket {
    /// The bucket of the given width that holds `skill`
    pub fn containing(skill: i64, width: i64) -> Self {
        let lower = skill.div_euclid(width).saturating_mul(width);
        Self {
            lower,
            upper: lower.saturating_add(width),
        }
    }

    /// Identifier used in queue keys, e.g. `1200-1250`
    pub fn id(&self) -> String {
        format!("{}-{}", self.lower, self.upper)
    }

    pub fn contains(&self, skill: i64) -> bool {
        self.lower <= skill && skill < self.upper
    }
}

impl std::fmt::Display for SkillBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.lower, self.upper)
    }
}

/// Everything the intake needs to know about one sampled request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkillSample {
    /// Value drawn before clipping
    pub raw: f64,
    /// Value after clipping to `target ± 3·deviation`
    pub clipped: f64,
    /// Rounded clipped value; this is what gets bucketed
    pub rounded: i64,
    pub bucket: SkillBucket,
}

/// Draw from `N(mean, std_dev²)` with the Box–Muller transform
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    // gen() yields [0, 1); flip it so ln never sees zero
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev + mean
}

/// Sample, clip, round and bucket a target skill.
/// A non-positive (or NaN) deviation skips sampling entirely.
pub fn sample_skill<R: Rng + ?Sized>(
    rng: &mut R,
    target_skill: f64,
    skill_deviation: f64,
    bucket_width: i64,
) -> SkillSample {
    let (raw, clipped) = if skill_deviation > 0.0 {
        let raw = sample_normal(rng, target_skill, skill_deviation);
        let spread = 3.0 * skill_deviation;
        (raw, raw.clamp(target_skill - spread, target_skill + spread))
    } else {
        (target_skill, target_skill)
    };

    let rounded = clipped.round() as i64;

    SkillSample {
        raw,
        clipped,
        rounded,
        bucket: SkillBucket::containing(rounded, bucket_width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(SkillBucket::containing(1223, 50).id(), "1200-1250");
        assert_eq!(SkillBucket::containing(1200, 50).id(), "1200-1250");
        assert_eq!(SkillBucket::containing(1250, 50).id(), "1250-1300");
        assert_eq!(SkillBucket::containing(0, 50).id(), "0-50");
        assert_eq!(SkillBucket::containing(-1, 50).id(), "-50-0");
    }

    #[test]
    fn test_extreme_skills_do_not_overflow() {
        let top = SkillBucket::containing(i64::MAX, 50);
        assert!(top.lower <= top.upper);
        let bottom = SkillBucket::containing(i64::MIN, 50);
        assert!(bottom.lower <= bottom.upper);
    }

    #[test]
    fn test_zero_deviation_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let sample = sample_skill(&mut rng, 1200.0, 0.0, DEFAULT_BUCKET_WIDTH);
            assert_eq!(sample.rounded, 1200);
            assert_eq!(sample.bucket.id(), "1200-1250");
        }
    }

    #[test]
    fn test_negative_deviation_skips_sampling() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = sample_skill(&mut rng, 1337.0, -10.0, DEFAULT_BUCKET_WIDTH);
        assert_eq!(sample.raw, 1337.0);
        assert_eq!(sample.bucket.id(), "1300-1350");
    }

    #[test]
    fn test_wide_deviation_spreads_across_buckets() {
        let mut rng = StdRng::seed_from_u64(42);
        let buckets: std::collections::HashSet<_> = (0..500)
            .map(|_| sample_skill(&mut rng, 1500.0, 100.0, DEFAULT_BUCKET_WIDTH).bucket)
            .collect();
        assert!(buckets.len() > 3);
    }

    #[test]
    fn test_normal_sample_mean_is_close() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = 20_000;
        let mean: f64 = (0..n)
            .map(|_| sample_normal(&mut rng, 1000.0, 50.0))
            .sum::<f64>()
            / n as f64;
        assert!((mean - 1000.0).abs() < 2.0, "mean drifted to {}", mean);
    }

    proptest! {
        #[test]
        fn prop_sample_stays_within_three_deviations(
            seed in any::<u64>(),
            target in -500.0f64..3500.0,
            deviation in 0.01f64..600.0,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let sample = sample_skill(&mut rng, target, deviation, DEFAULT_BUCKET_WIDTH);

            prop_assert!((sample.clipped - target).abs() <= 3.0 * deviation + 1e-9);
            prop_assert!(sample.bucket.contains(sample.rounded));
            prop_assert!(sample.bucket.lower as f64 <= sample.rounded as f64);
            prop_assert!((sample.rounded as f64) < sample.bucket.upper as f64);
            prop_assert_eq!(sample.bucket.upper - sample.bucket.lower, DEFAULT_BUCKET_WIDTH);
        }

        #[test]
        fn prop_zero_deviation_bucket_is_floor_division(target in -2000i64..5000) {
            let mut rng = StdRng::seed_from_u64(0);
            let sample = sample_skill(&mut rng, target as f64, 0.0, DEFAULT_BUCKET_WIDTH);
            let expected = (target as f64 / 50.0).floor() as i64 * 50;
            prop_assert_eq!(sample.bucket.lower, expected);
        }
    }
}
