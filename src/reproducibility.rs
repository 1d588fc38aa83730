//! Process-wide reproducibility settings
//!
//! Seeding and the float32 matmul precision preference are global, have no
//! teardown, and must be applied once before any collaborator that consumes
//! randomness is built. Running two orchestrations in one process is not
//! supported: the second `apply` overwrites the first.
//!
//! Randomness is consumed two ways:
//! - parameter initialisation draws from the global [`StdRng`] reseeded by
//!   [`seed_everything`];
//! - data shuffling and augmentation use [`stream_rng`], a pure function of
//!   `(seed, stream, index)`, so results do not depend on which worker
//!   thread loads a sample or in which order workers finish.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

static GLOBAL_SEED: AtomicU64 = AtomicU64::new(0);
static SEEDED: AtomicBool = AtomicBool::new(false);
static GLOBAL_RNG: Mutex<Option<StdRng>> = Mutex::new(None);
static MATMUL_PRECISION: AtomicU8 = AtomicU8::new(MatmulPrecision::Highest as u8);

/// Stream identifiers for [`stream_rng`].
pub mod streams {
    /// Train/validation split of the case list.
    pub const SPLIT: u64 = 0x5350_4c49;
    /// Per-epoch shuffle of the training order.
    pub const SHUFFLE: u64 = 0x5348_5546;
    /// Per-sample augmentation (crop offsets, flips).
    pub const AUGMENT: u64 = 0x4155_474d;
}

/// Precision preference for float32 matrix products and reductions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MatmulPrecision {
    /// Accumulate in f64
    Highest = 0,
    /// Accumulate in f32
    #[default]
    High = 1,
    /// Accumulate in f32
    Medium = 2,
}

impl MatmulPrecision {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::High,
            2 => Self::Medium,
            _ => Self::Highest,
        }
    }

    /// Whether reductions should be carried in f64.
    pub fn accumulate_in_f64(self) -> bool {
        self == Self::Highest
    }
}

impl fmt::Display for MatmulPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Highest => "highest",
            Self::High => "high",
            Self::Medium => "medium",
        };
        f.write_str(s)
    }
}

impl FromStr for MatmulPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "highest" => Ok(Self::Highest),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            other => Err(format!(
                "unknown precision '{other}' (expected highest, high or medium)"
            )),
        }
    }
}

/// Set the process-wide float32 matmul precision preference.
pub fn set_float32_matmul_precision(precision: MatmulPrecision) {
    MATMUL_PRECISION.store(precision as u8, Ordering::SeqCst);
    tracing::debug!("float32 matmul precision set to {precision}");
}

/// Current float32 matmul precision preference.
pub fn float32_matmul_precision() -> MatmulPrecision {
    MatmulPrecision::from_u8(MATMUL_PRECISION.load(Ordering::SeqCst))
}

/// Seed every random source the crate consults.
///
/// Reseeds the global RNG and records `seed` so that [`global_seed`] reports
/// it. Data streams take their seed explicitly from the run configuration,
/// which is the same value.
pub fn seed_everything(seed: u64) -> u64 {
    GLOBAL_SEED.store(seed, Ordering::SeqCst);
    SEEDED.store(true, Ordering::SeqCst);
    let mut rng = GLOBAL_RNG.lock().unwrap_or_else(|e| e.into_inner());
    *rng = Some(StdRng::seed_from_u64(seed));
    tracing::info!("Seed set to {seed}");
    seed
}

/// The seed last passed to [`seed_everything`], if any.
pub fn global_seed() -> Option<u64> {
    SEEDED
        .load(Ordering::SeqCst)
        .then(|| GLOBAL_SEED.load(Ordering::SeqCst))
}

/// Run `f` with the global RNG.
///
/// An unseeded process gets an OS-entropy RNG on first use.
pub fn with_global_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut guard = GLOBAL_RNG.lock().unwrap_or_else(|e| e.into_inner());
    let rng = guard.get_or_insert_with(StdRng::from_os_rng);
    f(rng)
}

/// SplitMix64 finaliser.
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derive an independent seed from a base seed, a stream id and indices.
pub fn derive_seed(seed: u64, stream: u64, indices: &[u64]) -> u64 {
    indices
        .iter()
        .fold(mix64(seed ^ mix64(stream)), |acc, &i| mix64(acc ^ mix64(i)))
}

/// Deterministic RNG for `(seed, stream, indices)`.
pub fn stream_rng(seed: u64, stream: u64, indices: &[u64]) -> StdRng {
    StdRng::seed_from_u64(derive_seed(seed, stream, indices))
}

/// Reproducibility settings for one run, applied once at orchestrator start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReproducibilitySettings {
    /// Global seed
    pub seed: u64,
    /// Float32 matmul precision preference
    pub matmul_precision: MatmulPrecision,
}

impl ReproducibilitySettings {
    /// Settings with the given seed and `high` precision.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            matmul_precision: MatmulPrecision::High,
        }
    }

    /// Override the precision preference.
    pub fn with_matmul_precision(mut self, precision: MatmulPrecision) -> Self {
        self.matmul_precision = precision;
        self
    }

    /// Seed global randomness, then set the precision preference.
    pub fn apply(&self) {
        seed_everything(self.seed);
        set_float32_matmul_precision(self.matmul_precision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_stream_rng_is_deterministic() {
        let draw = || {
            let mut rng = stream_rng(7, streams::SHUFFLE, &[3]);
            (0..8).map(|_| rng.random::<u32>()).collect::<Vec<_>>()
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn test_derive_seed_separates_streams_and_indices() {
        let base = derive_seed(42, streams::SHUFFLE, &[0]);
        assert_ne!(base, derive_seed(42, streams::AUGMENT, &[0]));
        assert_ne!(base, derive_seed(42, streams::SHUFFLE, &[1]));
        assert_ne!(base, derive_seed(43, streams::SHUFFLE, &[0]));
        assert_ne!(
            derive_seed(1, streams::AUGMENT, &[2, 3]),
            derive_seed(1, streams::AUGMENT, &[3, 2])
        );
    }

    #[test]
    fn test_precision_parse_and_display() {
        for p in [
            MatmulPrecision::Highest,
            MatmulPrecision::High,
            MatmulPrecision::Medium,
        ] {
            assert_eq!(p.to_string().parse::<MatmulPrecision>(), Ok(p));
        }
        assert!("low".parse::<MatmulPrecision>().is_err());
        assert!(MatmulPrecision::Highest.accumulate_in_f64());
        assert!(!MatmulPrecision::Medium.accumulate_in_f64());
    }

    #[test]
    fn test_settings_builder() {
        let s = ReproducibilitySettings::new(5).with_matmul_precision(MatmulPrecision::Medium);
        assert_eq!(s.seed, 5);
        assert_eq!(s.matmul_precision, MatmulPrecision::Medium);
    }
}
