#![forbid(unsafe_code)]

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_CONST1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_CONST2: u64 = 0x94D0_49BB_1331_11EB;
pub const DEFAULT_RNG_SEED: u64 = 0x4D45_4741_4E49_0001;

pub const RANDOM_REASON_CODES: [&str; 3] = [
    "random_upper_bound_rejected",
    "random_range_inverted",
    "random_range_not_finite",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandomError {
    InvalidUpperBound,
    InvertedRange { low: i64, high: i64 },
    NonFiniteRange { low: f64, high: f64 },
}

impl RandomError {
    #[must_use]
    pub const fn reason_code(self) -> &'static str {
        match self {
            Self::InvalidUpperBound => "random_upper_bound_rejected",
            Self::InvertedRange { .. } => "random_range_inverted",
            Self::NonFiniteRange { .. } => "random_range_not_finite",
        }
    }
}

impl std::fmt::Display for RandomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUpperBound => write!(f, "upper_bound must be > 0"),
            Self::InvertedRange { low, high } => {
                write!(f, "range low={low} exceeds high={high}")
            }
            Self::NonFiniteRange { low, high } => {
                write!(f, "range [{low}, {high}) must be finite and ordered")
            }
        }
    }
}

impl std::error::Error for RandomError {}

/// Counter-based splitmix64 stream.
///
/// The state is `(seed, counter)`, so a draw position can be logged and replayed
/// exactly with [`DeterministicRng::from_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    stream_seed: u64,
    counter: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            stream_seed: seed,
            counter: 0,
        }
    }

    #[must_use]
    pub const fn from_state(seed: u64, counter: u64) -> Self {
        Self {
            stream_seed: seed,
            counter,
        }
    }

    #[must_use]
    pub const fn state(self) -> (u64, u64) {
        (self.stream_seed, self.counter)
    }

    #[must_use]
    pub const fn seed(self) -> u64 {
        self.stream_seed
    }

    #[must_use]
    pub const fn counter(self) -> u64 {
        self.counter
    }

    pub fn jump_ahead(&mut self, steps: u64) {
        self.counter = self.counter.wrapping_add(steps);
    }

    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        splitmix64(
            self.stream_seed
                .wrapping_add(self.counter.wrapping_mul(GOLDEN_GAMMA)),
        )
    }

    #[must_use]
    pub fn next_f64(&mut self) -> f64 {
        // High 53 bits fill the mantissa; result is in [0, 1).
        let sample = self.next_u64() >> 11;
        sample as f64 / (1u64 << 53) as f64
    }

    pub fn bounded_u64(&mut self, upper_bound: u64) -> Result<u64, RandomError> {
        if upper_bound == 0 {
            return Err(RandomError::InvalidUpperBound);
        }

        let threshold = u64::MAX - u64::MAX % upper_bound;

        loop {
            let candidate = self.next_u64();
            if candidate < threshold {
                return Ok(candidate % upper_bound);
            }
        }
    }

    /// Uniform integer in `low..=high`.
    pub fn uniform_i64(&mut self, low: i64, high: i64) -> Result<i64, RandomError> {
        if low > high {
            return Err(RandomError::InvertedRange { low, high });
        }
        let span = high.abs_diff(low);
        if span == u64::MAX {
            return Ok(self.next_u64() as i64);
        }
        let offset = self.bounded_u64(span + 1)?;
        Ok(low.wrapping_add_unsigned(offset))
    }

    /// Uniform size in `low..=high`, used for matrix dimensions.
    pub fn uniform_usize(&mut self, low: usize, high: usize) -> Result<usize, RandomError> {
        if low > high {
            return Err(RandomError::InvertedRange {
                low: i64::try_from(low).unwrap_or(i64::MAX),
                high: i64::try_from(high).unwrap_or(i64::MAX),
            });
        }
        let span = (high - low) as u64;
        let offset = self.bounded_u64(span.saturating_add(1))?;
        Ok(low + offset as usize)
    }

    /// Uniform float in `[low, high)`.
    pub fn uniform_f64(&mut self, low: f64, high: f64) -> Result<f64, RandomError> {
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(RandomError::NonFiniteRange { low, high });
        }
        Ok(low + (high - low) * self.next_f64())
    }

    #[must_use]
    pub fn fill_u64(&mut self, len: usize) -> Vec<u64> {
        (0..len).map(|_| self.next_u64()).collect()
    }

    pub fn fill_i64(&mut self, len: usize, low: i64, high: i64) -> Result<Vec<i64>, RandomError> {
        (0..len).map(|_| self.uniform_i64(low, high)).collect()
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(DEFAULT_RNG_SEED)
    }
}

#[must_use]
fn splitmix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(MIX_CONST1);
    z = (z ^ (z >> 27)).wrapping_mul(MIX_CONST2);
    z ^ (z >> 31)
}
