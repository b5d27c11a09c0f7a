//! Integer-quantized log-space arithmetic: a cached `log(1 + exp(x))`
//! table trading precision for speed in high-volume log-sum-exp calls.
//! Grounded on `examples/original_source/src/softplus.h`'s `SoftPlus`
//! class; kept alongside [`crate::numeric`]'s exact floating-point
//! log-sum-exp as an opt-in fast path rather than the DP core's default.

/// Integer log representation: a log value quantized to
/// [`SoftPlus::PRECISION`] and stored as a fixed-point integer.
pub type IntLog = i64;

/// Upper bound (in natural-log units) of the cached range. Beyond this,
/// `softplus` saturates to 0.
const CACHE_MAX_LOG: f64 = 10.0;

/// Quantization step of the integer log representation.
const PRECISION: f64 = 0.0001;

/// Saturating "infinity" sentinel for [`IntLog`] values, chosen well below
/// `i64::MAX` so additions in [`SoftPlus::int_logsumexp`] cannot overflow.
const INT_LOG_INFINITY: IntLog = 0x1FFF_FFFF;

/// Cached `log(1 + exp(-x))` table, quantized to [`PRECISION`] over
/// `x in [0, CACHE_MAX_LOG]`.
pub struct SoftPlus {
    cache: Vec<IntLog>,
}

impl SoftPlus {
    /// Build the cache. Grounded on the original's constructor: one
    /// `slow_softplus` evaluation per cache entry.
    pub fn new() -> Self {
        let entries = (CACHE_MAX_LOG / PRECISION) as usize + 1;
        let cache = (0..entries)
            .map(|n| Self::log_to_int(Self::slow_softplus(-Self::int_to_log(n as IntLog))))
            .collect();
        Self { cache }
    }

    fn int_softplus_neg(&self, x: IntLog) -> IntLog {
        debug_assert!(x >= 0, "int_softplus_neg: negative argument");
        if x as usize >= self.cache.len() {
            0
        } else {
            self.cache[x as usize]
        }
    }

    /// Quantize a natural log value to its integer representation.
    pub fn log_to_int(x: f64) -> IntLog {
        let log_infinity = PRECISION * INT_LOG_INFINITY as f64;
        if x <= -log_infinity {
            -INT_LOG_INFINITY
        } else if x >= log_infinity {
            INT_LOG_INFINITY
        } else {
            (0.5 + x / PRECISION) as IntLog
        }
    }

    /// Dequantize an integer log value back to a natural log.
    pub fn int_to_log(x: IntLog) -> f64 {
        if x <= -INT_LOG_INFINITY {
            f64::NEG_INFINITY
        } else if x >= INT_LOG_INFINITY {
            f64::INFINITY
        } else {
            PRECISION * x as f64
        }
    }

    /// `log_to_int(log(x))`, or `-infinity` for `x <= 0`.
    pub fn int_log(x: f64) -> IntLog {
        if x > 0.0 {
            Self::log_to_int(x.ln())
        } else {
            -INT_LOG_INFINITY
        }
    }

    /// `exp(int_to_log(x))`.
    pub fn int_exp(x: IntLog) -> f64 {
        Self::int_to_log(x).exp()
    }

    /// Clamp an [`IntLog`] to the representable range.
    pub fn bound_int_log(x: IntLog) -> IntLog {
        x.clamp(-INT_LOG_INFINITY, INT_LOG_INFINITY)
    }

    fn int_logsumexp_canonical(&self, larger: IntLog, smaller: IntLog) -> IntLog {
        if smaller <= -INT_LOG_INFINITY || larger >= INT_LOG_INFINITY {
            Self::bound_int_log(larger)
        } else {
            larger + self.int_softplus_neg(larger - smaller)
        }
    }

    /// Cached, quantized `log(exp(a) + exp(b))` on the integer log scale.
    pub fn int_logsumexp(&self, a: IntLog, b: IntLog) -> IntLog {
        if a > b {
            self.int_logsumexp_canonical(a, b)
        } else {
            self.int_logsumexp_canonical(b, a)
        }
    }

    /// `log(1 + exp(x))`, computed exactly (no cache).
    pub fn slow_softplus(x: f64) -> f64 {
        (1.0 + x.exp()).ln()
    }

    fn slow_logsumexp_canonical(larger: f64, smaller: f64) -> f64 {
        larger + Self::slow_softplus(smaller - larger)
    }

    /// `log(exp(a) + exp(b))`, computed exactly (no cache); matches
    /// [`crate::numeric::log_sum_exp`] and is kept for parity with the
    /// original's dual exact/cached API.
    pub fn slow_logsumexp(a: f64, b: f64) -> f64 {
        if a > b {
            Self::slow_logsumexp_canonical(a, b)
        } else {
            Self::slow_logsumexp_canonical(b, a)
        }
    }
}

impl Default for SoftPlus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_and_exact_logsumexp_agree_within_precision() {
        let sp = SoftPlus::new();
        let a = SoftPlus::int_log(3.0);
        let b = SoftPlus::int_log(5.0);
        let cached = SoftPlus::int_to_log(sp.int_logsumexp(a, b));
        let exact = SoftPlus::slow_logsumexp(3.0_f64.ln(), 5.0_f64.ln());
        assert!((cached - exact).abs() < 1e-3);
    }

    #[test]
    fn zero_probability_is_negative_infinity() {
        assert_eq!(SoftPlus::int_log(0.0), -INT_LOG_INFINITY);
        assert_eq!(SoftPlus::int_to_log(-INT_LOG_INFINITY), f64::NEG_INFINITY);
    }

    #[test]
    fn int_exp_round_trips_positive_probability() {
        let x = SoftPlus::int_log(0.5);
        assert!((SoftPlus::int_exp(x) - 0.5).abs() < 1e-3);
    }
}
