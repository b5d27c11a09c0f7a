//! Per-output-position banding ("envelope") for sub-quadratic DP memory.
//! Grounded on spec.md §3/§4.3 and Open Question (a) in §9.

use crate::error::Error;

/// A half-open input-index range per output position. `(in_pos, out_pos)`
/// is active iff `in_start[out_pos] <= in_pos < in_end[out_pos]`.
#[derive(Debug, Clone)]
pub struct Envelope {
    in_start: Vec<usize>,
    in_end: Vec<usize>,
}

impl Envelope {
    /// The default envelope: the full `(inLen+1) x (outLen+1)` rectangle.
    pub fn full_rectangle(in_len: usize, out_len: usize) -> Self {
        Self {
            in_start: vec![0; out_len + 1],
            in_end: vec![in_len + 1; out_len + 1],
        }
    }

    /// A band of the given half-width around the straight line from
    /// `(0, 0)` to `(in_len, out_len)`, clamped so the corners stay active.
    /// Used by banded/diagonal alignments (spec.md S3 scenario).
    pub fn diagonal_band(in_len: usize, out_len: usize, half_width: usize) -> Self {
        let mut in_start = Vec::with_capacity(out_len + 1);
        let mut in_end = Vec::with_capacity(out_len + 1);
        for j in 0..=out_len {
            let center = if out_len == 0 {
                0
            } else {
                (j * in_len) / out_len
            };
            let lo = center.saturating_sub(half_width);
            let hi = (center + half_width + 1).min(in_len + 1);
            in_start.push(lo);
            in_end.push(hi.max(lo + 1));
        }
        // force both corners active regardless of rounding
        in_start[0] = 0;
        in_end[0] = in_end[0].max(1);
        let last = out_len;
        in_start[last] = in_start[last].min(in_len);
        in_end[last] = in_end[last].max(in_len + 1);
        Self { in_start, in_end }
    }

    /// Build from explicit per-column bounds, validating all invariants.
    pub fn new(in_start: Vec<usize>, in_end: Vec<usize>, in_len: usize) -> Result<Self, Error> {
        let env = Self { in_start, in_end };
        env.validate(in_len)?;
        Ok(env)
    }

    fn out_len(&self) -> usize {
        self.in_start.len().saturating_sub(1)
    }

    fn validate(&self, in_len: usize) -> Result<(), Error> {
        let out_len = self.out_len();
        if self.in_start.len() != out_len + 1 || self.in_end.len() != out_len + 1 {
            return Err(Error::EnvelopeInconsistent(
                "in_start/in_end length mismatch".to_string(),
            ));
        }
        for j in 0..=out_len {
            let (s, e) = (self.in_start[j], self.in_end[j]);
            if e <= s {
                // Open Question (a): empty columns are rejected outright
                // rather than treated as a silent no-op, so the reverse
                // iteration bound `in_end[j] - 1` in BackwardMatrix::fill
                // is always well-defined.
                return Err(Error::EnvelopeInconsistent(format!(
                    "column {j} is empty (in_start={s}, in_end={e})"
                )));
            }
            if e > in_len + 1 {
                return Err(Error::EnvelopeInconsistent(format!(
                    "column {j} extends past in_len: in_end={e} > {}",
                    in_len + 1
                )));
            }
        }
        if !(self.in_start[0] == 0 && self.in_end[0] >= 1) {
            return Err(Error::EnvelopeInconsistent(
                "corner (0, 0) is not active".to_string(),
            ));
        }
        if !(self.in_start[out_len] <= in_len && in_len < self.in_end[out_len]) {
            return Err(Error::EnvelopeInconsistent(format!(
                "corner ({in_len}, {out_len}) is not active"
            )));
        }
        for j in 1..=out_len {
            if self.in_start[j] > self.in_end[j - 1] || self.in_end[j] < self.in_start[j - 1] {
                return Err(Error::EnvelopeInconsistent(format!(
                    "columns {} and {j} are not connected",
                    j - 1
                )));
            }
        }
        Ok(())
    }

    /// Whether `(in_pos, out_pos)` is active.
    #[inline]
    pub fn is_active(&self, in_pos: usize, out_pos: usize) -> bool {
        in_pos >= self.in_start[out_pos] && in_pos < self.in_end[out_pos]
    }

    /// The half-open active range of input indices for `out_pos`.
    #[inline]
    pub fn range(&self, out_pos: usize) -> (usize, usize) {
        (self.in_start[out_pos], self.in_end[out_pos])
    }

    /// Total number of active cells across all columns (for one state);
    /// multiply by the machine's state count for the true cell count.
    pub fn num_columns_cells(&self) -> usize {
        self.in_start
            .iter()
            .zip(self.in_end.iter())
            .map(|(&s, &e)| e - s)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_rectangle_covers_everything() {
        let env = Envelope::full_rectangle(3, 2);
        for j in 0..=2 {
            for i in 0..=3 {
                assert!(env.is_active(i, j));
            }
        }
    }

    #[test]
    fn rejects_empty_column() {
        let err = Envelope::new(vec![0, 2, 0], vec![1, 2, 4], 3).unwrap_err();
        assert!(matches!(err, Error::EnvelopeInconsistent(_)));
    }

    #[test]
    fn rejects_inactive_corner() {
        // out_len=1, in_len=3: final corner (3,1) must be active.
        let err = Envelope::new(vec![0, 0], vec![2, 2], 3).unwrap_err();
        assert!(matches!(err, Error::EnvelopeInconsistent(_)));
    }

    #[test]
    fn diagonal_band_keeps_corners_active() {
        let env = Envelope::diagonal_band(10, 10, 1);
        assert!(env.is_active(0, 0));
        assert!(env.is_active(10, 10));
    }
}
