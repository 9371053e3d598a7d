//! The (N, C, S) activation layout.
//!
//! Every tensor the kernels touch is a flat, contiguous `f32` buffer in
//! row-major `(N, C, S)` order: element `(n, c, s)` lives at
//! `(n * C + c) * S + s`. Per-channel buffers have exactly `C` entries.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result, invalid_args};

/// Largest element count device code can index with a signed 32-bit integer.
pub const MAX_ELEMENTS: usize = i32::MAX as usize;

/// Batch × channel × spatial extents of an activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NcsShape {
    /// Batch instances (N).
    pub n: usize,
    /// Channels (C).
    pub c: usize,
    /// Spatial elements per channel-instance (S).
    pub s: usize,
}

impl NcsShape {
    pub const fn new(n: usize, c: usize, s: usize) -> Self {
        Self { n, c, s }
    }

    /// Build a shape from the signed scalars used by the raw entry points.
    pub fn from_i32(n: i32, c: i32, s: i32) -> Result<Self> {
        if n < 0 || c < 0 || s < 0 {
            return Err(invalid_args(format!(
                "shape scalars must be non-negative, got ({n}, {c}, {s})"
            )));
        }
        Ok(Self::new(n as usize, c as usize, s as usize))
    }

    /// Total element count `N * C * S`.
    ///
    /// # Errors
    ///
    /// [`KernelError::ShapeOverflow`] if the product overflows or exceeds
    /// [`MAX_ELEMENTS`].
    pub fn numel(&self) -> Result<usize> {
        self.n
            .checked_mul(self.c)
            .and_then(|nc| nc.checked_mul(self.s))
            .filter(|&total| total <= MAX_ELEMENTS)
            .ok_or_else(|| KernelError::ShapeOverflow { n: self.n, c: self.c, s: self.s }.into())
    }

    /// Elements reduced per channel, `M = N * S`.
    pub fn per_channel(&self) -> Result<usize> {
        // numel() bounds N*C*S; N*S alone may still overflow when C == 0.
        self.n
            .checked_mul(self.s)
            .filter(|&m| m <= MAX_ELEMENTS)
            .ok_or_else(|| KernelError::ShapeOverflow { n: self.n, c: self.c, s: self.s }.into())
    }

    /// Flat offset of element `(n, c, s)`.
    #[inline]
    pub fn offset(&self, n: usize, c: usize, s: usize) -> usize {
        (n * self.c + c) * self.s + s
    }

    /// Flat offset of the `i`-th element of channel `c`, walking the channel's
    /// `N * S` elements batch-major.
    #[inline]
    pub fn channel_offset(&self, c: usize, i: usize) -> usize {
        let n = i / self.s;
        let s = i - n * self.s;
        self.offset(n, c, s)
    }

    /// Channel of flat element `idx`. Requires `S > 0`.
    #[inline]
    pub fn channel_of(&self, idx: usize) -> usize {
        (idx / self.s) % self.c
    }

    /// Validate an `(N, C, S)` tensor buffer length.
    pub fn check_tensor(&self, name: &str, len: usize) -> Result<()> {
        let expected = self.numel()?;
        if len != expected {
            return Err(invalid_args(format!(
                "{name} length {len} != N*C*S = {expected} for shape {self}"
            )));
        }
        Ok(())
    }

    /// Validate a per-channel buffer length.
    pub fn check_channel(&self, name: &str, len: usize) -> Result<()> {
        if len != self.c {
            return Err(invalid_args(format!("{name} length {len} != C = {}", self.c)));
        }
        Ok(())
    }
}

impl std::fmt::Display for NcsShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.n, self.c, self.s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncBnError;

    #[test]
    fn offset_is_row_major() {
        let shape = NcsShape::new(2, 3, 4);
        assert_eq!(shape.offset(0, 0, 0), 0);
        assert_eq!(shape.offset(0, 1, 0), 4);
        assert_eq!(shape.offset(1, 0, 0), 12);
        assert_eq!(shape.offset(1, 2, 3), 23);
    }

    #[test]
    fn channel_offset_walks_batch_then_spatial() {
        let shape = NcsShape::new(2, 3, 4);
        let offsets: Vec<usize> = (0..8).map(|i| shape.channel_offset(1, i)).collect();
        assert_eq!(offsets, vec![4, 5, 6, 7, 16, 17, 18, 19]);
        for i in 0..8 {
            assert_eq!(shape.channel_of(shape.channel_offset(2, i)), 2);
        }
    }

    #[test]
    fn numel_and_per_channel() {
        let shape = NcsShape::new(2, 3, 4);
        assert_eq!(shape.numel().unwrap(), 24);
        assert_eq!(shape.per_channel().unwrap(), 8);
        assert_eq!(NcsShape::new(0, 3, 4).numel().unwrap(), 0);
    }

    #[test]
    fn numel_overflow_is_reported() {
        let shape = NcsShape::new(1 << 16, 1 << 16, 1);
        let err = shape.numel().unwrap_err();
        assert!(matches!(err, SyncBnError::Kernel(KernelError::ShapeOverflow { .. })));

        let huge = NcsShape::new(usize::MAX, 2, 2);
        assert!(huge.numel().is_err());
        assert!(NcsShape::new(usize::MAX, 0, 2).per_channel().is_err());
    }

    #[test]
    fn from_i32_rejects_negative() {
        assert!(NcsShape::from_i32(-1, 1, 1).is_err());
        assert_eq!(NcsShape::from_i32(2, 3, 4).unwrap(), NcsShape::new(2, 3, 4));
    }

    #[test]
    fn buffer_checks() {
        let shape = NcsShape::new(2, 3, 4);
        assert!(shape.check_tensor("x", 24).is_ok());
        let err = shape.check_tensor("x", 23).unwrap_err();
        assert!(err.to_string().contains("x length 23"));
        assert!(shape.check_channel("gamma", 3).is_ok());
        assert!(shape.check_channel("gamma", 4).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_channel_walk_is_a_partition(n in 1usize..6, c in 1usize..6, s in 1usize..12) {
            let shape = NcsShape::new(n, c, s);
            let total = shape.numel().unwrap();
            let mut seen = vec![false; total];
            for ch in 0..c {
                for i in 0..shape.per_channel().unwrap() {
                    let off = shape.channel_offset(ch, i);
                    proptest::prop_assert!(off < total);
                    proptest::prop_assert_eq!(shape.channel_of(off), ch);
                    proptest::prop_assert!(!seen[off], "offset {} visited twice", off);
                    seen[off] = true;
                }
            }
            proptest::prop_assert!(seen.iter().all(|&v| v));
        }
    }
}
