//! Warp-synchronous sum reduction.
//!
//! A [`Warp`] is the register file of one 32-lane warp. Reduction is an XOR
//! butterfly: at each step every lane swaps its partial with lane
//! `lane ^ offset` and adds, `offset` halving from `width / 2` to 1. After
//! `log2(width)` steps every lane holds the same total, because each pairwise
//! add is commutative. No shared memory and no barrier are involved; on CUDA
//! the exchange is `__shfl_xor_sync` with [`FULL_MASK`].

use std::ops::Add;

use syncbn_common::{Result, invalid_launch};

/// Lanes per warp.
pub const WARP_SIZE: usize = 32;

/// Participation mask naming every lane of the warp.
pub const FULL_MASK: u32 = 0xffff_ffff;

/// Values that can travel through a lane exchange and be summed.
pub trait LaneValue: Copy + Default + Add<Output = Self> + Send + Sync {}

impl<T> LaneValue for T where T: Copy + Default + Add<Output = T> + Send + Sync {}

/// Two accumulators reduced together, e.g. `(sum, sqsum)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Float2 {
    pub v1: f32,
    pub v2: f32,
}

impl Float2 {
    #[inline]
    pub const fn new(v1: f32, v2: f32) -> Self {
        Self { v1, v2 }
    }
}

impl Add for Float2 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self { v1: self.v1 + rhs.v1, v2: self.v2 + rhs.v2 }
    }
}

/// Register file of a single warp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Warp<T> {
    lanes: [T; WARP_SIZE],
    mask: u32,
}

impl<T: LaneValue> Warp<T> {
    /// Load up to [`WARP_SIZE`] values into lanes `0..values.len()`; the
    /// remaining lanes hold zero and still take part in the exchange.
    ///
    /// # Errors
    ///
    /// `InvalidLaunch` for more than [`WARP_SIZE`] values.
    pub fn load(values: &[T]) -> Result<Self> {
        Self::with_mask(values, FULL_MASK)
    }

    /// Like [`Warp::load`], with only the lanes named by `mask` taking part in
    /// exchanges. Lanes outside `mask` are inactive: they neither read nor
    /// accumulate, and a lane whose partner is inactive keeps its own value.
    pub fn with_mask(values: &[T], mask: u32) -> Result<Self> {
        if values.len() > WARP_SIZE {
            return Err(invalid_launch(format!(
                "a warp holds at most {WARP_SIZE} values, got {}",
                values.len()
            )));
        }
        let mut lanes = [T::default(); WARP_SIZE];
        lanes[..values.len()].copy_from_slice(values);
        Ok(Self { lanes, mask })
    }

    /// Value held by `lane`.
    #[inline]
    pub fn lane(&self, lane: usize) -> T {
        self.lanes[lane]
    }

    pub fn lanes(&self) -> &[T; WARP_SIZE] {
        &self.lanes
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    fn active(&self, lane: usize) -> bool {
        self.mask & (1 << lane) != 0
    }

    /// `__shfl_xor_sync(mask, v, lane_mask, width)` for every lane at once.
    ///
    /// Each active lane reads the register of `lane ^ lane_mask`. A source
    /// outside the lane's `width` segment, or outside the mask, yields the
    /// lane's own value.
    ///
    /// # Errors
    ///
    /// `InvalidLaunch` unless `width` is a power of two no larger than
    /// [`WARP_SIZE`].
    pub fn shfl_xor(&self, lane_mask: usize, width: usize) -> Result<Self> {
        check_width(width)?;
        let mut out = self.lanes;
        for (lane, slot) in out.iter_mut().enumerate() {
            let src = lane ^ lane_mask;
            let same_segment = src < WARP_SIZE && src / width == lane / width;
            if same_segment && self.active(lane) && self.active(src) {
                *slot = self.lanes[src];
            }
        }
        Ok(Self { lanes: out, mask: self.mask })
    }

    /// Butterfly all-reduce over segments of `width` lanes.
    ///
    /// # Errors
    ///
    /// `InvalidLaunch` unless `width` is a power of two no larger than
    /// [`WARP_SIZE`].
    pub fn reduce_sum(self, width: usize) -> Result<Self> {
        check_width(width)?;
        let mut acc = self;
        let mut offset = width / 2;
        while offset > 0 {
            let other = acc.shfl_xor(offset, width)?;
            for (lane, (a, b)) in acc.lanes.iter_mut().zip(other.lanes).enumerate() {
                if self.active(lane) {
                    *a = *a + b;
                }
            }
            offset /= 2;
        }
        Ok(acc)
    }
}

fn check_width(width: usize) -> Result<()> {
    if width == 0 || !width.is_power_of_two() || width > WARP_SIZE {
        return Err(invalid_launch(format!(
            "warp reduce width must be a power of two <= {WARP_SIZE}, got {width}"
        )));
    }
    Ok(())
}

/// Sum of up to [`WARP_SIZE`] values through a full-width butterfly.
///
/// # Errors
///
/// `InvalidLaunch` for more than [`WARP_SIZE`] values.
pub fn warp_sum<T: LaneValue>(values: &[T]) -> Result<T> {
    Ok(Warp::load(values)?.reduce_sum(WARP_SIZE)?.lane(0))
}
