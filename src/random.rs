// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Seeded operand generation.
//!
//! Values are drawn as `uniform_int(0, range - 1) / range`, so every element
//! lies in `[0, 1)` on a grid of `1 / range`. The same seed produces the same
//! tensors on every run and every host.

use std::num::NonZeroU32;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::ConfigError;
use crate::tensor::{TensorBuffer, TensorError};

pub const DEFAULT_SEED: u64 = 643;

pub const DEFAULT_RANGE: NonZeroU32 = match NonZeroU32::new(100) {
    Some(v) => v,
    None => unreachable!(),
};

/// Widest accepted range. Up to `2^24` both `step` and `range` are exact in
/// `f32` and `(range - 1) / range` rounds strictly below 1.0.
pub const MAX_RANGE: u32 = 1 << 24;

/// Reject ranges whose top values would round up to 1.0.
pub fn check_range(range: NonZeroU32) -> Result<NonZeroU32, ConfigError> {
    if range.get() > MAX_RANGE {
        return Err(ConfigError::RangeTooLarge {
            range: range.get(),
            max: MAX_RANGE,
        });
    }
    Ok(range)
}

/// Reproducible fill source for input and weight tensors.
#[derive(Debug, Clone)]
pub struct RandomTensorGenerator {
    rng: ChaCha8Rng,
    seed: u64,
    range: NonZeroU32,
}

impl RandomTensorGenerator {
    pub fn new(seed: u64, range: NonZeroU32) -> Result<Self, ConfigError> {
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            range: check_range(range)?,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn range(&self) -> NonZeroU32 {
        self.range
    }

    /// Rewind to the initial state.
    pub fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }

    pub fn next_value(&mut self) -> f32 {
        let range = self.range.get();
        let step = self.rng.random_range(0..range);
        step as f32 / range as f32
    }

    /// Overwrite every element of `tensor`, in memory order.
    pub fn fill(&mut self, tensor: &mut TensorBuffer) {
        for slot in tensor.as_mut_slice() {
            *slot = self.next_value();
        }
    }

    /// Fill `primary` and copy it into `mirror`, so the reference and device
    /// copies of an operand hold identical bits.
    pub fn fill_pair(
        &mut self,
        primary: &mut TensorBuffer,
        mirror: &mut TensorBuffer,
    ) -> Result<(), TensorError> {
        mirror.expect_dims(primary.dims())?;
        self.fill(primary);
        mirror.copy_from(primary)
    }
}

impl Default for RandomTensorGenerator {
    fn default() -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(DEFAULT_SEED),
            seed: DEFAULT_SEED,
            range: DEFAULT_RANGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorRole;

    fn buffer(dims: [usize; 4]) -> TensorBuffer {
        TensorBuffer::zeros(TensorRole::Input, dims).unwrap()
    }

    #[test]
    fn same_seed_same_values() {
        let mut a = buffer([2, 3, 4, 4]);
        let mut b = buffer([2, 3, 4, 4]);
        RandomTensorGenerator::default().fill(&mut a);
        RandomTensorGenerator::default().fill(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn values_sit_on_the_range_grid() {
        let range = NonZeroU32::new(8).unwrap();
        let mut gen = RandomTensorGenerator::new(7, range).unwrap();
        let mut t = buffer([1, 4, 8, 8]);
        gen.fill(&mut t);
        for v in t.as_slice() {
            assert!((0.0..1.0).contains(v));
            let scaled = v * 8.0;
            assert_eq!(scaled, scaled.trunc());
        }
    }

    #[test]
    fn range_of_one_is_all_zero() {
        let mut gen = RandomTensorGenerator::new(1, NonZeroU32::MIN).unwrap();
        let mut t = buffer([1, 1, 3, 3]);
        t.fill(5.0);
        gen.fill(&mut t);
        assert!(t.is_zeroed());
    }

    #[test]
    fn pair_is_bit_identical() {
        let mut gen = RandomTensorGenerator::default();
        let mut a = buffer([1, 2, 5, 5]);
        let mut b = buffer([1, 2, 5, 5]);
        gen.fill_pair(&mut a, &mut b).unwrap();
        let bits_a: Vec<u32> = a.as_slice().iter().map(|v| v.to_bits()).collect();
        let bits_b: Vec<u32> = b.as_slice().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn pair_with_different_shapes_fails() {
        let mut gen = RandomTensorGenerator::default();
        let mut a = buffer([1, 2, 5, 5]);
        let mut b = buffer([1, 2, 5, 4]);
        assert!(matches!(
            gen.fill_pair(&mut a, &mut b),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reset_replays_the_stream() {
        let mut gen = RandomTensorGenerator::new(99, DEFAULT_RANGE).unwrap();
        let first: Vec<f32> = (0..16).map(|_| gen.next_value()).collect();
        gen.reset();
        let again: Vec<f32> = (0..16).map(|_| gen.next_value()).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn widest_range_stays_below_one() {
        let max = NonZeroU32::new(MAX_RANGE).unwrap();
        assert!(RandomTensorGenerator::new(3, max).is_ok());
        let top = (MAX_RANGE - 1) as f32 / MAX_RANGE as f32;
        assert!(top < 1.0);
    }

    #[test]
    fn range_past_the_cap_is_rejected() {
        let too_wide = NonZeroU32::new(MAX_RANGE + 1).unwrap();
        // Without the cap the top step would round to exactly 1.0.
        assert_eq!(MAX_RANGE as f32 / (MAX_RANGE + 1) as f32, 1.0);
        assert_eq!(
            RandomTensorGenerator::new(3, too_wide).unwrap_err(),
            ConfigError::RangeTooLarge {
                range: MAX_RANGE + 1,
                max: MAX_RANGE,
            }
        );
    }
}
