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

//! Flat, row-major 4-axis tensors.
//!
//! All three operands of a run share one layout: axis 0 is the outermost
//! (batch, or output depth for weights) and axis 3 the innermost column.
//! The element at `(a, b, c, d)` of a tensor with extents `(A, B, C, D)`
//! lives at `((a * B + b) * C + c) * D + d`.

use std::fmt;

use serde::Serialize;

/// Which operand a buffer holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TensorRole {
    Input,
    Weight,
    Output,
}

impl fmt::Display for TensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorRole::Input => write!(f, "input"),
            TensorRole::Weight => write!(f, "weight"),
            TensorRole::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TensorError {
    /// Index outside the tensor's extents.
    #[error("index {index:?} out of bounds for {role} tensor of shape {dims:?}")]
    IndexOutOfBounds {
        role: TensorRole,
        index: [usize; 4],
        dims: [usize; 4],
    },
    /// Operand shape does not match what the layer requires.
    #[error("{role} tensor has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        role: TensorRole,
        expected: [usize; 4],
        actual: [usize; 4],
    },
    /// Host memory for a buffer could not be reserved.
    #[error("failed to allocate {elems} elements for {role} buffer")]
    Allocation { role: TensorRole, elems: usize },
    /// Accumulating convolution targets must start at zero.
    #[error("output buffer must be zero-filled before accumulation")]
    OutputNotZeroed,
}

/// Extents of a 4-axis tensor plus its row-major strides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Shape4 {
    dims: [usize; 4],
    strides: [usize; 4],
}

impl Shape4 {
    /// `None` when the element count does not fit in `usize`.
    pub fn new(dims: [usize; 4]) -> Option<Self> {
        let [d0, d1, d2, d3] = dims;
        let s1 = d2.checked_mul(d3)?;
        let s0 = d1.checked_mul(s1)?;
        d0.checked_mul(s0)?;
        Some(Self {
            dims,
            strides: [s0, s1, d3, 1],
        })
    }

    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    pub fn strides(&self) -> [usize; 4] {
        self.strides
    }

    pub fn numel(&self) -> usize {
        self.dims[0] * self.strides[0]
    }

    pub fn contains(&self, index: [usize; 4]) -> bool {
        index.iter().zip(self.dims.iter()).all(|(i, d)| i < d)
    }

    /// Flat offset of an in-bounds index.
    #[inline]
    pub fn offset(&self, index: [usize; 4]) -> Option<usize> {
        if !self.contains(index) {
            return None;
        }
        Some(
            index
                .iter()
                .zip(self.strides.iter())
                .map(|(i, s)| i * s)
                .sum(),
        )
    }

    /// Inverse of [`Shape4::offset`].
    pub fn unravel(&self, mut flat: usize) -> [usize; 4] {
        let mut index = [0usize; 4];
        for (slot, stride) in index.iter_mut().zip(self.strides.iter()) {
            *slot = flat / stride;
            flat %= stride;
        }
        index
    }
}

impl fmt::Display for Shape4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.dims;
        write!(f, "{a}x{b}x{c}x{d}")
    }
}

/// Fixed-shape `f32` tensor owned by one run.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorBuffer {
    role: TensorRole,
    shape: Shape4,
    data: Vec<f32>,
}

fn checked_shape(role: TensorRole, dims: [usize; 4]) -> Result<Shape4, TensorError> {
    Shape4::new(dims).ok_or(TensorError::Allocation {
        role,
        elems: dims.iter().fold(1usize, |acc, d| acc.saturating_mul(*d)),
    })
}

impl TensorBuffer {
    /// Allocate a zero-filled buffer, reporting allocation failure instead of
    /// aborting.
    pub fn zeros(role: TensorRole, dims: [usize; 4]) -> Result<Self, TensorError> {
        let shape = checked_shape(role, dims)?;
        let elems = shape.numel();
        let mut data = Vec::new();
        data.try_reserve_exact(elems)
            .map_err(|_| TensorError::Allocation { role, elems })?;
        data.resize(elems, 0.0);
        Ok(Self { role, shape, data })
    }

    /// Wrap existing data, e.g. golden fixtures loaded from elsewhere.
    pub fn from_vec(role: TensorRole, dims: [usize; 4], data: Vec<f32>) -> Result<Self, TensorError> {
        let shape = checked_shape(role, dims)?;
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                role,
                expected: dims,
                actual: [data.len(), 1, 1, 1],
            });
        }
        Ok(Self { role, shape, data })
    }

    pub fn role(&self) -> TensorRole {
        self.role
    }

    pub fn shape(&self) -> Shape4 {
        self.shape
    }

    pub fn dims(&self) -> [usize; 4] {
        self.shape.dims()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Bounds-checked flat offset of `(i0, i1, i2, i3)`.
    pub fn index(&self, i0: usize, i1: usize, i2: usize, i3: usize) -> Result<usize, TensorError> {
        let index = [i0, i1, i2, i3];
        self.shape
            .offset(index)
            .ok_or(TensorError::IndexOutOfBounds {
                role: self.role,
                index,
                dims: self.shape.dims(),
            })
    }

    pub fn get(&self, i0: usize, i1: usize, i2: usize, i3: usize) -> Result<f32, TensorError> {
        Ok(self.data[self.index(i0, i1, i2, i3)?])
    }

    pub fn set(
        &mut self,
        i0: usize,
        i1: usize,
        i2: usize,
        i3: usize,
        value: f32,
    ) -> Result<(), TensorError> {
        let idx = self.index(i0, i1, i2, i3)?;
        self.data[idx] = value;
        Ok(())
    }

    pub fn add(
        &mut self,
        i0: usize,
        i1: usize,
        i2: usize,
        i3: usize,
        value: f32,
    ) -> Result<(), TensorError> {
        let idx = self.index(i0, i1, i2, i3)?;
        self.data[idx] += value;
        Ok(())
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// True when every element is exactly `+0.0` or `-0.0`.
    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }

    /// Copy `other`'s values verbatim; shapes must agree.
    pub fn copy_from(&mut self, other: &TensorBuffer) -> Result<(), TensorError> {
        self.expect_dims(other.dims())?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Fail with [`TensorError::ShapeMismatch`] unless the shape is `expected`.
    pub fn expect_dims(&self, expected: [usize; 4]) -> Result<(), TensorError> {
        if self.shape.dims() != expected {
            return Err(TensorError::ShapeMismatch {
                role: self.role,
                expected,
                actual: self.shape.dims(),
            });
        }
        Ok(())
    }
}
