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

//! Golden-reference 2D convolution.
//!
//! Valid (unpadded) convolution over the whole batch:
//!
//! ```text
//! out[b, m, r, c] = sum_{n < N} sum_{i < K} sum_{j < K}
//!                   w[m, n, i, j] * x[b, n, S*r + i, S*c + j]
//! ```
//!
//! Each output element is accumulated in `(n, i, j)` order starting from
//! zero, so the result is bit-identical run to run, and the parallel path
//! (feature `rayon`) matches the serial one exactly: every `(b, m)` output
//! plane is owned by a single task.
//!
//! Complexity is O(batch * M * R * C * N * K^2). This is a correctness oracle,
//! not a fast path.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::config::LayerConfig;
use crate::tensor::{TensorBuffer, TensorError, TensorRole};

/// Outputs with fewer elements than this are computed on the calling thread.
#[cfg(feature = "rayon")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Compute the reference output into a freshly allocated buffer.
pub fn reference_conv2d(
    input: &TensorBuffer,
    weights: &TensorBuffer,
    layer: &LayerConfig,
) -> Result<TensorBuffer, TensorError> {
    let mut output = TensorBuffer::zeros(TensorRole::Output, layer.output_dims())?;
    reference_conv2d_into(input, weights, layer, &mut output)?;
    Ok(output)
}

/// Accumulate the reference output into `output`, which must be zero-filled
/// and shaped `(batch, M, R, C)`.
pub fn reference_conv2d_into(
    input: &TensorBuffer,
    weights: &TensorBuffer,
    layer: &LayerConfig,
    output: &mut TensorBuffer,
) -> Result<(), TensorError> {
    input.expect_dims(layer.input_dims())?;
    weights.expect_dims(layer.weight_dims())?;
    output.expect_dims(layer.output_dims())?;
    if !output.is_zeroed() {
        return Err(TensorError::OutputNotZeroed);
    }

    let geom = Geometry::from_layer(layer);
    let x = input.as_slice();
    let w = weights.as_slice();
    let plane_len = geom.rows * geom.cols;
    let out = output.as_mut_slice();

    #[cfg(feature = "rayon")]
    if out.len() >= PARALLEL_THRESHOLD {
        out.par_chunks_mut(plane_len)
            .enumerate()
            .for_each(|(plane, dst)| geom.plane(plane, x, w, dst));
        return Ok(());
    }

    for (plane, dst) in out.chunks_mut(plane_len).enumerate() {
        geom.plane(plane, x, w, dst);
    }
    Ok(())
}

/// Extents and strides needed by the inner loops.
#[derive(Clone, Copy)]
struct Geometry {
    kernel: usize,
    stride: usize,
    rows: usize,
    cols: usize,
    out_depth: usize,
    in_depth: usize,
    in_rows: usize,
    in_cols: usize,
}

impl Geometry {
    fn from_layer(layer: &LayerConfig) -> Self {
        let [_, in_depth, in_rows, in_cols] = layer.input_dims();
        let [_, out_depth, rows, cols] = layer.output_dims();
        Self {
            kernel: layer.kernel_size() as usize,
            stride: layer.stride() as usize,
            rows,
            cols,
            out_depth,
            in_depth,
            in_rows,
            in_cols,
        }
    }

    /// Fill the `(b, m)` plane with index `plane = b * M + m`.
    #[inline]
    fn plane(&self, plane: usize, x: &[f32], w: &[f32], dst: &mut [f32]) {
        let b = plane / self.out_depth;
        let m = plane % self.out_depth;
        let k = self.kernel;
        let in_plane = self.in_rows * self.in_cols;
        let x_batch = b * self.in_depth * in_plane;
        let w_filter = m * self.in_depth * k * k;

        for r in 0..self.rows {
            for c in 0..self.cols {
                let mut acc = dst[r * self.cols + c];
                for n in 0..self.in_depth {
                    let x_chan = x_batch + n * in_plane;
                    let w_chan = w_filter + n * k * k;
                    for i in 0..k {
                        let x_row = x_chan + (self.stride * r + i) * self.in_cols + self.stride * c;
                        let w_row = w_chan + i * k;
                        for j in 0..k {
                            acc += w[w_row + j] * x[x_row + j];
                        }
                    }
                }
                dst[r * self.cols + c] = acc;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(k: u64, s: u64, r: u64, c: u64, m: u64, n: u64, batch: u64) -> LayerConfig {
        LayerConfig::new(k, s, r, c, m, n, batch).unwrap()
    }

    #[test]
    fn single_channel_box_filter() {
        // 3x3 input of ones, 2x2 kernel of ones, stride 1: every output is 4.
        let l = layer(2, 1, 2, 2, 1, 1, 1);
        let x = TensorBuffer::from_vec(TensorRole::Input, l.input_dims(), vec![1.0; 9]).unwrap();
        let w = TensorBuffer::from_vec(TensorRole::Weight, l.weight_dims(), vec![1.0; 4]).unwrap();
        let out = reference_conv2d(&x, &w, &l).unwrap();
        assert_eq!(out.as_slice(), &[4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn stride_skips_input_positions() {
        // Input 1x1x3x3 = 0..9, kernel 1x1 weight 1, stride 2, 2x2 output.
        let l = layer(1, 2, 2, 2, 1, 1, 1);
        assert_eq!(l.input_dims(), [1, 1, 3, 3]);
        let x = TensorBuffer::from_vec(
            TensorRole::Input,
            l.input_dims(),
            (0..9).map(|v| v as f32).collect(),
        )
        .unwrap();
        let w = TensorBuffer::from_vec(TensorRole::Weight, l.weight_dims(), vec![1.0]).unwrap();
        let out = reference_conv2d(&x, &w, &l).unwrap();
        assert_eq!(out.as_slice(), &[0.0, 2.0, 6.0, 8.0]);
    }

    #[test]
    fn channels_are_summed() {
        let l = layer(1, 1, 1, 1, 1, 3, 1);
        let x = TensorBuffer::from_vec(TensorRole::Input, l.input_dims(), vec![1.0, 2.0, 3.0])
            .unwrap();
        let w = TensorBuffer::from_vec(TensorRole::Weight, l.weight_dims(), vec![0.5, 0.25, 2.0])
            .unwrap();
        let out = reference_conv2d(&x, &w, &l).unwrap();
        assert_eq!(out.as_slice(), &[0.5 + 0.5 + 6.0]);
    }

    #[test]
    fn dirty_output_is_rejected() {
        let l = layer(1, 1, 2, 2, 1, 1, 1);
        let x = TensorBuffer::zeros(TensorRole::Input, l.input_dims()).unwrap();
        let w = TensorBuffer::zeros(TensorRole::Weight, l.weight_dims()).unwrap();
        let mut out = TensorBuffer::zeros(TensorRole::Output, l.output_dims()).unwrap();
        out.set(0, 0, 1, 1, 3.0).unwrap();
        assert_eq!(
            reference_conv2d_into(&x, &w, &l, &mut out),
            Err(TensorError::OutputNotZeroed)
        );
    }

    #[test]
    fn wrong_weight_shape_is_rejected() {
        let l = layer(3, 1, 2, 2, 2, 2, 1);
        let x = TensorBuffer::zeros(TensorRole::Input, l.input_dims()).unwrap();
        let w = TensorBuffer::zeros(TensorRole::Weight, [2, 2, 3, 2]).unwrap();
        assert!(matches!(
            reference_conv2d(&x, &w, &l),
            Err(TensorError::ShapeMismatch {
                role: TensorRole::Weight,
                ..
            })
        ));
    }

    #[test]
    fn batches_are_independent() {
        let l = layer(2, 1, 2, 2, 1, 1, 2);
        let mut data = vec![1.0; 9];
        data.extend(vec![2.0; 9]);
        let x = TensorBuffer::from_vec(TensorRole::Input, l.input_dims(), data).unwrap();
        let w = TensorBuffer::from_vec(TensorRole::Weight, l.weight_dims(), vec![1.0; 4]).unwrap();
        let out = reference_conv2d(&x, &w, &l).unwrap();
        assert_eq!(out.as_slice(), &[4.0, 4.0, 4.0, 4.0, 8.0, 8.0, 8.0, 8.0]);
    }
}
