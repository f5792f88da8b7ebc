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

//! Host-side accelerator emulator.
//!
//! Executes the same loop nest a tiled hardware kernel would: the output is
//! walked in `Tr x Tc` spatial tiles, `Tm` output channels and `Tn` input
//! channels at a time, and partial sums are accumulated straight into the
//! output buffer. The summation order therefore differs from the reference
//! convolution, which is exactly what the tolerance comparator is for.

use std::time::Instant;

use tracing::debug;

use super::{
    Accelerator, AcceleratorError, AcceleratorStage, BufferHandle, DispatchTiming, KernelArgs,
};
use crate::config::{LayerConfig, TileConfig};
use crate::tensor::TensorRole;

#[derive(Debug)]
struct HostBuffer {
    role: TensorRole,
    data: Vec<f32>,
}

/// Accelerator implementation that runs on the calling thread.
#[derive(Debug)]
pub struct HostAccelerator {
    epoch: Instant,
    buffers: Vec<HostBuffer>,
    queued: Option<KernelArgs>,
    /// Output buffer written by a dispatch that has not been synchronized.
    pending_output: Option<BufferHandle>,
}

impl HostAccelerator {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            buffers: Vec::new(),
            queued: None,
            pending_output: None,
        }
    }

    fn buffer(&self, handle: BufferHandle, stage: AcceleratorStage) -> Result<&HostBuffer, AcceleratorError> {
        self.buffers
            .get(handle.0)
            .ok_or_else(|| AcceleratorError::new(stage, format!("unknown buffer {handle}")))
    }

    fn buffer_mut(
        &mut self,
        handle: BufferHandle,
        stage: AcceleratorStage,
    ) -> Result<&mut HostBuffer, AcceleratorError> {
        self.buffers
            .get_mut(handle.0)
            .ok_or_else(|| AcceleratorError::new(stage, format!("unknown buffer {handle}")))
    }

    fn check_operand(
        &self,
        handle: BufferHandle,
        role: TensorRole,
        len: usize,
    ) -> Result<(), AcceleratorError> {
        let buf = self.buffer(handle, AcceleratorStage::Dispatch)?;
        if buf.role != role {
            return Err(AcceleratorError::new(
                AcceleratorStage::Dispatch,
                format!("buffer {handle} holds {} data, expected {role}", buf.role),
            ));
        }
        if buf.data.len() != len {
            return Err(AcceleratorError::new(
                AcceleratorStage::Dispatch,
                format!(
                    "{role} buffer {handle} has {} elements, kernel needs {len}",
                    buf.data.len()
                ),
            ));
        }
        Ok(())
    }

    fn run(&mut self, args: &KernelArgs) -> Result<(), AcceleratorError> {
        let layer = LayerConfig::from_words(args.layer, args.batch)
            .map_err(|err| AcceleratorError::new(AcceleratorStage::Dispatch, err.to_string()))?;
        let tiles = TileConfig::from_words(args.tiles)
            .map_err(|err| AcceleratorError::new(AcceleratorStage::Dispatch, err.to_string()))?;

        // Operands are disjoint entries of `buffers`; take the output out so
        // the inputs can be borrowed alongside it.
        let mut out = std::mem::take(&mut self.buffer_mut(args.output, AcceleratorStage::Dispatch)?.data);
        let x = &self.buffer(args.input, AcceleratorStage::Dispatch)?.data;
        let w = &self.buffer(args.weights, AcceleratorStage::Dispatch)?.data;
        blocked_conv2d(x, w, &mut out, &layer, &tiles);
        self.buffer_mut(args.output, AcceleratorStage::Dispatch)?.data = out;
        Ok(())
    }
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for HostAccelerator {
    fn name(&self) -> &str {
        "host emulator"
    }

    fn allocate(&mut self, role: TensorRole, len: usize) -> Result<BufferHandle, AcceleratorError> {
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| {
            AcceleratorError::new(
                AcceleratorStage::BufferCreation,
                format!("cannot allocate {len} elements for {role} buffer"),
            )
        })?;
        data.resize(len, 0.0);
        let handle = BufferHandle(self.buffers.len());
        self.buffers.push(HostBuffer { role, data });
        debug!(%handle, %role, len, "allocated emulator buffer");
        Ok(handle)
    }

    fn write(&mut self, handle: BufferHandle, data: &[f32]) -> Result<(), AcceleratorError> {
        let buf = self.buffer_mut(handle, AcceleratorStage::Transfer)?;
        if buf.data.len() != data.len() {
            return Err(AcceleratorError::new(
                AcceleratorStage::Transfer,
                format!(
                    "write of {} elements into buffer {handle} of {}",
                    data.len(),
                    buf.data.len()
                ),
            ));
        }
        buf.data.copy_from_slice(data);
        Ok(())
    }

    fn dispatch(&mut self, args: &KernelArgs) -> Result<(), AcceleratorError> {
        if self.queued.is_some() {
            return Err(AcceleratorError::new(
                AcceleratorStage::Dispatch,
                "a dispatch is already in flight",
            ));
        }
        let layer = LayerConfig::from_words(args.layer, args.batch)
            .map_err(|err| AcceleratorError::new(AcceleratorStage::Dispatch, err.to_string()))?;
        TileConfig::from_words(args.tiles)
            .map_err(|err| AcceleratorError::new(AcceleratorStage::Dispatch, err.to_string()))?;
        self.check_operand(args.input, TensorRole::Input, layer.num_input_elems())?;
        self.check_operand(args.weights, TensorRole::Weight, layer.num_weight_elems())?;
        self.check_operand(args.output, TensorRole::Output, layer.num_output_elems())?;

        debug!(layer = %layer, tiles = ?args.tiles, "queued convolution kernel");
        self.queued = Some(*args);
        self.pending_output = Some(args.output);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<DispatchTiming, AcceleratorError> {
        let Some(args) = self.queued.take() else {
            return Err(AcceleratorError::new(
                AcceleratorStage::Dispatch,
                "synchronize without an outstanding dispatch",
            ));
        };
        let start = self.epoch.elapsed().as_secs_f64();
        self.run(&args)?;
        let end = self.epoch.elapsed().as_secs_f64();
        self.pending_output = None;
        debug!(start, end, "kernel completed");
        Ok(DispatchTiming { start, end })
    }

    fn read(&mut self, handle: BufferHandle, out: &mut [f32]) -> Result<(), AcceleratorError> {
        if self.pending_output == Some(handle) {
            return Err(AcceleratorError::new(
                AcceleratorStage::Readback,
                format!("buffer {handle} read before synchronize"),
            ));
        }
        let buf = self.buffer(handle, AcceleratorStage::Readback)?;
        if buf.data.len() != out.len() {
            return Err(AcceleratorError::new(
                AcceleratorStage::Readback,
                format!(
                    "read of {} elements from buffer {handle} of {}",
                    out.len(),
                    buf.data.len()
                ),
            ));
        }
        out.copy_from_slice(&buf.data);
        Ok(())
    }
}

fn tile_extent(tile: u64) -> usize {
    usize::try_from(tile).unwrap_or(usize::MAX)
}

/// Loop-blocked convolution accumulating into `out`. Tiles larger than the
/// layer are clipped.
fn blocked_conv2d(x: &[f32], w: &[f32], out: &mut [f32], layer: &LayerConfig, tiles: &TileConfig) {
    let [batch, n_in, in_rows, in_cols] = layer.input_dims();
    let [_, m_out, rows, cols] = layer.output_dims();
    let k = layer.kernel_size() as usize;
    let s = layer.stride() as usize;
    let (tm, tr, tc, tn) = (
        tile_extent(tiles.depth),
        tile_extent(tiles.row),
        tile_extent(tiles.column),
        tile_extent(tiles.input_depth),
    );

    for b in 0..batch {
        let x_batch = b * n_in * in_rows * in_cols;
        let o_batch = b * m_out * rows * cols;
        for row in (0..rows).step_by(tr) {
            let row_end = rows.min(row.saturating_add(tr));
            for col in (0..cols).step_by(tc) {
                let col_end = cols.min(col.saturating_add(tc));
                for to in (0..m_out).step_by(tm) {
                    let to_end = m_out.min(to.saturating_add(tm));
                    for ti in (0..n_in).step_by(tn) {
                        let ti_end = n_in.min(ti.saturating_add(tn));
                        for i in 0..k {
                            for j in 0..k {
                                for trr in row..row_end {
                                    for tcc in col..col_end {
                                        let x_pos = (s * trr + i) * in_cols + s * tcc + j;
                                        for too in to..to_end {
                                            let o = o_batch + (too * rows + trr) * cols + tcc;
                                            let mut acc = out[o];
                                            for tii in ti..ti_end {
                                                let wv = w[((too * n_in + tii) * k + i) * k + j];
                                                let xv = x[x_batch + tii * in_rows * in_cols + x_pos];
                                                acc += wv * xv;
                                            }
                                            out[o] = acc;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
