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

//! Accelerator contract.
//!
//! Device discovery, program loading and buffer plumbing live behind the
//! [`Accelerator`] trait. The harness drives it strictly in sequence:
//!
//! 1. `allocate` one buffer per operand,
//! 2. `write` the input and weight data,
//! 3. `dispatch` the convolution kernel once,
//! 4. `synchronize` (blocking) to obtain the dispatch timestamps,
//! 5. `read` the output buffer.
//!
//! The only in-crate implementation is [`HostAccelerator`], a loop-blocked
//! emulator that honours the tile factors.

mod host;

use std::fmt;

use serde::Serialize;

use crate::config::{LayerConfig, TileConfig};
use crate::tensor::TensorRole;

pub use host::HostAccelerator;

/// Opaque handle to accelerator-managed storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BufferHandle(pub usize);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Phase of the accelerator protocol an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AcceleratorStage {
    Discovery,
    BufferCreation,
    Transfer,
    ProgramBuild,
    Dispatch,
    Readback,
}

impl fmt::Display for AcceleratorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcceleratorStage::Discovery => "discovery",
            AcceleratorStage::BufferCreation => "buffer creation",
            AcceleratorStage::Transfer => "transfer",
            AcceleratorStage::ProgramBuild => "program build",
            AcceleratorStage::Dispatch => "dispatch",
            AcceleratorStage::Readback => "readback",
        };
        f.write_str(name)
    }
}

/// Structured failure reported by an accelerator implementation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("accelerator {stage} failed: {message}")]
pub struct AcceleratorError {
    pub stage: AcceleratorStage,
    pub message: String,
}

impl AcceleratorError {
    pub fn new(stage: AcceleratorStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Everything the convolution kernel receives for one dispatch.
///
/// `layer` and `tiles` are the fixed-size parameter blobs produced by
/// [`LayerConfig::to_words`] and [`TileConfig::to_words`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct KernelArgs {
    pub input: BufferHandle,
    pub weights: BufferHandle,
    pub output: BufferHandle,
    pub batch: u64,
    pub tiles: [u64; 4],
    pub layer: [u64; 8],
}

impl KernelArgs {
    pub fn new(
        input: BufferHandle,
        weights: BufferHandle,
        output: BufferHandle,
        layer: &LayerConfig,
        tiles: &TileConfig,
    ) -> Self {
        Self {
            input,
            weights,
            output,
            batch: layer.batch_size(),
            tiles: tiles.to_words(),
            layer: layer.to_words(),
        }
    }
}

/// Start and end of a completed dispatch, in seconds since the
/// accelerator's own epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DispatchTiming {
    pub start: f64,
    pub end: f64,
}

impl DispatchTiming {
    pub fn elapsed(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Contract every compute device backend implements.
pub trait Accelerator {
    /// Human-readable device name, used in logs and reports.
    fn name(&self) -> &str;

    /// Create a device buffer of `len` `f32` elements.
    fn allocate(&mut self, role: TensorRole, len: usize) -> Result<BufferHandle, AcceleratorError>;

    /// Copy host data into a device buffer. `data` must fill it exactly.
    fn write(&mut self, handle: BufferHandle, data: &[f32]) -> Result<(), AcceleratorError>;

    /// Launch the convolution kernel.
    fn dispatch(&mut self, args: &KernelArgs) -> Result<(), AcceleratorError>;

    /// Block until the outstanding dispatch completes.
    fn synchronize(&mut self) -> Result<DispatchTiming, AcceleratorError>;

    /// Copy a device buffer back to the host. Only valid for the output once
    /// [`Accelerator::synchronize`] has returned.
    fn read(&mut self, handle: BufferHandle, out: &mut [f32]) -> Result<(), AcceleratorError>;
}
