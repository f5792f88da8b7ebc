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

//! One verification run, end to end.
//!
//! A [`RunContext`] owns every buffer of a run. The stages are:
//!
//! 1. [`RunContext::new`] allocates zeroed host buffers,
//! 2. [`RunContext::prepare`] fills input and weights (reference and device
//!    copies are bit-identical),
//! 3. [`RunContext::execute`] drives the accelerator protocol,
//! 4. [`RunContext::compute_reference`] produces the golden output,
//! 5. [`RunContext::verify`] compares the two outputs.
//!
//! [`RunContext::run`] chains them and returns a [`RunReport`].

use std::num::NonZeroU32;

use tracing::info;

use crate::accel::{Accelerator, AcceleratorError, DispatchTiming, KernelArgs};
use crate::compare::{verify, CompareError, CompareMode, VerificationFailed, VerifyReport};
use crate::config::{ConfigError, LayerConfig, ResolvedConfig, TileConfig};
use crate::random::{RandomTensorGenerator, DEFAULT_RANGE, DEFAULT_SEED};
use crate::reference::reference_conv2d_into;
use crate::report::RunReport;
use crate::tensor::{TensorBuffer, TensorError, TensorRole};

/// Knobs of a run that are not layer parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub seed: u64,
    pub range: NonZeroU32,
    pub mode: CompareMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            range: DEFAULT_RANGE,
            mode: CompareMode::FailFast,
        }
    }
}

/// Every way a run can end other than "results correct".
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Accelerator(#[from] AcceleratorError),
    #[error(transparent)]
    Verification(#[from] VerificationFailed),
}

impl From<CompareError> for HarnessError {
    fn from(err: CompareError) -> Self {
        match err {
            CompareError::Tensor(e) => HarnessError::Tensor(e),
            CompareError::Mismatch(e) => HarnessError::Verification(e),
        }
    }
}

impl HarnessError {
    /// Short stage label used in `error[<stage>]` diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            HarnessError::InvalidConfiguration(_) => "config",
            HarnessError::Tensor(TensorError::Allocation { .. }) => "alloc",
            HarnessError::Tensor(_) => "tensor",
            HarnessError::Accelerator(_) => "accelerator",
            HarnessError::Verification(_) => "verify",
        }
    }
}

/// Buffers and state of a single run.
#[derive(Debug)]
pub struct RunContext {
    layer: LayerConfig,
    tiles: TileConfig,
    options: RunOptions,
    input: TensorBuffer,
    weights: TensorBuffer,
    device_input: TensorBuffer,
    device_weights: TensorBuffer,
    reference_output: TensorBuffer,
    device_output: TensorBuffer,
    timing: Option<DispatchTiming>,
}

impl RunContext {
    pub fn new(config: ResolvedConfig, options: RunOptions) -> Result<Self, HarnessError> {
        let ResolvedConfig { layer, tiles } = config;
        info!(%layer, %tiles, "allocating host buffers");
        Ok(Self {
            layer,
            tiles,
            options,
            input: TensorBuffer::zeros(TensorRole::Input, layer.input_dims())?,
            weights: TensorBuffer::zeros(TensorRole::Weight, layer.weight_dims())?,
            device_input: TensorBuffer::zeros(TensorRole::Input, layer.input_dims())?,
            device_weights: TensorBuffer::zeros(TensorRole::Weight, layer.weight_dims())?,
            reference_output: TensorBuffer::zeros(TensorRole::Output, layer.output_dims())?,
            device_output: TensorBuffer::zeros(TensorRole::Output, layer.output_dims())?,
            timing: None,
        })
    }

    pub fn layer(&self) -> &LayerConfig {
        &self.layer
    }

    pub fn tiles(&self) -> &TileConfig {
        &self.tiles
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn input(&self) -> &TensorBuffer {
        &self.input
    }

    pub fn weights(&self) -> &TensorBuffer {
        &self.weights
    }

    pub fn reference_output(&self) -> &TensorBuffer {
        &self.reference_output
    }

    pub fn device_output(&self) -> &TensorBuffer {
        &self.device_output
    }

    pub fn timing(&self) -> Option<DispatchTiming> {
        self.timing
    }

    /// Fill input and weights from the seeded generator.
    pub fn prepare(&mut self) -> Result<(), HarnessError> {
        let mut gen = RandomTensorGenerator::new(self.options.seed, self.options.range)?;
        info!(seed = gen.seed(), range = gen.range().get(), "generating operands");
        gen.fill_pair(&mut self.input, &mut self.device_input)?;
        gen.fill_pair(&mut self.weights, &mut self.device_weights)?;
        Ok(())
    }

    /// Run the device side: transfer, dispatch, wait, read back.
    pub fn execute<A: Accelerator + ?Sized>(
        &mut self,
        accel: &mut A,
    ) -> Result<DispatchTiming, HarnessError> {
        info!(device = accel.name(), "transferring operands");
        let input = accel.allocate(TensorRole::Input, self.device_input.len())?;
        let weights = accel.allocate(TensorRole::Weight, self.device_weights.len())?;
        let output = accel.allocate(TensorRole::Output, self.device_output.len())?;
        accel.write(input, self.device_input.as_slice())?;
        accel.write(weights, self.device_weights.as_slice())?;
        accel.write(output, self.device_output.as_slice())?;

        let args = KernelArgs::new(input, weights, output, &self.layer, &self.tiles);
        info!("dispatching convolution kernel");
        accel.dispatch(&args)?;
        let timing = accel.synchronize()?;
        info!(elapsed = timing.elapsed(), "kernel finished");

        accel.read(output, self.device_output.as_mut_slice())?;
        self.timing = Some(timing);
        Ok(timing)
    }

    /// Compute the golden output on the host.
    pub fn compute_reference(&mut self) -> Result<(), HarnessError> {
        info!("computing reference output");
        reference_conv2d_into(
            &self.input,
            &self.weights,
            &self.layer,
            &mut self.reference_output,
        )?;
        Ok(())
    }

    /// Compare the device output against the reference.
    pub fn verify(&self) -> Result<VerifyReport, HarnessError> {
        info!(mode = ?self.options.mode, "verifying");
        Ok(verify(
            &self.reference_output,
            &self.device_output,
            self.options.mode,
        )?)
    }

    /// Execute every stage against `accel`.
    pub fn run<A: Accelerator + ?Sized>(
        config: ResolvedConfig,
        options: RunOptions,
        accel: &mut A,
    ) -> Result<RunReport, HarnessError> {
        let mut ctx = RunContext::new(config, options)?;
        ctx.prepare()?;
        let timing = ctx.execute(accel)?;
        ctx.compute_reference()?;
        let verification = ctx.verify()?;
        info!(checked = verification.checked, "results correct");
        Ok(RunReport::new(
            accel.name(),
            ctx.layer,
            ctx.tiles,
            options.seed,
            options.range.get(),
            options.mode,
            timing,
            verification,
        ))
    }
}
