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

//! Layer and tiling parameters for one convolution run.
//!
//! A [`LayerConfig`] is built once per run, validated, and never mutated. It
//! carries the output shape, the square kernel, the stride and the batch size,
//! and derives the input spatial extents from them:
//!
//! ```text
//! input_height = output_height * stride + kernel_size - stride
//! input_width  = output_width  * stride + kernel_size - stride
//! ```
//!
//! [`TileConfig`] holds the blocking factors handed to the accelerator. They
//! never change the mathematical result.
//!
//! # Example
//! ```
//! use convcheck::config::LayerConfig;
//! let layer = LayerConfig::new(3, 1, 13, 13, 128, 192, 1).unwrap();
//! assert_eq!(layer.input_height(), 15);
//! assert_eq!(layer.num_weight_elems(), 128 * 192 * 9);
//! ```

pub mod file;
pub mod policy;

use std::fmt;

use serde::Serialize;

pub use file::ConfigFile;
pub use policy::{
    ConfigBuilder, OverrideMode, Overrides, Param, Policy, PolicyTable, ResolvedConfig, PARAM_COUNT,
};

pub const DEFAULT_KERNEL_SIZE: u64 = 3;
pub const DEFAULT_STRIDE: u64 = 1;
pub const DEFAULT_OUTPUT_HEIGHT: u64 = 13;
pub const DEFAULT_OUTPUT_WIDTH: u64 = 13;
pub const DEFAULT_OUTPUT_DEPTH: u64 = 128;
pub const DEFAULT_INPUT_DEPTH: u64 = 192;
pub const DEFAULT_BATCH_SIZE: u64 = 10;
pub const DEFAULT_TILE: u64 = 4;

/// Structured configuration errors. All of them abort a run before any
/// buffer is allocated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A dimension or tile factor is zero.
    #[error("parameter `{param}` must be positive")]
    ZeroParameter { param: Param },
    /// The kernel does not fit into the derived input extent.
    #[error("kernel size {kernel} exceeds derived input {axis} {extent}")]
    KernelExceedsInput {
        kernel: u64,
        axis: &'static str,
        extent: u64,
    },
    /// A derived size does not fit the host's address space.
    #[error("derived {what} overflows")]
    Overflow { what: &'static str },
    /// An override targeted a parameter the policy table marks as fixed.
    #[error("parameter `{param}` is fixed and cannot be overridden")]
    FixedParameter { param: Param },
    /// A policy table or config file named a parameter that does not exist.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    /// The configuration file could not be read.
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    /// A parameter blob disagrees with itself (derived dims do not match).
    #[error("inconsistent parameter blob: {0}")]
    InconsistentBlob(String),
    /// Operand range too wide for every `step / range` to stay below 1.0 in `f32`.
    #[error("range {range} exceeds the maximum of {max}")]
    RangeTooLarge { range: u32, max: u32 },
}

/// Immutable description of one convolution layer plus its batch size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LayerConfig {
    kernel_size: u64,
    stride: u64,
    output_height: u64,
    output_width: u64,
    output_depth: u64,
    input_depth: u64,
    input_height: u64,
    input_width: u64,
    batch_size: u64,
}

impl LayerConfig {
    /// Validate raw dimensions and derive the input extents.
    pub fn new(
        kernel_size: u64,
        stride: u64,
        output_height: u64,
        output_width: u64,
        output_depth: u64,
        input_depth: u64,
        batch_size: u64,
    ) -> Result<Self, ConfigError> {
        for (param, value) in [
            (Param::KernelSize, kernel_size),
            (Param::Stride, stride),
            (Param::OutputHeight, output_height),
            (Param::OutputWidth, output_width),
            (Param::OutputDepth, output_depth),
            (Param::InputDepth, input_depth),
            (Param::Batch, batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroParameter { param });
            }
        }

        let input_height = derive_input_extent(output_height, stride, kernel_size, "height")?;
        let input_width = derive_input_extent(output_width, stride, kernel_size, "width")?;

        let layer = Self {
            kernel_size,
            stride,
            output_height,
            output_width,
            output_depth,
            input_depth,
            input_height,
            input_width,
            batch_size,
        };

        // Reject layers whose buffers cannot even be addressed.
        layer.checked_input_elems()?;
        layer.checked_weight_elems()?;
        layer.checked_output_elems()?;
        Ok(layer)
    }

    pub fn kernel_size(&self) -> u64 {
        self.kernel_size
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn output_height(&self) -> u64 {
        self.output_height
    }

    pub fn output_width(&self) -> u64 {
        self.output_width
    }

    pub fn output_depth(&self) -> u64 {
        self.output_depth
    }

    pub fn input_depth(&self) -> u64 {
        self.input_depth
    }

    pub fn input_height(&self) -> u64 {
        self.input_height
    }

    pub fn input_width(&self) -> u64 {
        self.input_width
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Shape of the input tensor: (batch, N, Hin, Win).
    pub fn input_dims(&self) -> [usize; 4] {
        [
            self.batch_size as usize,
            self.input_depth as usize,
            self.input_height as usize,
            self.input_width as usize,
        ]
    }

    /// Shape of the weight tensor: (M, N, K, K).
    pub fn weight_dims(&self) -> [usize; 4] {
        [
            self.output_depth as usize,
            self.input_depth as usize,
            self.kernel_size as usize,
            self.kernel_size as usize,
        ]
    }

    /// Shape of the output tensor: (batch, M, R, C).
    pub fn output_dims(&self) -> [usize; 4] {
        [
            self.batch_size as usize,
            self.output_depth as usize,
            self.output_height as usize,
            self.output_width as usize,
        ]
    }

    pub fn num_input_elems(&self) -> usize {
        self.input_dims().iter().product()
    }

    pub fn num_weight_elems(&self) -> usize {
        self.weight_dims().iter().product()
    }

    pub fn num_output_elems(&self) -> usize {
        self.output_dims().iter().product()
    }

    /// Floating-point operations of one full run: one multiply and one add
    /// per weight tap per output element.
    pub fn num_operations(&self) -> f64 {
        2.0 * self.batch_size as f64
            * self.output_depth as f64
            * self.output_height as f64
            * self.output_width as f64
            * self.input_depth as f64
            * self.kernel_size as f64
            * self.kernel_size as f64
    }

    /// Fixed-size parameter blob in device order:
    /// `[K, S, R, C, M, Hin, Win, N]`.
    pub fn to_words(&self) -> [u64; 8] {
        [
            self.kernel_size,
            self.stride,
            self.output_height,
            self.output_width,
            self.output_depth,
            self.input_height,
            self.input_width,
            self.input_depth,
        ]
    }

    /// Rebuild a layer from its blob. The blob does not carry the batch size,
    /// so it travels separately.
    pub fn from_words(words: [u64; 8], batch_size: u64) -> Result<Self, ConfigError> {
        let [k, s, r, c, m, hin, win, n] = words;
        let layer = Self::new(k, s, r, c, m, n, batch_size)?;
        if layer.input_height != hin || layer.input_width != win {
            return Err(ConfigError::InconsistentBlob(format!(
                "input extent {hin}x{win} does not match derived {}x{}",
                layer.input_height, layer.input_width
            )));
        }
        Ok(layer)
    }

    fn checked_input_elems(&self) -> Result<usize, ConfigError> {
        checked_product(
            &[self.batch_size, self.input_depth, self.input_height, self.input_width],
            "input element count",
        )
    }

    fn checked_weight_elems(&self) -> Result<usize, ConfigError> {
        checked_product(
            &[self.output_depth, self.input_depth, self.kernel_size, self.kernel_size],
            "weight element count",
        )
    }

    fn checked_output_elems(&self) -> Result<usize, ConfigError> {
        checked_product(
            &[self.batch_size, self.output_depth, self.output_height, self.output_width],
            "output element count",
        )
    }
}

impl fmt::Display for LayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "K={} S={} R={} C={} M={} N={} (input {}x{}) batch={}",
            self.kernel_size,
            self.stride,
            self.output_height,
            self.output_width,
            self.output_depth,
            self.input_depth,
            self.input_height,
            self.input_width,
            self.batch_size
        )
    }
}

fn derive_input_extent(
    output: u64,
    stride: u64,
    kernel: u64,
    axis: &'static str,
) -> Result<u64, ConfigError> {
    let extent = output
        .checked_mul(stride)
        .and_then(|v| v.checked_add(kernel))
        .and_then(|v| v.checked_sub(stride))
        .ok_or(ConfigError::Overflow { what: "input extent" })?;
    if kernel > extent {
        return Err(ConfigError::KernelExceedsInput {
            kernel,
            axis,
            extent,
        });
    }
    Ok(extent)
}

fn checked_product(dims: &[u64], what: &'static str) -> Result<usize, ConfigError> {
    dims.iter()
        .try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
        .ok_or(ConfigError::Overflow { what })
}

/// Blocking factors passed through to the accelerator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TileConfig {
    pub depth: u64,
    pub row: u64,
    pub column: u64,
    pub input_depth: u64,
}

impl TileConfig {
    pub fn new(depth: u64, row: u64, column: u64, input_depth: u64) -> Result<Self, ConfigError> {
        for (param, value) in [
            (Param::TileDepth, depth),
            (Param::TileRow, row),
            (Param::TileColumn, column),
            (Param::TileInputDepth, input_depth),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroParameter { param });
            }
        }
        Ok(Self {
            depth,
            row,
            column,
            input_depth,
        })
    }

    /// Blob in device order: `[Tm, Tr, Tc, Tn]`.
    pub fn to_words(&self) -> [u64; 4] {
        [self.depth, self.row, self.column, self.input_depth]
    }

    pub fn from_words(words: [u64; 4]) -> Result<Self, ConfigError> {
        let [tm, tr, tc, tn] = words;
        Self::new(tm, tr, tc, tn)
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_TILE,
            row: DEFAULT_TILE,
            column: DEFAULT_TILE,
            input_depth: DEFAULT_TILE,
        }
    }
}

impl fmt::Display for TileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tm={} Tn={} Tr={} Tc={}",
            self.depth, self.input_depth, self.row, self.column
        )
    }
}
