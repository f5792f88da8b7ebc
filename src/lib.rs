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

//! Golden-reference verification for accelerator-offloaded 2D convolution.
pub mod accel;
pub mod compare;
pub mod config;
pub mod harness;
pub mod random;
pub mod reference;
pub mod report;
pub mod tensor;

pub use accel::{Accelerator, AcceleratorError, AcceleratorStage, HostAccelerator};
pub use compare::{nearly_equal, verify, CompareMode, VerificationFailed, VerifyReport, EPSILON};
pub use config::{LayerConfig, TileConfig};
pub use harness::{HarnessError, RunContext, RunOptions};
pub use reference::{reference_conv2d, reference_conv2d_into};
pub use report::RunReport;
pub use tensor::{TensorBuffer, TensorError, TensorRole};
