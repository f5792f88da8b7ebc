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

//! Run summary and throughput figures.

use std::fmt;

use serde::Serialize;

use crate::accel::DispatchTiming;
use crate::compare::{CompareMode, VerifyReport};
use crate::config::{LayerConfig, TileConfig};

/// `1e-9 * operations / seconds`, or `None` when no time elapsed.
pub fn gflops(operations: f64, seconds: f64) -> Option<f64> {
    if seconds > 0.0 && seconds.is_finite() {
        Some(1.0e-9 * operations / seconds)
    } else {
        None
    }
}

/// Outcome of one successful verification run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub device: String,
    pub layer: LayerConfig,
    pub tiles: TileConfig,
    pub seed: u64,
    pub range: u32,
    pub mode: CompareMode,
    pub timing: DispatchTiming,
    pub elapsed_seconds: f64,
    pub operations: f64,
    pub gflops: Option<f64>,
    pub verification: VerifyReport,
}

impl RunReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: impl Into<String>,
        layer: LayerConfig,
        tiles: TileConfig,
        seed: u64,
        range: u32,
        mode: CompareMode,
        timing: DispatchTiming,
        verification: VerifyReport,
    ) -> Self {
        let operations = layer.num_operations();
        let elapsed_seconds = timing.elapsed();
        Self {
            device: device.into(),
            layer,
            tiles,
            seed,
            range,
            mode,
            timing,
            elapsed_seconds,
            operations,
            gflops: gflops(operations, elapsed_seconds),
            verification,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device: {}", self.device)?;
        writeln!(f, "layer: {}", self.layer)?;
        writeln!(f, "tiles: {}", self.tiles)?;
        writeln!(
            f,
            "results correct: {} elements checked, max relative error {:.3e}",
            self.verification.checked, self.verification.max_relative_error
        )?;
        writeln!(
            f,
            "exec time = {:.5} s (start={:.5} s, end={:.5} s)",
            self.elapsed_seconds, self.timing.start, self.timing.end
        )?;
        writeln!(f, "# operations = {:.0}", self.operations)?;
        match self.gflops {
            Some(g) => write!(f, "throughput: {g:.5} GFLOPS"),
            None => write!(f, "throughput: n/a (no measurable device time)"),
        }
    }
}
