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

//! Full runs against the emulator and against misbehaving accelerators.

use convcheck::accel::{BufferHandle, DispatchTiming, KernelArgs};
use convcheck::config::{LayerConfig, ResolvedConfig, TileConfig};
use convcheck::{
    Accelerator, AcceleratorError, AcceleratorStage, CompareMode, HarnessError, HostAccelerator,
    RunContext, RunOptions, TensorRole, EPSILON,
};

fn config(tiles: TileConfig) -> ResolvedConfig {
    ResolvedConfig {
        layer: LayerConfig::new(3, 1, 5, 5, 4, 4, 2).unwrap(),
        tiles,
    }
}

/// Emulator whose read-back corrupts selected output elements.
struct Perturbing {
    inner: HostAccelerator,
    output: Option<BufferHandle>,
    corrupt: Vec<usize>,
}

impl Perturbing {
    fn new(corrupt: &[usize]) -> Self {
        Self {
            inner: HostAccelerator::new(),
            output: None,
            corrupt: corrupt.to_vec(),
        }
    }
}

impl Accelerator for Perturbing {
    fn name(&self) -> &str {
        "perturbing"
    }

    fn allocate(&mut self, role: TensorRole, len: usize) -> Result<BufferHandle, AcceleratorError> {
        let handle = self.inner.allocate(role, len)?;
        if role == TensorRole::Output {
            self.output = Some(handle);
        }
        Ok(handle)
    }

    fn write(&mut self, handle: BufferHandle, data: &[f32]) -> Result<(), AcceleratorError> {
        self.inner.write(handle, data)
    }

    fn dispatch(&mut self, args: &KernelArgs) -> Result<(), AcceleratorError> {
        self.inner.dispatch(args)
    }

    fn synchronize(&mut self) -> Result<DispatchTiming, AcceleratorError> {
        self.inner.synchronize()
    }

    fn read(&mut self, handle: BufferHandle, out: &mut [f32]) -> Result<(), AcceleratorError> {
        self.inner.read(handle, out)?;
        if Some(handle) == self.output {
            for &idx in &self.corrupt {
                out[idx] *= 1.0 + 10.0 * EPSILON;
            }
        }
        Ok(())
    }
}

/// Accelerator that fails at a chosen protocol stage.
struct Failing {
    stage: AcceleratorStage,
    next: usize,
}

impl Failing {
    fn at(stage: AcceleratorStage) -> Self {
        Self { stage, next: 0 }
    }

    fn check(&self, stage: AcceleratorStage) -> Result<(), AcceleratorError> {
        if stage == self.stage {
            return Err(AcceleratorError::new(stage, "injected failure"));
        }
        Ok(())
    }
}

impl Accelerator for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn allocate(&mut self, _role: TensorRole, _len: usize) -> Result<BufferHandle, AcceleratorError> {
        self.check(AcceleratorStage::BufferCreation)?;
        self.next += 1;
        Ok(BufferHandle(self.next - 1))
    }

    fn write(&mut self, _handle: BufferHandle, _data: &[f32]) -> Result<(), AcceleratorError> {
        self.check(AcceleratorStage::Transfer)
    }

    fn dispatch(&mut self, _args: &KernelArgs) -> Result<(), AcceleratorError> {
        self.check(AcceleratorStage::Dispatch)
    }

    fn synchronize(&mut self) -> Result<DispatchTiming, AcceleratorError> {
        self.check(AcceleratorStage::Dispatch)?;
        Ok(DispatchTiming::default())
    }

    fn read(&mut self, _handle: BufferHandle, _out: &mut [f32]) -> Result<(), AcceleratorError> {
        self.check(AcceleratorStage::Readback)
    }
}

#[test]
fn emulator_passes_for_any_tiling() {
    for tiles in [
        TileConfig::new(1, 1, 1, 1).unwrap(),
        TileConfig::default(),
        TileConfig::new(3, 2, 4, 3).unwrap(),
        TileConfig::new(64, 64, 64, 64).unwrap(),
    ] {
        let mut accel = HostAccelerator::new();
        let report = RunContext::run(config(tiles), RunOptions::default(), &mut accel)
            .unwrap_or_else(|err| panic!("tiles {tiles}: {err}"));
        assert_eq!(report.tiles, tiles);
        assert_eq!(report.verification.checked, 2 * 4 * 5 * 5);
    }
}

#[test]
fn strided_layer_passes_on_emulator() {
    let cfg = ResolvedConfig {
        layer: LayerConfig::new(3, 2, 6, 7, 5, 6, 2).unwrap(),
        tiles: TileConfig::new(4, 4, 3, 5).unwrap(),
    };
    let mut accel = HostAccelerator::new();
    assert!(RunContext::run(cfg, RunOptions::default(), &mut accel).is_ok());
}

#[test]
fn perturbed_element_is_reported() {
    // Output is (2, 4, 5, 5); flat 137 is batch 1, depth 1, row 2, col 2.
    let mut accel = Perturbing::new(&[137]);
    let err = RunContext::run(config(TileConfig::default()), RunOptions::default(), &mut accel)
        .unwrap_err();
    let HarnessError::Verification(failed) = &err else {
        panic!("expected verification failure, got {err:?}");
    };
    assert_eq!(
        (failed.first.batch, failed.first.depth, failed.first.row, failed.first.col),
        (1, 1, 2, 2)
    );
    assert_eq!(failed.count, 1);
    assert_eq!(err.stage(), "verify");
}

#[test]
fn collect_all_counts_every_corrupted_element() {
    let mut accel = Perturbing::new(&[3, 50, 199]);
    let options = RunOptions {
        mode: CompareMode::CollectAll,
        ..RunOptions::default()
    };
    let err = RunContext::run(config(TileConfig::default()), options, &mut accel).unwrap_err();
    let HarnessError::Verification(failed) = err else {
        panic!("expected verification failure, got {err:?}");
    };
    assert_eq!(failed.count, 3);
    assert_eq!(failed.first.col, 3);
}

#[test]
fn accelerator_failures_surface_with_their_stage() {
    for stage in [
        AcceleratorStage::BufferCreation,
        AcceleratorStage::Transfer,
        AcceleratorStage::Dispatch,
        AcceleratorStage::Readback,
    ] {
        let mut accel = Failing::at(stage);
        let err = RunContext::run(config(TileConfig::default()), RunOptions::default(), &mut accel)
            .unwrap_err();
        match err {
            HarnessError::Accelerator(inner) => assert_eq!(inner.stage, stage),
            other => panic!("expected accelerator failure at {stage}, got {other:?}"),
        }
    }
}

#[test]
fn identical_seeds_reproduce_the_device_output() {
    let run = || {
        let mut ctx = RunContext::new(config(TileConfig::default()), RunOptions::default()).unwrap();
        ctx.prepare().unwrap();
        ctx.execute(&mut HostAccelerator::new()).unwrap();
        ctx.device_output().clone()
    };
    assert_eq!(run(), run());
}

#[test]
fn different_seeds_change_the_operands() {
    let mut a = RunContext::new(config(TileConfig::default()), RunOptions::default()).unwrap();
    let mut b = RunContext::new(
        config(TileConfig::default()),
        RunOptions {
            seed: 1,
            ..RunOptions::default()
        },
    )
    .unwrap();
    a.prepare().unwrap();
    b.prepare().unwrap();
    assert_ne!(a.input(), b.input());
}
