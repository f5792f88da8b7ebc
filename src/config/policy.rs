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

//! Named parameters, the fixed-vs-tunable policy table, and the builder that
//! layers overrides on top of the compiled-in defaults.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::{
    ConfigError, LayerConfig, TileConfig, DEFAULT_BATCH_SIZE, DEFAULT_INPUT_DEPTH,
    DEFAULT_KERNEL_SIZE, DEFAULT_OUTPUT_DEPTH, DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH,
    DEFAULT_STRIDE, DEFAULT_TILE,
};

/// Number of named parameters.
pub const PARAM_COUNT: usize = 11;

/// Every user-facing numeric option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Param {
    KernelSize,
    Stride,
    OutputHeight,
    OutputWidth,
    OutputDepth,
    InputDepth,
    Batch,
    TileDepth,
    TileRow,
    TileColumn,
    TileInputDepth,
}

impl Param {
    pub const ALL: [Param; PARAM_COUNT] = [
        Param::KernelSize,
        Param::Stride,
        Param::OutputHeight,
        Param::OutputWidth,
        Param::OutputDepth,
        Param::InputDepth,
        Param::Batch,
        Param::TileDepth,
        Param::TileRow,
        Param::TileColumn,
        Param::TileInputDepth,
    ];

    /// Option name as spelled on the command line and in config files.
    pub fn name(self) -> &'static str {
        match self {
            Param::KernelSize => "k",
            Param::Stride => "s",
            Param::OutputHeight => "rofm",
            Param::OutputWidth => "cofm",
            Param::OutputDepth => "mofm",
            Param::InputDepth => "nifm",
            Param::Batch => "batch",
            Param::TileDepth => "tm",
            Param::TileRow => "tr",
            Param::TileColumn => "tc",
            Param::TileInputDepth => "tn",
        }
    }

    pub fn default_value(self) -> u64 {
        match self {
            Param::KernelSize => DEFAULT_KERNEL_SIZE,
            Param::Stride => DEFAULT_STRIDE,
            Param::OutputHeight => DEFAULT_OUTPUT_HEIGHT,
            Param::OutputWidth => DEFAULT_OUTPUT_WIDTH,
            Param::OutputDepth => DEFAULT_OUTPUT_DEPTH,
            Param::InputDepth => DEFAULT_INPUT_DEPTH,
            Param::Batch => DEFAULT_BATCH_SIZE,
            Param::TileDepth | Param::TileRow | Param::TileColumn | Param::TileInputDepth => {
                DEFAULT_TILE
            }
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Param {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        Param::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownParameter(raw.to_string()))
    }
}

/// Whether a parameter accepts user overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Policy {
    /// The accelerator build bakes this value in.
    Fixed,
    #[default]
    Tunable,
}

/// What to do when an override hits a fixed parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverrideMode {
    /// Fail with [`ConfigError::FixedParameter`].
    #[default]
    Reject,
    /// Log a warning and keep the default.
    Warn,
}

/// Per-parameter policy lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyTable {
    entries: [Policy; PARAM_COUNT],
}

impl PolicyTable {
    pub fn all_tunable() -> Self {
        Self {
            entries: [Policy::Tunable; PARAM_COUNT],
        }
    }

    pub fn with_fixed(mut self, params: &[Param]) -> Self {
        for p in params {
            self.entries[p.index()] = Policy::Fixed;
        }
        self
    }

    /// Build a table from parameter names, e.g. the `[policy] fixed` list of
    /// a config file.
    pub fn from_fixed_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let params = names
            .iter()
            .map(|n| n.as_ref().parse::<Param>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::all_tunable().with_fixed(&params))
    }

    pub fn policy(&self, param: Param) -> Policy {
        self.entries[param.index()]
    }

    pub fn fixed(&self) -> impl Iterator<Item = Param> + '_ {
        Param::ALL
            .into_iter()
            .filter(|p| self.policy(*p) == Policy::Fixed)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::all_tunable()
    }
}

/// Sparse set of user-supplied values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    values: [Option<u64>; PARAM_COUNT],
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, param: Param, value: u64) -> &mut Self {
        self.values[param.index()] = Some(value);
        self
    }

    pub fn set_opt(&mut self, param: Param, value: Option<u64>) -> &mut Self {
        if let Some(v) = value {
            self.set(param, v);
        }
        self
    }

    pub fn get(&self, param: Param) -> Option<u64> {
        self.values[param.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Layer `higher` on top of `self`; values present in `higher` win.
    pub fn merged_with(&self, higher: &Overrides) -> Overrides {
        let mut out = self.clone();
        for p in Param::ALL {
            if let Some(v) = higher.get(p) {
                out.set(p, v);
            }
        }
        out
    }
}

/// Layer plus tiling, as resolved from defaults, policy and overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub layer: LayerConfig,
    pub tiles: TileConfig,
}

/// Applies the policy table to overrides and produces validated configs.
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    policy: PolicyTable,
    mode: OverrideMode,
}

impl ConfigBuilder {
    pub fn new(policy: PolicyTable, mode: OverrideMode) -> Self {
        Self { policy, mode }
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn build(&self, overrides: &Overrides) -> Result<ResolvedConfig, ConfigError> {
        let mut values = [0u64; PARAM_COUNT];
        for p in Param::ALL {
            values[p.index()] = self.resolve(p, overrides.get(p))?;
        }
        let v = |p: Param| values[p.index()];

        let layer = LayerConfig::new(
            v(Param::KernelSize),
            v(Param::Stride),
            v(Param::OutputHeight),
            v(Param::OutputWidth),
            v(Param::OutputDepth),
            v(Param::InputDepth),
            v(Param::Batch),
        )?;
        let tiles = TileConfig::new(
            v(Param::TileDepth),
            v(Param::TileRow),
            v(Param::TileColumn),
            v(Param::TileInputDepth),
        )?;
        Ok(ResolvedConfig { layer, tiles })
    }

    fn resolve(&self, param: Param, requested: Option<u64>) -> Result<u64, ConfigError> {
        let default = param.default_value();
        let Some(value) = requested else {
            return Ok(default);
        };
        match (self.policy.policy(param), self.mode) {
            (Policy::Tunable, _) => Ok(value),
            // Restating the baked-in value is not an override.
            (Policy::Fixed, _) if value == default => Ok(default),
            (Policy::Fixed, OverrideMode::Reject) => Err(ConfigError::FixedParameter { param }),
            (Policy::Fixed, OverrideMode::Warn) => {
                tracing::warn!(
                    param = param.name(),
                    requested = value,
                    kept = default,
                    "parameter is fixed; ignoring override"
                );
                Ok(default)
            }
        }
    }
}
