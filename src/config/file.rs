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

//! TOML run configuration.
//!
//! ```toml
//! [layer]
//! k = 3
//! s = 1
//! rofm = 13
//! batch = 1
//!
//! [tiles]
//! tm = 8
//!
//! [policy]
//! fixed = ["k", "s"]
//! lenient = false
//!
//! [run]
//! seed = 643
//! range = 100
//! collect_all = false
//! ```
//!
//! Every key is optional; missing keys fall back to the compiled-in defaults
//! or to whatever the command line supplies.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::{ConfigError, OverrideMode, Overrides, Param, PolicyTable};

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub layer: LayerSection,
    #[serde(default)]
    pub tiles: TileSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LayerSection {
    pub k: Option<u64>,
    pub s: Option<u64>,
    pub rofm: Option<u64>,
    pub cofm: Option<u64>,
    pub mofm: Option<u64>,
    pub nifm: Option<u64>,
    pub batch: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TileSection {
    pub tm: Option<u64>,
    pub tr: Option<u64>,
    pub tc: Option<u64>,
    pub tn: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default)]
    pub fixed: Vec<String>,
    #[serde(default)]
    pub lenient: bool,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    pub seed: Option<u64>,
    pub range: Option<u32>,
    pub collect_all: Option<bool>,
}

impl ConfigFile {
    /// Read and parse a config file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse TOML text; `origin` only feeds error messages.
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse {
            path: origin.to_string(),
            message: err.to_string(),
        })
    }

    pub fn overrides(&self) -> Overrides {
        let mut o = Overrides::new();
        o.set_opt(Param::KernelSize, self.layer.k)
            .set_opt(Param::Stride, self.layer.s)
            .set_opt(Param::OutputHeight, self.layer.rofm)
            .set_opt(Param::OutputWidth, self.layer.cofm)
            .set_opt(Param::OutputDepth, self.layer.mofm)
            .set_opt(Param::InputDepth, self.layer.nifm)
            .set_opt(Param::Batch, self.layer.batch)
            .set_opt(Param::TileDepth, self.tiles.tm)
            .set_opt(Param::TileRow, self.tiles.tr)
            .set_opt(Param::TileColumn, self.tiles.tc)
            .set_opt(Param::TileInputDepth, self.tiles.tn);
        o
    }

    pub fn policy_table(&self) -> Result<PolicyTable, ConfigError> {
        PolicyTable::from_fixed_names(&self.policy.fixed)
    }

    pub fn override_mode(&self) -> OverrideMode {
        if self.policy.lenient {
            OverrideMode::Warn
        } else {
            OverrideMode::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = ConfigFile::parse("", "inline").unwrap();
        assert_eq!(cfg, ConfigFile::default());
        assert!(cfg.overrides().is_empty());
    }

    #[test]
    fn unknown_key_is_a_parse_error() {
        let err = ConfigFile::parse("[layer]\nkernel = 3\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn sections_map_to_overrides() {
        let cfg = ConfigFile::parse("[layer]\nk = 5\n[tiles]\ntn = 2\n", "inline").unwrap();
        let o = cfg.overrides();
        assert_eq!(o.get(Param::KernelSize), Some(5));
        assert_eq!(o.get(Param::TileInputDepth), Some(2));
        assert_eq!(o.get(Param::Stride), None);
    }
}
