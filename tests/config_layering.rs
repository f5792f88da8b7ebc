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

use std::fs;

use convcheck::config::{
    ConfigBuilder, ConfigError, ConfigFile, OverrideMode, Overrides, Param, PolicyTable,
};
use convcheck::{LayerConfig, TileConfig};

#[test]
fn defaults_match_the_reference_layer() {
    let resolved = ConfigBuilder::default().build(&Overrides::new()).unwrap();
    assert_eq!(
        resolved.layer,
        LayerConfig::new(3, 1, 13, 13, 128, 192, 10).unwrap()
    );
    assert_eq!(resolved.tiles, TileConfig::default());
}

#[test]
fn tunable_overrides_apply() {
    let mut o = Overrides::new();
    o.set(Param::KernelSize, 5)
        .set(Param::Stride, 2)
        .set(Param::Batch, 1)
        .set(Param::TileRow, 7);
    let resolved = ConfigBuilder::default().build(&o).unwrap();
    assert_eq!(resolved.layer.kernel_size(), 5);
    assert_eq!(resolved.layer.input_height(), 13 * 2 + 5 - 2);
    assert_eq!(resolved.tiles.row, 7);
}

#[test]
fn fixed_parameter_override_is_rejected_when_strict() {
    let builder = ConfigBuilder::new(
        PolicyTable::all_tunable().with_fixed(&[Param::TileDepth]),
        OverrideMode::Reject,
    );
    let mut o = Overrides::new();
    o.set(Param::TileDepth, 8);
    assert_eq!(
        builder.build(&o).unwrap_err(),
        ConfigError::FixedParameter {
            param: Param::TileDepth
        }
    );
}

#[test]
fn fixed_parameter_override_is_ignored_when_lenient() {
    let builder = ConfigBuilder::new(
        PolicyTable::all_tunable().with_fixed(&[Param::KernelSize]),
        OverrideMode::Warn,
    );
    let mut o = Overrides::new();
    o.set(Param::KernelSize, 7).set(Param::Stride, 2);
    let resolved = builder.build(&o).unwrap();
    assert_eq!(resolved.layer.kernel_size(), 3);
    assert_eq!(resolved.layer.stride(), 2);
}

#[test]
fn zero_override_is_invalid() {
    let mut o = Overrides::new();
    o.set(Param::TileInputDepth, 0);
    assert_eq!(
        ConfigBuilder::default().build(&o).unwrap_err(),
        ConfigError::ZeroParameter {
            param: Param::TileInputDepth
        }
    );
}

#[test]
fn file_then_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layer.toml");
    fs::write(
        &path,
        r#"
[layer]
k = 5
batch = 2
mofm = 16

[tiles]
tm = 8

[policy]
fixed = ["s"]

[run]
seed = 7
"#,
    )
    .unwrap();

    let file = ConfigFile::load(&path).unwrap();
    assert_eq!(file.run.seed, Some(7));

    let mut cli = Overrides::new();
    cli.set(Param::Batch, 3);
    let merged = file.overrides().merged_with(&cli);
    let builder = ConfigBuilder::new(file.policy_table().unwrap(), file.override_mode());
    let resolved = builder.build(&merged).unwrap();

    assert_eq!(resolved.layer.kernel_size(), 5);
    assert_eq!(resolved.layer.batch_size(), 3);
    assert_eq!(resolved.layer.output_depth(), 16);
    assert_eq!(resolved.tiles.depth, 8);

    let mut stride = Overrides::new();
    stride.set(Param::Stride, 2);
    assert!(matches!(
        builder.build(&file.overrides().merged_with(&stride)),
        Err(ConfigError::FixedParameter { .. })
    ));
}

#[test]
fn unknown_policy_name_is_invalid() {
    let file = ConfigFile::parse("[policy]\nfixed = [\"kernel\"]\n", "inline").unwrap();
    assert_eq!(
        file.policy_table().unwrap_err(),
        ConfigError::UnknownParameter("kernel".into())
    );
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigFile::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
