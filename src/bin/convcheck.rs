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

//! `convcheck`: run one convolution layer on the accelerator and verify it
//! against the host reference.

use std::io::{self, Write};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use convcheck::config::{ConfigBuilder, ConfigFile, OverrideMode, Overrides, Param, ResolvedConfig};
use convcheck::random::{check_range, DEFAULT_RANGE, DEFAULT_SEED};
use convcheck::{CompareMode, HostAccelerator, RunContext, RunOptions, RunReport};

#[derive(Parser, Debug)]
#[command(author, version, about = None, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved layer and tile parameters, then exit.
    Params,
}

#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// Kernel size (square).
    #[arg(long, global = true, value_name = "N")]
    k: Option<u64>,
    /// Stride.
    #[arg(long, global = true, value_name = "N")]
    s: Option<u64>,
    /// Output feature map rows.
    #[arg(long, global = true, value_name = "N")]
    rofm: Option<u64>,
    /// Output feature map columns.
    #[arg(long, global = true, value_name = "N")]
    cofm: Option<u64>,
    /// Output feature map depth.
    #[arg(long, global = true, value_name = "N")]
    mofm: Option<u64>,
    /// Input feature map depth.
    #[arg(long, global = true, value_name = "N")]
    nifm: Option<u64>,
    /// Batch size.
    #[arg(long, global = true, value_name = "N")]
    batch: Option<u64>,
    /// Output-depth tile.
    #[arg(long, global = true, value_name = "N")]
    tm: Option<u64>,
    /// Row tile.
    #[arg(long, global = true, value_name = "N")]
    tr: Option<u64>,
    /// Column tile.
    #[arg(long, global = true, value_name = "N")]
    tc: Option<u64>,
    /// Input-depth tile.
    #[arg(long, global = true, value_name = "N")]
    tn: Option<u64>,
    /// TOML file with [layer], [tiles], [policy] and [run] tables.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Seed for operand generation.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Operand values are drawn from {0, 1/RANGE, ..., (RANGE-1)/RANGE}; at most 2^24.
    #[arg(long, global = true)]
    range: Option<u32>,
    /// Report every mismatching element instead of stopping at the first.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    collect_all: bool,
    /// Warn about and ignore overrides of fixed parameters instead of failing.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    lenient: bool,
    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    json: bool,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        let mut o = Overrides::new();
        o.set_opt(Param::KernelSize, self.k)
            .set_opt(Param::Stride, self.s)
            .set_opt(Param::OutputHeight, self.rofm)
            .set_opt(Param::OutputWidth, self.cofm)
            .set_opt(Param::OutputDepth, self.mofm)
            .set_opt(Param::InputDepth, self.nifm)
            .set_opt(Param::Batch, self.batch)
            .set_opt(Param::TileDepth, self.tm)
            .set_opt(Param::TileRow, self.tr)
            .set_opt(Param::TileColumn, self.tc)
            .set_opt(Param::TileInputDepth, self.tn);
        o
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.run.log_level);

    let file = match &cli.run.config {
        Some(path) => match ConfigFile::load(path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("error[config]: {err}");
                process::exit(1);
            }
        },
        None => ConfigFile::default(),
    };

    let resolved = match resolve_config(&cli.run, &file) {
        Ok(resolved) => resolved,
        Err(msg) => {
            eprintln!("error[config]: {msg}");
            process::exit(1);
        }
    };

    let options = match run_options(&cli.run, &file) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("error[config]: {msg}");
            process::exit(1);
        }
    };

    if let Some(Command::Params) = cli.command {
        if let Err(err) = print_params(&resolved, &options, cli.run.json) {
            eprintln!("error[report]: {err:#}");
            process::exit(1);
        }
        return;
    }

    let mut accel = HostAccelerator::new();
    let report = match RunContext::run(resolved, options, &mut accel) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error[{}]: {err}", err.stage());
            process::exit(1);
        }
    };

    if let Err(err) = print_report(&report, cli.run.json) {
        eprintln!("error[report]: {err:#}");
        process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Defaults, then the config file, then the command line.
fn resolve_config(args: &RunArgs, file: &ConfigFile) -> Result<ResolvedConfig, String> {
    let policy = file.policy_table().map_err(|err| err.to_string())?;
    let mode = if args.lenient {
        OverrideMode::Warn
    } else {
        file.override_mode()
    };
    let overrides = file.overrides().merged_with(&args.overrides());
    ConfigBuilder::new(policy, mode)
        .build(&overrides)
        .map_err(|err| err.to_string())
}

fn run_options(args: &RunArgs, file: &ConfigFile) -> Result<RunOptions, String> {
    let range = match args.range.or(file.run.range) {
        Some(raw) => {
            let range = NonZeroU32::new(raw).ok_or("range must be positive")?;
            check_range(range).map_err(|err| err.to_string())?
        }
        None => DEFAULT_RANGE,
    };
    let collect_all = args.collect_all || file.run.collect_all.unwrap_or(false);
    Ok(RunOptions {
        seed: args.seed.or(file.run.seed).unwrap_or(DEFAULT_SEED),
        range,
        mode: if collect_all {
            CompareMode::CollectAll
        } else {
            CompareMode::FailFast
        },
    })
}

fn print_params(resolved: &ResolvedConfig, options: &RunOptions, json: bool) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, resolved).context("failed to encode parameters")?;
        writeln!(out)?;
        return Ok(());
    }
    let layer = &resolved.layer;
    let tiles = &resolved.tiles;
    writeln!(out, "Batch size: {}", layer.batch_size())?;
    writeln!(out)?;
    writeln!(out, "Layer parameters:")?;
    writeln!(out, "K: {}\tS: {}", layer.kernel_size(), layer.stride())?;
    writeln!(
        out,
        "R: {}\tC: {}\tM: {}\tN: {}",
        layer.output_height(),
        layer.output_width(),
        layer.output_depth(),
        layer.input_depth()
    )?;
    writeln!(
        out,
        "input: {}x{}",
        layer.input_height(),
        layer.input_width()
    )?;
    writeln!(out)?;
    writeln!(out, "Kernel parameters:")?;
    writeln!(
        out,
        "Tm: {}\tTn: {}\tTr: {}\tTc: {}",
        tiles.depth, tiles.input_depth, tiles.row, tiles.column
    )?;
    writeln!(out)?;
    writeln!(out, "seed: {}\trange: {}", options.seed, options.range)?;
    Ok(())
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, report).context("failed to encode report")?;
        writeln!(out)?;
    } else {
        writeln!(out, "{report}")?;
    }
    Ok(())
}
