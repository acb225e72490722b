// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::core::error::{OptError, OptErrorKind};
use crate::peephole::OptimizeOptions;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Peephole optimizer for Z80 assembly emitted by the ZX BASIC compiler backend.

Reads one assembly file, applies the rule files from the opts directory to
a fixed point, and writes the rewritten assembly to the output file or to
stdout. Rules are gated by their OLEVEL against -O and can be disabled
individually by flag.";

#[derive(Parser, Debug)]
#[command(
    name = "zxopt",
    version = VERSION,
    about = "Data-driven Z80 peephole optimizer",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select run summary format. text is default; json emits a machine-readable summary on stdout."
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress the run summary for successful runs. Warnings and errors are still reported."
    )]
    pub quiet: bool,
    #[arg(
        short = 'O',
        long = "olevel",
        value_name = "N",
        default_value_t = 1,
        long_help = "Optimization level. A rule with OLEVEL k is applied iff k <= N. Level 0 disables optimization."
    )]
    pub olevel: u32,
    #[arg(
        long = "opts-dir",
        value_name = "DIR",
        default_value = "opts",
        long_help = "Directory containing the *.opt rule files. Files are read in sorted name order."
    )]
    pub opts_dir: PathBuf,
    #[arg(
        long = "disable",
        value_name = "FLAG",
        action = ArgAction::Append,
        long_help = "Disable the rule with this OFLAG. May be repeated."
    )]
    pub disable: Vec<u32>,
    #[arg(
        long = "max-passes",
        value_name = "N",
        default_value_t = 32,
        long_help = "Upper bound on full passes over the unit before optimization is abandoned with a warning."
    )]
    pub max_passes: u32,
    #[arg(
        long = "max-rewrites",
        value_name = "N",
        default_value_t = 4096,
        long_help = "Upper bound on total rewrites per unit before optimization is abandoned with a warning."
    )]
    pub max_rewrites: u32,
    #[arg(
        long = "trace",
        action = ArgAction::SetTrue,
        long_help = "Emit one JSON record per rewrite on stderr: rule flag, position, before and after lines."
    )]
    pub trace: bool,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "FILE",
        long_help = "Write the optimized assembly to FILE instead of stdout."
    )]
    pub outfile: Option<PathBuf>,
    #[arg(value_name = "INPUT", long_help = "Assembly file to optimize.")]
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Validated run configuration derived from the raw CLI arguments.
#[derive(Debug)]
pub struct CliConfig {
    pub options: OptimizeOptions,
    pub opts_dir: PathBuf,
    pub input: PathBuf,
    pub outfile: Option<PathBuf>,
    pub format: OutputFormat,
    pub quiet: bool,
}

pub fn validate_cli(cli: &Cli) -> Result<CliConfig, OptError> {
    if cli.max_passes == 0 {
        return Err(OptError::new(
            OptErrorKind::Cli,
            "--max-passes must be a positive integer",
            None,
        ));
    }
    if cli.max_rewrites == 0 {
        return Err(OptError::new(
            OptErrorKind::Cli,
            "--max-rewrites must be a positive integer",
            None,
        ));
    }
    if cli.format == OutputFormat::Json && cli.outfile.is_none() {
        return Err(OptError::new(
            OptErrorKind::Cli,
            "--format json requires -o/--outfile so stdout carries only the summary",
            None,
        ));
    }

    let options = OptimizeOptions {
        level: cli.olevel,
        disabled_flags: cli.disable.iter().copied().collect(),
        max_passes: cli.max_passes,
        max_rewrites: cli.max_rewrites,
        trace: cli.trace,
    };

    Ok(CliConfig {
        options,
        opts_dir: cli.opts_dir.clone(),
        input: cli.input.clone(),
        outfile: cli.outfile.clone(),
        format: cli.format,
        quiet: cli.quiet,
    })
}
