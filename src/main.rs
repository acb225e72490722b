// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for zxopt.

use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use zxopt::cli::{validate_cli, Cli, CliConfig, OutputFormat};
use zxopt::core::error::{Diagnostic, OptError, OptErrorKind, Severity};
use zxopt::peephole::{OptimizeOutcome, Optimizer, RuleRegistry};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("zxopt: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(&config) {
        Ok(outcome) => {
            emit_diagnostics(&outcome.diagnostics);
            emit_summary(&config, &outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("zxopt: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &CliConfig) -> Result<OptimizeOutcome, OptError> {
    let registry = RuleRegistry::load_dir(&config.opts_dir)?;

    let source = fs::read_to_string(&config.input).map_err(|e| {
        OptError::new(
            OptErrorKind::Io,
            "cannot read input",
            Some(&format!("{}: {e}", config.input.display())),
        )
    })?;
    let lines: Vec<&str> = source.lines().collect();

    let outcome = Optimizer::new(&registry, config.options.clone()).optimize(&lines);

    if config.options.trace {
        for record in &outcome.traces {
            eprintln!("{}", record.to_json());
        }
    }

    write_output(config, &outcome.lines)?;
    Ok(outcome)
}

fn write_output(config: &CliConfig, lines: &[String]) -> Result<(), OptError> {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    match &config.outfile {
        Some(path) => fs::write(path, text).map_err(|e| {
            OptError::new(
                OptErrorKind::Io,
                "cannot write output",
                Some(&format!("{}: {e}", path.display())),
            )
        }),
        None => {
            let mut stdout = io::stdout();
            stdout.write_all(text.as_bytes()).map_err(|e| {
                OptError::new(OptErrorKind::Io, "cannot write output", Some(&e.to_string()))
            })
        }
    }
}

fn emit_diagnostics(diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        eprintln!("{}", diag.format_with_context(false));
    }
}

fn emit_summary(config: &CliConfig, outcome: &OptimizeOutcome) {
    match config.format {
        OutputFormat::Json => {
            let applications: serde_json::Map<String, serde_json::Value> = outcome
                .stats
                .applications
                .iter()
                .map(|(flag, count)| (flag.to_string(), json!(count)))
                .collect();
            let summary = json!({
                "passes": outcome.stats.passes,
                "rewrites": outcome.stats.rewrites,
                "applications": applications,
                "warnings": outcome
                    .diagnostics
                    .iter()
                    .filter(|d| d.severity() == Severity::Warning)
                    .count(),
            });
            println!("{summary}");
        }
        OutputFormat::Text => {
            if config.quiet {
                return;
            }
            eprintln!(
                "zxopt: {} rewrite(s) in {} pass(es)",
                outcome.stats.rewrites, outcome.stats.passes
            );
            for (flag, count) in &outcome.stats.applications {
                eprintln!("zxopt:   rule {flag}: {count} application(s)");
            }
        }
    }
}
