// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The peephole driver.
//!
//! The driver owns the unit's line buffer, walks it left to right, and at
//! each instruction tries the candidate rules in order (descending OLEVEL,
//! ascending OFLAG). The first candidate whose window matches and whose
//! predicate holds fires; the replacement is spliced in place and scanning
//! backs up far enough for the new prefix to participate in further
//! rewrites. A pass with zero rewrites is the fixed point. Rewrite and
//! pass caps bound pathological rule sets; a cooperative cancel flag is
//! checked between passes only, so the buffer is always left in a
//! consistent state.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::asm::{parse_lines, SourceLine};
use crate::core::error::{Diagnostic, OptError, OptErrorKind, Severity};
use crate::peephole::eval::{evaluate, Bindings, MatchContext};
use crate::peephole::parser::Rule;
use crate::peephole::registry::{EnabledRules, RuleRegistry};
use crate::peephole::template::InstantiateError;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    /// Session optimization level; gates rules by their `OLEVEL`.
    pub level: u32,
    /// Rule flags to exclude.
    pub disabled_flags: HashSet<u32>,
    /// Upper bound on full passes over a unit.
    pub max_passes: u32,
    /// Upper bound on total rewrites per unit.
    pub max_rewrites: u32,
    /// Record a structured trace entry per rewrite.
    pub trace: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            level: 1,
            disabled_flags: HashSet::new(),
            max_passes: 32,
            max_rewrites: 4096,
            trace: false,
        }
    }
}

/// One structured trace record per rewrite.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub rule_flag: u32,
    /// Line index of the window start at the time of the rewrite.
    pub position: usize,
    pub before_lines: Vec<String>,
    pub after_lines: Vec<String>,
}

impl TraceRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "rule_flag": self.rule_flag,
            "position": self.position,
            "before_lines": self.before_lines,
            "after_lines": self.after_lines,
        })
    }
}

/// Per-unit accounting.
#[derive(Debug, Clone, Default)]
pub struct OptimizeStats {
    pub passes: u32,
    pub rewrites: u32,
    /// Applications per rule flag.
    pub applications: BTreeMap<u32, u32>,
}

impl OptimizeStats {
    pub fn most_applied(&self) -> Option<(u32, u32)> {
        self.applications
            .iter()
            .max_by_key(|(flag, count)| (*count, std::cmp::Reverse(*flag)))
            .map(|(flag, count)| (*flag, *count))
    }
}

/// Result of optimizing one unit.
#[derive(Debug)]
pub struct OptimizeOutcome {
    pub lines: Vec<String>,
    pub stats: OptimizeStats,
    pub diagnostics: Vec<Diagnostic>,
    pub traces: Vec<TraceRecord>,
}

/// A per-unit driver borrowing the shared, frozen registry.
pub struct Optimizer<'a> {
    registry: &'a RuleRegistry,
    options: OptimizeOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Optimizer<'a> {
    pub fn new(registry: &'a RuleRegistry, options: OptimizeOptions) -> Self {
        Self {
            registry,
            options,
            cancel: None,
        }
    }

    /// Install a cooperative cancel flag, checked between passes.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Rewrite an assembly line stream to fixed point.
    pub fn optimize<S: AsRef<str>>(&self, input: &[S]) -> OptimizeOutcome {
        let enabled = self
            .registry
            .select(self.options.level, &self.options.disabled_flags);
        let mut lines = parse_lines(input);
        let mut stats = OptimizeStats::default();
        let mut diagnostics = Vec::new();
        let mut traces = Vec::new();

        if !enabled.is_empty() {
            self.run_passes(&enabled, &mut lines, &mut stats, &mut diagnostics, &mut traces);
        }

        OptimizeOutcome {
            lines: lines.iter().map(|line| line.text().to_string()).collect(),
            stats,
            diagnostics,
            traces,
        }
    }

    fn run_passes(
        &self,
        enabled: &EnabledRules<'_>,
        lines: &mut Vec<SourceLine>,
        stats: &mut OptimizeStats,
        diagnostics: &mut Vec<Diagnostic>,
        traces: &mut Vec<TraceRecord>,
    ) {
        // The freshly spliced prefix must be able to participate in
        // further matches, so scanning resumes this many executable
        // instructions back from the rewrite point.
        let backscan = enabled.max_pattern_len().saturating_sub(1);

        loop {
            if self.cancelled() {
                return;
            }
            if stats.passes >= self.options.max_passes {
                diagnostics.push(thrash_diagnostic(
                    &format!("pass limit of {} exceeded", self.options.max_passes),
                    stats,
                ));
                return;
            }
            stats.passes += 1;

            let mut pass_rewrites = 0u32;
            let mut k = 0usize;
            while k < lines.len() {
                let mnemonic = match lines[k].as_instruction() {
                    Some(instr) => instr.mnemonic.clone(),
                    None => {
                        k += 1;
                        continue;
                    }
                };

                if self.apply_at(enabled, lines, k, &mnemonic, diagnostics, traces, stats) {
                    pass_rewrites += 1;
                    stats.rewrites += 1;
                    if stats.rewrites >= self.options.max_rewrites {
                        diagnostics.push(thrash_diagnostic(
                            &format!("rewrite limit of {} exceeded", self.options.max_rewrites),
                            stats,
                        ));
                        return;
                    }
                    k = backscan_position(lines, k, backscan);
                } else {
                    k += 1;
                }
            }

            if pass_rewrites == 0 {
                return;
            }
        }
    }

    /// Try every candidate rule at line index `k`; apply the first that
    /// matches with a true predicate. Returns whether a rewrite happened.
    #[allow(clippy::too_many_arguments)]
    fn apply_at(
        &self,
        enabled: &EnabledRules<'_>,
        lines: &mut Vec<SourceLine>,
        k: usize,
        mnemonic: &str,
        diagnostics: &mut Vec<Diagnostic>,
        traces: &mut Vec<TraceRecord>,
        stats: &mut OptimizeStats,
    ) -> bool {
        for rule in enabled.candidates(mnemonic) {
            let Some(window) = collect_window(lines, k, rule.pattern.len()) else {
                continue;
            };
            let Some(mut bindings) = rule.pattern.match_window(lines, &window.instructions)
            else {
                continue;
            };

            let span_end = window.instructions.last().copied().unwrap_or(k);
            if !self.evaluate_rule(rule, lines, &window.instructions, span_end, &mut bindings) {
                continue;
            }

            let replacement = match rule.template.instantiate(&bindings) {
                Ok(instrs) => instrs,
                Err(InstantiateError::Undefined(_)) => continue,
                Err(InstantiateError::Malformed { line, reason }) => {
                    diagnostics.push(
                        Diagnostic::new(
                            k as u32 + 1,
                            Severity::Error,
                            OptError::new(
                                OptErrorKind::Internal,
                                &format!(
                                    "rule {} ({}) produced ill-formed assembly",
                                    rule.flag, rule.source
                                ),
                                Some(&reason),
                            ),
                        )
                        .with_source(Some(line)),
                    );
                    continue;
                }
            };

            splice(lines, k, span_end, &window.elided, replacement, rule, traces, self.options.trace);
            *stats.applications.entry(rule.flag).or_insert(0) += 1;
            return true;
        }
        false
    }

    fn evaluate_rule(
        &self,
        rule: &Rule,
        lines: &[SourceLine],
        window: &[usize],
        span_end: usize,
        bindings: &mut Bindings,
    ) -> bool {
        for (var, expr) in &rule.defines {
            let value = {
                let ctx = MatchContext {
                    bindings,
                    lines,
                    window,
                    after: span_end + 1,
                };
                evaluate(expr, &ctx)
            };
            bindings.insert(*var, value);
        }

        match &rule.predicate {
            Some(predicate) => {
                let ctx = MatchContext {
                    bindings,
                    lines,
                    window,
                    after: span_end + 1,
                };
                evaluate(predicate, &ctx).is_truthy()
            }
            None => true,
        }
    }
}

struct Window {
    /// Line indices of the matched instructions.
    instructions: Vec<usize>,
    /// Line indices of directives and comments inside the span, in order.
    elided: Vec<usize>,
}

/// Collect `need` executable instructions starting at line `k`. Labels and
/// opaque lines are barriers; directives, comments, and blanks are elided
/// but remembered. Trailing non-executable lines stay outside the span.
fn collect_window(lines: &[SourceLine], k: usize, need: usize) -> Option<Window> {
    debug_assert!(need > 0);
    let mut instructions = vec![k];
    let mut elided = Vec::new();
    let mut pending = Vec::new();
    let mut idx = k + 1;

    while instructions.len() < need {
        match lines.get(idx)? {
            SourceLine::Instruction(_) => {
                elided.append(&mut pending);
                instructions.push(idx);
            }
            SourceLine::Label { .. } | SourceLine::Opaque(_) => return None,
            SourceLine::Directive(_) | SourceLine::Comment(_) | SourceLine::Blank(_) => {
                pending.push(idx);
            }
        }
        idx += 1;
    }

    Some(Window {
        instructions,
        elided,
    })
}

#[allow(clippy::too_many_arguments)]
fn splice(
    lines: &mut Vec<SourceLine>,
    start: usize,
    span_end: usize,
    elided: &[usize],
    replacement: Vec<crate::asm::Instruction>,
    rule: &Rule,
    traces: &mut Vec<TraceRecord>,
    trace: bool,
) {
    let before: Vec<String> = if trace {
        lines[start..=span_end]
            .iter()
            .map(|l| l.text().to_string())
            .collect()
    } else {
        Vec::new()
    };

    // Replacement instructions first, then the elided directive/comment
    // lines in their original order.
    let mut spliced: Vec<SourceLine> = replacement
        .into_iter()
        .map(SourceLine::Instruction)
        .collect();
    for &idx in elided {
        spliced.push(lines[idx].clone());
    }

    if trace {
        traces.push(TraceRecord {
            rule_flag: rule.flag,
            position: start,
            before_lines: before,
            after_lines: spliced.iter().map(|l| l.text().to_string()).collect(),
        });
    }

    lines.splice(start..=span_end, spliced);
}

/// Step back `count` executable instructions from line index `k`.
fn backscan_position(lines: &[SourceLine], k: usize, count: usize) -> usize {
    let mut pos = k;
    let mut stepped = 0;
    while pos > 0 && stepped < count {
        pos -= 1;
        if lines[pos].as_instruction().is_some() {
            stepped += 1;
        }
    }
    pos
}

fn thrash_diagnostic(reason: &str, stats: &OptimizeStats) -> Diagnostic {
    let detail = match stats.most_applied() {
        Some((flag, count)) => {
            format!("{reason}; most applied rule: flag {flag} ({count} applications)")
        }
        None => reason.to_string(),
    };
    Diagnostic::new(
        0,
        Severity::Warning,
        OptError::new(OptErrorKind::Engine, "optimization aborted", Some(&detail)),
    )
    .with_code("opt002")
}
