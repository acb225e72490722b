// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Rule registry.
//!
//! Rules are loaded once at startup, checked for duplicate flags, frozen,
//! and shared read-only between driver instances. Selection by level and
//! disabled flags happens per optimizer, yielding an index keyed on the
//! first pattern mnemonic for fast candidate lookup.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::core::error::{OptError, OptErrorKind};
use crate::peephole::parser::{parse_rule_str, Rule};

#[derive(Debug, Default)]
pub struct RuleRegistry {
    /// All loaded rules, sorted by flag.
    rules: Vec<Rule>,
    max_pattern_len: usize,
}

impl RuleRegistry {
    /// Read and parse every `*.opt` file in `dir`, in sorted filename
    /// order. Any load error is fatal.
    pub fn load_dir(dir: &Path) -> Result<Self, OptError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            OptError::new(
                OptErrorKind::Io,
                "cannot read rule directory",
                Some(&format!("{}: {e}", dir.display())),
            )
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "opt"))
            .collect();
        paths.sort();

        let mut rules = Vec::new();
        for path in paths {
            let text = fs::read_to_string(&path).map_err(|e| {
                OptError::new(
                    OptErrorKind::Io,
                    "cannot read rule file",
                    Some(&format!("{}: {e}", path.display())),
                )
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let rule = parse_rule_str(&text, &name).map_err(|e| {
                OptError::new(
                    OptErrorKind::RuleLoad,
                    &format!("{}:{}", path.display(), e.line),
                    Some(&e.message),
                )
            })?;
            rules.push(rule);
        }

        Self::from_rules(rules)
    }

    /// Freeze a rule set, enforcing flag uniqueness.
    pub fn from_rules(mut rules: Vec<Rule>) -> Result<Self, OptError> {
        let mut seen: HashMap<u32, String> = HashMap::new();
        for rule in &rules {
            if let Some(first) = seen.get(&rule.flag) {
                return Err(OptError::new(
                    OptErrorKind::RuleLoad,
                    "duplicate OFLAG",
                    Some(&format!("{} declared by {} and {}", rule.flag, first, rule.source)),
                ));
            }
            seen.insert(rule.flag, rule.source.clone());
        }

        rules.sort_by_key(|rule| rule.flag);
        let max_pattern_len = rules.iter().map(|r| r.pattern.len()).max().unwrap_or(0);
        Ok(Self {
            rules,
            max_pattern_len,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Longest pattern across all loaded rules.
    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }

    /// Build the enabled view for a session: a rule is enabled iff the
    /// session level is at least its `OLEVEL` and its flag is not
    /// disabled.
    pub fn select(&self, level: u32, disabled: &HashSet<u32>) -> EnabledRules<'_> {
        let mut by_mnemonic: HashMap<String, Vec<&Rule>> = HashMap::new();
        let mut any_mnemonic: Vec<&Rule> = Vec::new();
        let mut max_pattern_len = 0usize;

        let mut enabled: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.level <= level && !disabled.contains(&rule.flag))
            .collect();
        // Candidate order: descending OLEVEL, then ascending OFLAG.
        enabled.sort_by_key(|rule| (Reverse(rule.level), rule.flag));

        for rule in enabled {
            max_pattern_len = max_pattern_len.max(rule.pattern.len());
            match rule.pattern.first_mnemonic() {
                Some(m) => by_mnemonic.entry(m.to_string()).or_default().push(rule),
                None => any_mnemonic.push(rule),
            }
        }

        EnabledRules {
            by_mnemonic,
            any_mnemonic,
            max_pattern_len,
        }
    }
}

/// The rules active for one optimization session, indexed for lookup.
pub struct EnabledRules<'a> {
    by_mnemonic: HashMap<String, Vec<&'a Rule>>,
    /// Rules whose first pattern mnemonic is a variable; candidates at
    /// every position.
    any_mnemonic: Vec<&'a Rule>,
    max_pattern_len: usize,
}

impl<'a> EnabledRules<'a> {
    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }

    pub fn is_empty(&self) -> bool {
        self.by_mnemonic.is_empty() && self.any_mnemonic.is_empty()
    }

    /// Candidates for an instruction, merging the mnemonic bucket with the
    /// variable-mnemonic bucket while preserving the global candidate
    /// order.
    pub fn candidates(&self, mnemonic: &str) -> Vec<&'a Rule> {
        let keyed: &[&Rule] = self
            .by_mnemonic
            .get(mnemonic)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        merge_ordered(keyed, &self.any_mnemonic)
    }
}

fn rule_order(rule: &Rule) -> (Reverse<u32>, u32) {
    (Reverse(rule.level), rule.flag)
}

fn merge_ordered<'a>(a: &[&'a Rule], b: &[&'a Rule]) -> Vec<&'a Rule> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if rule_order(a[i]) <= rule_order(b[j]) {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}
