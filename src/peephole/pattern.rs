// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Pattern blocks and window matching.
//!
//! A pattern line is a mnemonic term plus operand terms; a term is a
//! literal (matched after normalization) or a `$N` variable. The first
//! occurrence of a variable binds it, later occurrences must unify with
//! the existing binding. Matching either yields a complete binding
//! environment or nothing.

use std::collections::BTreeSet;

use crate::asm::operand::{is_condition_name, Operand};
use crate::asm::scanner::{ScanMode, Scanner, TokenType};
use crate::asm::{parse_one_operand, Instruction, SourceLine};
use crate::peephole::eval::Bindings;
use crate::peephole::expr::{values_equal, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Term<T> {
    Literal(T),
    Var(u32),
}

#[derive(Debug, Clone)]
pub struct LinePattern {
    pub mnemonic: Term<String>,
    pub operands: Vec<Term<Operand>>,
}

#[derive(Debug, Clone)]
pub struct BlockPattern {
    lines: Vec<LinePattern>,
    vars: BTreeSet<u32>,
}

impl BlockPattern {
    /// Parse the lines of a `REPLACE` block.
    pub fn parse(lines: &[String]) -> Result<Self, String> {
        if lines.is_empty() {
            return Err("pattern block is empty".to_string());
        }
        let mut parsed = Vec::new();
        let mut vars = BTreeSet::new();
        for line in lines {
            let lp = parse_pattern_line(line)?;
            if let Term::Var(n) = lp.mnemonic {
                vars.insert(n);
            }
            for term in &lp.operands {
                if let Term::Var(n) = term {
                    vars.insert(*n);
                }
            }
            parsed.push(lp);
        }
        Ok(Self {
            lines: parsed,
            vars,
        })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Variables bound by this pattern.
    pub fn vars(&self) -> &BTreeSet<u32> {
        &self.vars
    }

    /// First-line mnemonic when it is a literal; `None` for a variable
    /// mnemonic, which makes the rule a candidate at every position.
    pub fn first_mnemonic(&self) -> Option<&str> {
        match &self.lines[0].mnemonic {
            Term::Literal(m) => Some(m),
            Term::Var(_) => None,
        }
    }

    /// Unify the pattern against a window of matched-size instructions
    /// given as line indices into `lines`.
    pub fn match_window(&self, lines: &[SourceLine], window: &[usize]) -> Option<Bindings> {
        if window.len() != self.lines.len() {
            return None;
        }
        let mut bindings = Bindings::new();
        for (pattern, &line_idx) in self.lines.iter().zip(window) {
            let instr = lines[line_idx].as_instruction()?;
            if !match_line(pattern, instr, line_idx, &mut bindings) {
                return None;
            }
        }
        Some(bindings)
    }
}

fn match_line(
    pattern: &LinePattern,
    instr: &Instruction,
    line_idx: usize,
    bindings: &mut Bindings,
) -> bool {
    match &pattern.mnemonic {
        Term::Literal(m) => {
            if m != &instr.mnemonic {
                return false;
            }
        }
        Term::Var(n) => {
            let value = Value::Text(instr.mnemonic.clone());
            match bindings.get(*n) {
                Some(existing) => {
                    if !values_equal(existing, &value) {
                        return false;
                    }
                }
                None => bindings.bind_mnemonic(*n, value, line_idx),
            }
        }
    }

    if pattern.operands.len() != instr.operands.len() {
        return false;
    }

    for (term, operand) in pattern.operands.iter().zip(&instr.operands) {
        match term {
            Term::Literal(expected) => {
                if !literal_matches(expected, operand) {
                    return false;
                }
            }
            Term::Var(n) => {
                let value = Value::Operand(operand.clone());
                match bindings.get(*n) {
                    Some(existing) => {
                        if !values_equal(existing, &value) {
                            return false;
                        }
                    }
                    None => bindings.insert(*n, value),
                }
            }
        }
    }
    true
}

fn literal_matches(expected: &Operand, actual: &Operand) -> bool {
    if expected == actual {
        return true;
    }
    // A register-named literal in a pattern also matches the condition
    // reading of the same name (`c`), and vice versa; the pattern author
    // writes the name without knowing how the instruction classified it.
    match (expected, actual) {
        (Operand::Register(a), Operand::Condition(b))
        | (Operand::Condition(a), Operand::Register(b)) => a.eq_ignore_ascii_case(b),
        (Operand::Symbol(a), Operand::Condition(b))
        | (Operand::Condition(a), Operand::Symbol(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Parse one pattern or template line into terms.
pub fn parse_pattern_line(text: &str) -> Result<LinePattern, String> {
    let mut scanner = Scanner::new(text, ScanMode::Dsl);
    let mnemonic = match scanner.next_token() {
        TokenType::Identifier => Term::Literal(scanner.get_string().to_ascii_lowercase()),
        TokenType::Variable => Term::Var(scanner.get_value() as u32),
        TokenType::Eof => return Err("pattern line contains no mnemonic".to_string()),
        _ => return Err(format!("pattern line must start with a mnemonic: {}", text.trim())),
    };

    let mut operands = Vec::new();
    let mut t = scanner.next_token();
    if t != TokenType::Eof {
        loop {
            let term = match t {
                TokenType::Variable => Term::Var(scanner.get_value() as u32),
                TokenType::Error => return Err(scanner.get_error_msg().to_string()),
                other => Term::Literal(parse_one_operand(&mut scanner, other)?),
            };
            operands.push(term);
            match scanner.next_token() {
                TokenType::Comma => t = scanner.next_token(),
                TokenType::Eof => break,
                TokenType::Error => return Err(scanner.get_error_msg().to_string()),
                other => return Err(format!("unexpected token in pattern line: {other:?}")),
            }
        }
    }

    let mut line = LinePattern { mnemonic, operands };
    apply_condition_context(&mut line);
    Ok(line)
}

/// Mirror of the instruction parser's contextual condition handling for
/// literal first operands of branch mnemonics.
fn apply_condition_context(line: &mut LinePattern) {
    let mnemonic = match &line.mnemonic {
        Term::Literal(m) => m.as_str(),
        Term::Var(_) => return,
    };
    let convert = match mnemonic {
        "jp" | "jr" | "call" => line.operands.len() >= 2,
        "ret" => line.operands.len() == 1,
        _ => false,
    };
    if !convert {
        return;
    }
    if let Some(Term::Literal(op)) = line.operands.first_mut() {
        let name = match op {
            Operand::Register(name) | Operand::Symbol(name) => name.clone(),
            _ => return,
        };
        if is_condition_name(&name) {
            *op = Operand::Condition(name);
        }
    }
}
