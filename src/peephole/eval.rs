// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression evaluation over a match's binding environment.
//!
//! Evaluation never aborts a pass: anomalies (undefined variables in a
//! required position, argument-kind mismatches) collapse to `Undefined`
//! for value builtins and `false` for boolean builtins, which simply fails
//! the candidate rule.

use std::collections::BTreeMap;

use crate::asm::operand::{is_register_name, parse_number, Operand};
use crate::asm::SourceLine;
use crate::peephole::expr::{values_equal, BinOp, Expr, Value};
use crate::z80;

/// Variable bindings captured by a match, extended by `DEFINE` in order.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: BTreeMap<u32, Value>,
    /// Window line index for variables bound in mnemonic position.
    mnemonic_lines: BTreeMap<u32, usize>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: u32) -> Option<&Value> {
        self.values.get(&var)
    }

    pub fn contains(&self, var: u32) -> bool {
        self.values.contains_key(&var)
    }

    pub fn insert(&mut self, var: u32, value: Value) {
        self.values.insert(var, value);
    }

    pub fn bind_mnemonic(&mut self, var: u32, value: Value, window_line: usize) {
        self.values.insert(var, value);
        self.mnemonic_lines.insert(var, window_line);
    }

    pub fn mnemonic_line(&self, var: u32) -> Option<usize> {
        self.mnemonic_lines.get(&var).copied()
    }
}

/// Evaluation context: the bindings plus the surrounding instruction
/// stream, needed by the lookahead builtins.
pub struct MatchContext<'a> {
    pub bindings: &'a Bindings,
    /// Full line buffer of the unit.
    pub lines: &'a [SourceLine],
    /// Instructions of the matched window, as line indices.
    pub window: &'a [usize],
    /// Line index just past the matched span.
    pub after: usize,
}

pub fn evaluate(expr: &Expr, ctx: &MatchContext<'_>) -> Value {
    match expr {
        Expr::Int(n) => Value::Int(*n),
        Expr::Str(s) => Value::Text(s.clone()),
        Expr::Ident(name) => Value::Text(name.clone()),
        Expr::Var(n) => ctx
            .bindings
            .get(*n)
            .cloned()
            .unwrap_or(Value::Undefined),
        Expr::Not(inner) => Value::Bool(!evaluate(inner, ctx).is_truthy()),
        Expr::Binary { op, left, right } => match op {
            BinOp::Eq => Value::Bool(values_equal(&evaluate(left, ctx), &evaluate(right, ctx))),
            BinOp::Ne => Value::Bool(!values_equal(&evaluate(left, ctx), &evaluate(right, ctx))),
            BinOp::And => {
                let l = evaluate(left, ctx);
                if l.is_truthy() {
                    evaluate(right, ctx)
                } else {
                    Value::Bool(false)
                }
            }
            BinOp::Or => {
                let l = evaluate(left, ctx);
                if l.is_truthy() {
                    l
                } else {
                    evaluate(right, ctx)
                }
            }
        },
        Expr::Call { name, args } => call_builtin(name, args, ctx),
    }
}

pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    /// Boolean builtins answer `false` on argument-kind mismatch;
    /// value builtins answer `Undefined`.
    pub boolean: bool,
}

pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "IS_REGISTER", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_REG8", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_REG16", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_INDIR", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_LABEL", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_NUMERIC", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_INT", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_FLAG_UNUSED_BEFORE", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "IS_REQUIRED", min_args: 1, max_args: 1, boolean: true },
    Builtin { name: "OP_NARGS", min_args: 1, max_args: 1, boolean: false },
    Builtin { name: "LOWER", min_args: 1, max_args: 1, boolean: false },
    Builtin { name: "UPPER", min_args: 1, max_args: 1, boolean: false },
    Builtin { name: "CONCAT", min_args: 2, max_args: 8, boolean: false },
];

pub fn lookup_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

fn call_builtin(name: &str, args: &[Expr], ctx: &MatchContext<'_>) -> Value {
    match name {
        "IS_REGISTER" => Value::Bool(classify(&evaluate(&args[0], ctx), Class::Register)),
        "IS_REG8" => Value::Bool(classify(&evaluate(&args[0], ctx), Class::Reg8)),
        "IS_REG16" => Value::Bool(classify(&evaluate(&args[0], ctx), Class::Reg16)),
        "IS_INDIR" => Value::Bool(classify(&evaluate(&args[0], ctx), Class::Indirect)),
        "IS_LABEL" => Value::Bool(classify(&evaluate(&args[0], ctx), Class::Label)),
        "IS_NUMERIC" => Value::Bool(evaluate(&args[0], ctx).numeric_value().is_some()),
        "IS_INT" => Value::Bool(is_int(&evaluate(&args[0], ctx))),
        "IS_FLAG_UNUSED_BEFORE" => match evaluate(&args[0], ctx).numeric_value() {
            Some(n) if n >= 0 => Value::Bool(flags_unused_before(ctx, n as usize)),
            _ => Value::Bool(false),
        },
        "IS_REQUIRED" => match register_argument(&evaluate(&args[0], ctx)) {
            Some(reg) => Value::Bool(is_required(ctx, &reg)),
            None => Value::Bool(false),
        },
        "OP_NARGS" => op_nargs(&args[0], ctx),
        "LOWER" => match evaluate(&args[0], ctx) {
            Value::Undefined => Value::Undefined,
            v => Value::Text(v.render().to_ascii_lowercase()),
        },
        "UPPER" => match evaluate(&args[0], ctx) {
            Value::Undefined => Value::Undefined,
            v => Value::Text(v.render().to_ascii_uppercase()),
        },
        "CONCAT" => {
            let mut out = String::new();
            for arg in args {
                match evaluate(arg, ctx) {
                    Value::Undefined => return Value::Undefined,
                    v => out.push_str(&v.render()),
                }
            }
            Value::Text(out)
        }
        _ => Value::Undefined,
    }
}

enum Class {
    Register,
    Reg8,
    Reg16,
    Indirect,
    Label,
}

fn classify(value: &Value, class: Class) -> bool {
    match class {
        Class::Register => match value {
            Value::Operand(op) => op.is_register(),
            Value::Text(s) => is_register_name(s),
            _ => false,
        },
        Class::Reg8 => match value {
            Value::Operand(op) => op.is_reg8(),
            Value::Text(s) => Operand::Register(s.clone()).is_reg8() && is_register_name(s),
            _ => false,
        },
        Class::Reg16 => match value {
            Value::Operand(op) => op.is_reg16(),
            Value::Text(s) => Operand::Register(s.clone()).is_reg16() && is_register_name(s),
            _ => false,
        },
        Class::Indirect => matches!(value, Value::Operand(op) if op.is_indirect()),
        Class::Label => match value {
            Value::Operand(op) => op.is_symbol(),
            Value::Text(s) => {
                !s.is_empty()
                    && !is_register_name(s)
                    && parse_number(s).is_none()
                    && s.chars().next().is_some_and(|c| {
                        c.is_ascii_alphabetic() || c == '_' || c == '.'
                    })
            }
            _ => false,
        },
    }
}

fn is_int(value: &Value) -> bool {
    match value {
        Value::Int(_) => true,
        Value::Operand(Operand::Immediate(_, text)) => text.parse::<i64>().is_ok(),
        Value::Text(s) => s.parse::<i64>().is_ok(),
        _ => false,
    }
}

fn register_argument(value: &Value) -> Option<String> {
    match value {
        Value::Operand(op) => op.name(),
        Value::Text(s) => {
            let lower = s.to_ascii_lowercase();
            if is_register_name(&lower) || lower == "f" {
                Some(lower)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn op_nargs(arg: &Expr, ctx: &MatchContext<'_>) -> Value {
    let window_line = match arg {
        Expr::Var(n) => match ctx.bindings.mnemonic_line(*n) {
            Some(line) => Some(line),
            None => None,
        },
        _ => match evaluate(arg, ctx) {
            Value::Int(k) if k >= 0 => ctx.window.get(k as usize).copied(),
            _ => None,
        },
    };
    match window_line.and_then(|idx| ctx.lines.get(idx)).and_then(SourceLine::as_instruction) {
        Some(instr) => Value::Int(instr.operands.len() as i64),
        None => Value::Undefined,
    }
}

/// Forward liveness of a register (or `f`, the flags) after the matched
/// window. Conservative: labels, control transfers, opaque lines, and the
/// end of the stream all answer "required".
fn is_required(ctx: &MatchContext<'_>, reg: &str) -> bool {
    if reg == "f" {
        return flags_required(ctx);
    }
    let mut needed = z80::register_mask(reg);
    if needed == 0 {
        return true;
    }
    for line in &ctx.lines[ctx.after..] {
        match line {
            SourceLine::Instruction(instr) => {
                if z80::reads_mask(instr) & needed != 0 {
                    return true;
                }
                if z80::is_control_transfer(instr) {
                    return true;
                }
                needed &= !z80::writes_mask(instr);
                if needed == 0 {
                    return false;
                }
            }
            SourceLine::Label { .. } | SourceLine::Opaque(_) => return true,
            SourceLine::Directive(_) | SourceLine::Comment(_) | SourceLine::Blank(_) => {}
        }
    }
    true
}

fn flags_required(ctx: &MatchContext<'_>) -> bool {
    let mut needed = z80::flags::ALL;
    for line in &ctx.lines[ctx.after..] {
        match line {
            SourceLine::Instruction(instr) => {
                if z80::uses_flags(instr) & needed != 0 {
                    return true;
                }
                if z80::is_control_transfer(instr) {
                    return true;
                }
                needed &= !z80::defines_flags(instr);
                if needed == 0 {
                    return false;
                }
            }
            SourceLine::Label { .. } | SourceLine::Opaque(_) => return true,
            SourceLine::Directive(_) | SourceLine::Comment(_) | SourceLine::Blank(_) => {}
        }
    }
    true
}

/// True when, within the next `horizon` executable instructions, every
/// flag is overwritten before being read. Labels, control transfers, and
/// an exhausted horizon answer false.
fn flags_unused_before(ctx: &MatchContext<'_>, horizon: usize) -> bool {
    let mut needed = z80::flags::ALL;
    let mut seen = 0usize;
    for line in &ctx.lines[ctx.after..] {
        if seen >= horizon {
            break;
        }
        match line {
            SourceLine::Instruction(instr) => {
                if z80::uses_flags(instr) & needed != 0 {
                    return false;
                }
                needed &= !z80::defines_flags(instr);
                if needed == 0 {
                    return true;
                }
                if z80::is_control_transfer(instr) {
                    return false;
                }
                seen += 1;
            }
            SourceLine::Label { .. } | SourceLine::Opaque(_) => return false,
            SourceLine::Directive(_) | SourceLine::Comment(_) | SourceLine::Blank(_) => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::parse_lines;
    use crate::peephole::expr::parse_expr;

    fn eval_with(lines: &[SourceLine], after: usize, bindings: &Bindings, text: &str) -> Value {
        let window: Vec<usize> = Vec::new();
        let ctx = MatchContext {
            bindings,
            lines,
            window: &window,
            after,
        };
        evaluate(&parse_expr(text).expect("expr"), &ctx)
    }

    #[test]
    fn truthiness_define_chain() {
        let lines = parse_lines::<&str>(&[]);
        let mut bindings = Bindings::new();
        bindings.insert(2, Value::Operand(Operand::Condition("nz".to_string())));
        let v = eval_with(&lines, 0, &bindings, "(($2 == nz) && z) || nz");
        assert_eq!(v, Value::Text("z".to_string()));

        bindings.insert(2, Value::Operand(Operand::Condition("z".to_string())));
        let v = eval_with(&lines, 0, &bindings, "(($2 == nz) && z) || nz");
        assert_eq!(v, Value::Text("nz".to_string()));
    }

    #[test]
    fn undefined_variable_is_falsy_not_fatal() {
        let lines = parse_lines::<&str>(&[]);
        let bindings = Bindings::new();
        assert_eq!(
            eval_with(&lines, 0, &bindings, "$9 == or"),
            Value::Bool(false)
        );
        assert_eq!(
            eval_with(&lines, 0, &bindings, "!$9"),
            Value::Bool(true)
        );
        assert_eq!(eval_with(&lines, 0, &bindings, "LOWER($9)"), Value::Undefined);
    }

    #[test]
    fn classification_builtins() {
        let lines = parse_lines::<&str>(&[]);
        let mut bindings = Bindings::new();
        bindings.insert(1, Value::Operand(Operand::Register("HL".to_string())));
        bindings.insert(2, Value::Operand(Operand::Indirect(
            Box::new(Operand::Register("hl".to_string())),
            "(hl)".to_string(),
        )));
        bindings.insert(3, Value::Operand(Operand::Symbol("__LABEL0".to_string())));
        bindings.insert(4, Value::Operand(Operand::Immediate(42, "0x2A".to_string())));

        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REGISTER($1)"), Value::Bool(true));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REG16($1)"), Value::Bool(true));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REG8($1)"), Value::Bool(false));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_INDIR($2)"), Value::Bool(true));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_LABEL($3)"), Value::Bool(true));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_LABEL($1)"), Value::Bool(false));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_NUMERIC($4)"), Value::Bool(true));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_INT($4)"), Value::Bool(false));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_NUMERIC($3)"), Value::Bool(false));
    }

    #[test]
    fn string_builtins() {
        let lines = parse_lines::<&str>(&[]);
        let mut bindings = Bindings::new();
        bindings.insert(1, Value::Text("Nz".to_string()));
        assert_eq!(
            eval_with(&lines, 0, &bindings, "LOWER($1)"),
            Value::Text("nz".to_string())
        );
        assert_eq!(
            eval_with(&lines, 0, &bindings, "UPPER($1)"),
            Value::Text("NZ".to_string())
        );
        assert_eq!(
            eval_with(&lines, 0, &bindings, "CONCAT(LOWER($1), \"!\")"),
            Value::Text("nz!".to_string())
        );
    }

    #[test]
    fn is_required_scans_forward() {
        let lines = parse_lines(&["  ld a, b", "  ld b, 1", "  ret"]);
        let bindings = Bindings::new();
        // After an empty window at index 0: `a` is overwritten at line 0
        // before any read, `b` is read immediately.
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REQUIRED(a)"), Value::Bool(false));
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REQUIRED(b)"), Value::Bool(true));
        // `hl` is never touched before the return, which is conservative.
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REQUIRED(hl)"), Value::Bool(true));
    }

    #[test]
    fn is_required_stops_at_labels() {
        let lines = parse_lines(&["L1:", "  ld a, 1"]);
        let bindings = Bindings::new();
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REQUIRED(a)"), Value::Bool(true));
    }

    #[test]
    fn flags_unused_before_respects_horizon() {
        let lines = parse_lines(&["  ld a, b", "  or a", "  ret"]);
        let bindings = Bindings::new();
        // `or a` overwrites every flag at the second instruction.
        assert_eq!(
            eval_with(&lines, 0, &bindings, "IS_FLAG_UNUSED_BEFORE(2)"),
            Value::Bool(true)
        );
        // Horizon of one instruction is exhausted before the overwrite.
        assert_eq!(
            eval_with(&lines, 0, &bindings, "IS_FLAG_UNUSED_BEFORE(1)"),
            Value::Bool(false)
        );
    }

    #[test]
    fn flags_used_by_branch_are_live() {
        let lines = parse_lines(&["  jp nz, L1"]);
        let bindings = Bindings::new();
        assert_eq!(
            eval_with(&lines, 0, &bindings, "IS_FLAG_UNUSED_BEFORE(4)"),
            Value::Bool(false)
        );
        assert_eq!(eval_with(&lines, 0, &bindings, "IS_REQUIRED(f)"), Value::Bool(true));
    }
}
