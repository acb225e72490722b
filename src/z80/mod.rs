// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Z80 semantic oracle.
//!
//! Pure functions answering questions about a single parsed instruction:
//! which flags it defines or reads, which registers it touches, and how it
//! transfers control. The evaluator's builtins are the only consumers.
//!
//! Answers are conservative: an unrecognized mnemonic reads and writes
//! everything and defines no flags.

pub mod table;

use crate::asm::operand::Operand;
use crate::asm::Instruction;

/// Condition flag bits (S, Z, H, P/V, N, C).
pub mod flags {
    pub const S: u8 = 0x01;
    pub const Z: u8 = 0x02;
    pub const H: u8 = 0x04;
    pub const PV: u8 = 0x08;
    pub const N: u8 = 0x10;
    pub const C: u8 = 0x20;
    pub const ALL: u8 = 0x3F;
}

// One bit per 8-bit register cell; pairs are unions of their halves.
const R_A: u32 = 1 << 0;
const R_F: u32 = 1 << 1;
const R_B: u32 = 1 << 2;
const R_C: u32 = 1 << 3;
const R_D: u32 = 1 << 4;
const R_E: u32 = 1 << 5;
const R_H: u32 = 1 << 6;
const R_L: u32 = 1 << 7;
const R_IXH: u32 = 1 << 8;
const R_IXL: u32 = 1 << 9;
const R_IYH: u32 = 1 << 10;
const R_IYL: u32 = 1 << 11;
const R_I: u32 = 1 << 12;
const R_R: u32 = 1 << 13;
const R_SP: u32 = 1 << 14;
// Shadow banks, modeled as single cells.
const R_AF_ALT: u32 = 1 << 15;
const R_EXX_ALT: u32 = 1 << 16;

const ALL_REGS: u32 = (1 << 17) - 1;

/// Bit mask of the register cells named by `name` (case-insensitive).
/// Pairs cover both halves, so `hl` overlaps `h` and `l`.
pub fn register_mask(name: &str) -> u32 {
    match name.to_ascii_lowercase().as_str() {
        "a" => R_A,
        "f" => R_F,
        "b" => R_B,
        "c" => R_C,
        "d" => R_D,
        "e" => R_E,
        "h" => R_H,
        "l" => R_L,
        "ixh" => R_IXH,
        "ixl" => R_IXL,
        "iyh" => R_IYH,
        "iyl" => R_IYL,
        "i" => R_I,
        "r" => R_R,
        "sp" => R_SP,
        "af" => R_A | R_F,
        "af'" => R_AF_ALT,
        "bc" => R_B | R_C,
        "de" => R_D | R_E,
        "hl" => R_H | R_L,
        "ix" => R_IXH | R_IXL,
        "iy" => R_IYH | R_IYL,
        _ => 0,
    }
}

/// Normalized mnemonic.
pub fn opcode(instr: &Instruction) -> &str {
    &instr.mnemonic
}

/// Ordered operand list.
pub fn operands(instr: &Instruction) -> &[Operand] {
    &instr.operands
}

/// The set of flags whose value after execution is written by the
/// instruction.
pub fn defines_flags(instr: &Instruction) -> u8 {
    use flags::*;
    let ops = &instr.operands;
    match instr.mnemonic.as_str() {
        "add" => {
            if ops.first().is_some_and(Operand::is_reg16) {
                H | N | C
            } else {
                ALL
            }
        }
        "inc" | "dec" => {
            if ops.first().is_some_and(Operand::is_reg16) {
                0
            } else {
                S | Z | H | PV | N
            }
        }
        "ld" => {
            let from_ir = matches!(
                ops.get(1),
                Some(Operand::Register(name)) if {
                    let lower = name.to_ascii_lowercase();
                    lower == "i" || lower == "r"
                }
            );
            let to_a = matches!(ops.first(), Some(op) if op.name().as_deref() == Some("a"));
            if to_a && from_ir {
                S | Z | H | PV | N
            } else {
                0
            }
        }
        "pop" => {
            if ops.first().and_then(Operand::name).as_deref() == Some("af") {
                ALL
            } else {
                0
            }
        }
        "ex" => {
            if ops.first().and_then(Operand::name).as_deref() == Some("af") {
                ALL
            } else {
                0
            }
        }
        "in" => {
            // `in r,(c)` sets flags; `in a,(n)` does not.
            match ops.get(1) {
                Some(Operand::Indirect(inner, _)) if inner.name().as_deref() == Some("c") => {
                    S | Z | H | PV | N
                }
                _ => 0,
            }
        }
        other => table::lookup_defines(other).unwrap_or(0),
    }
}

/// The set of flags the instruction reads.
pub fn uses_flags(instr: &Instruction) -> u8 {
    if !table::is_known(&instr.mnemonic) {
        return flags::ALL;
    }
    let mut used = table::lookup_uses(&instr.mnemonic);
    if let Some(cond) = condition_of(instr) {
        used |= condition_flag(&cond);
    }
    match instr.mnemonic.as_str() {
        "push" | "ex" => {
            if instr.operands.first().and_then(Operand::name).as_deref() == Some("af") {
                used |= flags::ALL;
            }
        }
        _ => {}
    }
    used
}

/// Whether the instruction reads register `r` (or any overlapping cell).
pub fn uses_register(instr: &Instruction, r: &str) -> bool {
    reads_mask(instr) & register_mask(r) != 0
}

/// Whether the instruction writes register `r` (or any overlapping cell).
pub fn changes_register(instr: &Instruction, r: &str) -> bool {
    writes_mask(instr) & register_mask(r) != 0
}

/// Whether the instruction writes every cell of `r` without reading any.
pub fn overwrites_register(instr: &Instruction, r: &str) -> bool {
    let mask = register_mask(r);
    mask != 0 && writes_mask(instr) & mask == mask && reads_mask(instr) & mask == 0
}

pub fn is_unconditional_jump(instr: &Instruction) -> bool {
    matches!(instr.mnemonic.as_str(), "jp" | "jr") && condition_of(instr).is_none()
}

pub fn is_conditional_jump(instr: &Instruction) -> bool {
    match instr.mnemonic.as_str() {
        "jp" | "jr" => condition_of(instr).is_some(),
        "djnz" => true,
        _ => false,
    }
}

pub fn is_call(instr: &Instruction) -> bool {
    matches!(instr.mnemonic.as_str(), "call" | "rst")
}

pub fn is_return(instr: &Instruction) -> bool {
    matches!(instr.mnemonic.as_str(), "ret" | "reti" | "retn")
}

/// Any instruction that may transfer control away from the fallthrough
/// path. Liveness scans stop here.
pub fn is_control_transfer(instr: &Instruction) -> bool {
    is_unconditional_jump(instr)
        || is_conditional_jump(instr)
        || is_call(instr)
        || is_return(instr)
}

/// Condition code of a conditional branch, lower-cased.
pub fn condition_of(instr: &Instruction) -> Option<String> {
    match instr.operands.first() {
        Some(Operand::Condition(name)) => Some(name.to_ascii_lowercase()),
        _ => None,
    }
}

/// Flag bit tested by a condition code.
pub fn condition_flag(cond: &str) -> u8 {
    match cond {
        "nz" | "z" => flags::Z,
        "nc" | "c" => flags::C,
        "po" | "pe" => flags::PV,
        "p" | "m" => flags::S,
        _ => 0,
    }
}

fn operand_read_mask(op: &Operand) -> u32 {
    match op {
        Operand::Register(name) => register_mask(name),
        Operand::Indirect(inner, _) => operand_read_mask(inner),
        Operand::Indexed { base, .. } => register_mask(base),
        _ => 0,
    }
}

fn operand_write_mask(op: &Operand) -> u32 {
    match op {
        Operand::Register(name) => register_mask(name),
        // A memory destination writes no register; its pointer is a read.
        _ => 0,
    }
}

fn operand_addr_mask(op: &Operand) -> u32 {
    match op {
        Operand::Indirect(inner, _) => operand_read_mask(inner),
        Operand::Indexed { base, .. } => register_mask(base),
        _ => 0,
    }
}

/// Mask of register cells the instruction reads.
pub fn reads_mask(instr: &Instruction) -> u32 {
    register_effects(instr).0
}

/// Mask of register cells the instruction writes.
pub fn writes_mask(instr: &Instruction) -> u32 {
    register_effects(instr).1
}

fn register_effects(instr: &Instruction) -> (u32, u32) {
    let ops = &instr.operands;
    let op0 = ops.first();
    let op1 = ops.get(1);

    match instr.mnemonic.as_str() {
        "ld" => {
            let dst = op0.map(operand_write_mask).unwrap_or(0);
            let reads = op0.map(operand_addr_mask).unwrap_or(0)
                | op1.map(operand_read_mask).unwrap_or(0);
            (reads, dst)
        }
        "push" => (op0.map(operand_read_mask).unwrap_or(0) | R_SP, R_SP),
        "pop" => (R_SP, op0.map(operand_write_mask).unwrap_or(0) | R_SP),
        "add" | "adc" | "sub" | "sbc" | "and" | "or" | "xor" | "cp" => {
            let (dst, src) = if ops.len() >= 2 {
                (op0, op1)
            } else {
                (None, op0)
            };
            let dst_mask = dst.map(operand_read_mask).unwrap_or(R_A);
            let reads = dst_mask
                | src.map(operand_read_mask).unwrap_or(0)
                | src.map(operand_addr_mask).unwrap_or(0);
            let writes = if instr.mnemonic == "cp" {
                0
            } else {
                dst.map(operand_write_mask).unwrap_or(R_A)
            };
            (reads, writes)
        }
        "inc" | "dec" => {
            let reads = op0.map(operand_read_mask).unwrap_or(0);
            let writes = op0.map(operand_write_mask).unwrap_or(0);
            (reads, writes)
        }
        "ex" => match (
            op0.and_then(Operand::name).as_deref(),
            op1.and_then(Operand::name).as_deref(),
        ) {
            (Some("de"), Some("hl")) => {
                let both = register_mask("de") | register_mask("hl");
                (both, both)
            }
            (Some("af"), _) => {
                let both = register_mask("af") | R_AF_ALT;
                (both, both)
            }
            _ => {
                // ex (sp),hl / ex (sp),ix / ex (sp),iy
                let target = op1.map(operand_read_mask).unwrap_or(0);
                (R_SP | target, target)
            }
        },
        "exx" => {
            let banked = register_mask("bc") | register_mask("de") | register_mask("hl");
            (banked | R_EXX_ALT, banked | R_EXX_ALT)
        }
        "ldi" | "ldd" | "ldir" | "lddr" => {
            let all = register_mask("hl") | register_mask("de") | register_mask("bc");
            (all, all)
        }
        "cpi" | "cpir" | "cpd" | "cpdr" => {
            let counters = register_mask("hl") | register_mask("bc");
            (R_A | counters, counters)
        }
        "jp" | "jr" => (op_target_mask(ops), 0),
        "djnz" => (R_B, R_B),
        "call" | "rst" => (R_SP, R_SP),
        "ret" | "reti" | "retn" => (R_SP, R_SP),
        "in" => match op1 {
            Some(Operand::Indirect(inner, _)) if inner.name().as_deref() == Some("c") => {
                (register_mask("bc"), op0.map(operand_write_mask).unwrap_or(0))
            }
            _ => (0, op0.map(operand_write_mask).unwrap_or(0)),
        },
        "out" => match op0 {
            Some(Operand::Indirect(inner, _)) if inner.name().as_deref() == Some("c") => {
                (register_mask("bc") | op1.map(operand_read_mask).unwrap_or(0), 0)
            }
            _ => (op1.map(operand_read_mask).unwrap_or(0), 0),
        },
        "ini" | "ind" | "outi" | "outd" | "inir" | "indr" | "otir" | "otdr" => {
            let used = register_mask("hl") | register_mask("bc");
            (used, register_mask("hl") | R_B)
        }
        "rlca" | "rla" | "rrca" | "rra" | "daa" | "cpl" | "neg" => (R_A, R_A),
        "rlc" | "rl" | "rrc" | "rr" | "sla" | "sra" | "sll" | "srl" => {
            let reads = op0.map(operand_read_mask).unwrap_or(0);
            (reads, op0.map(operand_write_mask).unwrap_or(0))
        }
        "rld" | "rrd" => (R_A | register_mask("hl"), R_A),
        "bit" => (op1.map(operand_read_mask).unwrap_or(0), 0),
        "set" | "res" => {
            let reads = op1.map(operand_read_mask).unwrap_or(0);
            (reads, op1.map(operand_write_mask).unwrap_or(0))
        }
        "nop" | "halt" | "di" | "ei" | "im" | "scf" | "ccf" => (0, 0),
        _ => (ALL_REGS, ALL_REGS),
    }
}

fn op_target_mask(ops: &[Operand]) -> u32 {
    // jp (hl) / jp (ix) / jp (iy) read the pointer register.
    ops.iter().map(operand_addr_mask).fold(0, |acc, m| acc | m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::parse_instruction_text;

    fn i(text: &str) -> Instruction {
        parse_instruction_text(text).expect("instruction")
    }

    #[test]
    fn flag_definitions_match_hardware() {
        use flags::*;
        assert_eq!(defines_flags(&i("sub 5")), ALL);
        assert_eq!(defines_flags(&i("ld a, b")), 0);
        assert_eq!(defines_flags(&i("inc a")), S | Z | H | PV | N);
        assert_eq!(defines_flags(&i("inc hl")), 0);
        assert_eq!(defines_flags(&i("or a")), ALL);
        assert_eq!(defines_flags(&i("add hl, de")), H | N | C);
        assert_eq!(defines_flags(&i("add a, b")), ALL);
        assert_eq!(defines_flags(&i("ld a, i")), S | Z | H | PV | N);
        assert_eq!(defines_flags(&i("pop af")), ALL);
        assert_eq!(defines_flags(&i("pop bc")), 0);
    }

    #[test]
    fn flag_uses_cover_conditions_and_carry_chains() {
        assert_eq!(uses_flags(&i("jp nz, L")), flags::Z);
        assert_eq!(uses_flags(&i("jp nc, L")), flags::C);
        assert_eq!(uses_flags(&i("ret po")), flags::PV);
        assert_eq!(uses_flags(&i("adc a, b")), flags::C);
        assert_eq!(uses_flags(&i("push af")), flags::ALL);
        assert_eq!(uses_flags(&i("ld a, b")), 0);
    }

    #[test]
    fn register_overlap_between_pairs_and_halves() {
        assert!(changes_register(&i("ld hl, 0"), "h"));
        assert!(changes_register(&i("ld hl, 0"), "l"));
        assert!(changes_register(&i("ld h, 0"), "hl"));
        assert!(!changes_register(&i("ld hl, 0"), "a"));
        assert!(uses_register(&i("ld a, (hl)"), "hl"));
        assert!(!changes_register(&i("ld a, (hl)"), "hl"));
        assert!(changes_register(&i("pop bc"), "sp"));
    }

    #[test]
    fn arithmetic_reads_accumulator() {
        assert!(uses_register(&i("sub b"), "a"));
        assert!(uses_register(&i("sub b"), "b"));
        assert!(changes_register(&i("sub b"), "a"));
        assert!(!changes_register(&i("cp b"), "a"));
        assert!(uses_register(&i("add hl, de"), "de"));
        assert!(changes_register(&i("add hl, de"), "hl"));
    }

    #[test]
    fn overwrite_requires_full_cover_without_read() {
        assert!(overwrites_register(&i("ld hl, 0"), "hl"));
        assert!(overwrites_register(&i("ld h, 0"), "h"));
        assert!(!overwrites_register(&i("ld h, 0"), "hl"));
        assert!(!overwrites_register(&i("inc a"), "a"));
        assert!(overwrites_register(&i("pop bc"), "bc"));
    }

    #[test]
    fn control_flow_classification() {
        assert!(is_unconditional_jump(&i("jp __MAIN")));
        assert!(is_unconditional_jump(&i("jp (hl)")));
        assert!(is_conditional_jump(&i("jp nz, L")));
        assert!(is_conditional_jump(&i("jr c, L")));
        assert!(is_conditional_jump(&i("djnz L")));
        assert!(is_call(&i("call __EQ16")));
        assert!(is_call(&i("rst 8")));
        assert!(is_return(&i("ret")));
        assert!(is_return(&i("ret z")));
        assert!(!is_control_transfer(&i("ld a, b")));
    }

    #[test]
    fn condition_extraction() {
        assert_eq!(condition_of(&i("jp nz, L")).as_deref(), Some("nz"));
        assert_eq!(condition_of(&i("ret m")).as_deref(), Some("m"));
        assert_eq!(condition_of(&i("jp L")), None);
        assert_eq!(condition_of(&i("call pe, L")).as_deref(), Some("pe"));
    }

    #[test]
    fn unknown_mnemonic_is_conservative() {
        let weird = i("frob a, b");
        assert_eq!(defines_flags(&weird), 0);
        assert_eq!(uses_flags(&weird), flags::ALL);
        assert!(uses_register(&weird, "hl"));
        assert!(changes_register(&weird, "hl"));
    }
}
