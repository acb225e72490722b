// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Operand values and numeric literal parsing.
//!
//! Operands keep their original source spelling for re-emission; equality
//! is defined over normalized content (register case folded, numerics by
//! value, indirect operands compared structurally).

use std::fmt;

/// A parsed instruction operand.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Register or register pair. Original spelling kept; comparisons fold case.
    Register(String),
    /// Condition code (`nz`, `z`, `nc`, `c`, `po`, `pe`, `p`, `m`).
    Condition(String),
    /// Numeric immediate with its original spelling.
    Immediate(i64, String),
    /// Label or symbolic constant reference, spelling preserved.
    Symbol(String),
    /// Indirect operand `(...)` with its original spelling.
    Indirect(Box<Operand>, String),
    /// Indexed operand `(ix+d)` / `(iy-d)`.
    Indexed {
        base: String,
        offset: i64,
        text: String,
    },
}

impl Operand {
    /// The operand's source spelling, used when re-emitting assembly.
    pub fn text(&self) -> String {
        match self {
            Operand::Register(name) | Operand::Condition(name) | Operand::Symbol(name) => {
                name.clone()
            }
            Operand::Immediate(_, text) => text.clone(),
            Operand::Indirect(_, text) => text.clone(),
            Operand::Indexed { text, .. } => text.clone(),
        }
    }

    /// Normalized (lower-case) name for registers and conditions.
    pub fn name(&self) -> Option<String> {
        match self {
            Operand::Register(name) | Operand::Condition(name) => {
                Some(name.to_ascii_lowercase())
            }
            _ => None,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }

    pub fn is_reg8(&self) -> bool {
        matches!(self, Operand::Register(name) if REG8.contains(&name.to_ascii_lowercase().as_str()))
    }

    pub fn is_reg16(&self) -> bool {
        matches!(self, Operand::Register(name) if REG16.contains(&name.to_ascii_lowercase().as_str()))
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, Operand::Indirect(..) | Operand::Indexed { .. })
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, Operand::Condition(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Operand::Symbol(_))
    }

    pub fn numeric_value(&self) -> Option<i64> {
        match self {
            Operand::Immediate(value, _) => Some(*value),
            _ => None,
        }
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Register(a), Operand::Register(b)) => a.eq_ignore_ascii_case(b),
            (Operand::Condition(a), Operand::Condition(b)) => a.eq_ignore_ascii_case(b),
            (Operand::Immediate(a, _), Operand::Immediate(b, _)) => a == b,
            (Operand::Symbol(a), Operand::Symbol(b)) => a == b,
            (Operand::Indirect(a, _), Operand::Indirect(b, _)) => a == b,
            (
                Operand::Indexed {
                    base: ab,
                    offset: ao,
                    ..
                },
                Operand::Indexed {
                    base: bb,
                    offset: bo,
                    ..
                },
            ) => ab == bb && ao == bo,
            _ => false,
        }
    }
}

impl Eq for Operand {}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

const REG8: &[&str] = &[
    "a", "b", "c", "d", "e", "h", "l", "i", "r", "ixh", "ixl", "iyh", "iyl",
];
const REG16: &[&str] = &["af", "af'", "bc", "de", "hl", "sp", "ix", "iy"];
const CONDITIONS: &[&str] = &["nz", "z", "nc", "c", "po", "pe", "p", "m"];

pub fn is_register_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    REG8.contains(&lower.as_str()) || REG16.contains(&lower.as_str()) || lower == "f"
}

pub fn is_condition_name(name: &str) -> bool {
    CONDITIONS.contains(&name.to_ascii_lowercase().as_str())
}

pub fn is_index_register(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "ix" || lower == "iy"
}

/// Parse a numeric literal.
///
/// Accepted forms: decimal, `0x2A` / `$2A` / `2Ah` hex, `0b101` / `%101` /
/// `101b` binary, `52o` / `52q` octal. `_` separators are ignored and a
/// leading `-` negates.
pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (is_neg, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let text: String = text.chars().filter(|&c| c != '_').collect();
    let text = text.as_str();
    if text.is_empty() {
        return None;
    }

    // Prefix notations first, so suffix heuristics never misread a prefixed
    // literal such as $BB or %0101.
    let val = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(hex) = text.strip_prefix('$') {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = text.strip_prefix('%') {
        i64::from_str_radix(bin, 2).ok()?
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        // Only binary when the payload is all 0/1, so 0B8H still parses as
        // a hex literal through the suffix path below.
        if !bin.is_empty() && bin.bytes().all(|b| b == b'0' || b == b'1') {
            i64::from_str_radix(bin, 2).ok()?
        } else {
            return suffix_number(text, is_neg);
        }
    } else {
        return suffix_number(text, is_neg);
    };

    Some(if is_neg { -val } else { val })
}

fn suffix_number(text: &str, is_neg: bool) -> Option<i64> {
    let val = if let Some(hex) = text.strip_suffix('h').or_else(|| text.strip_suffix('H')) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(body) = text.strip_suffix('b').or_else(|| text.strip_suffix('B')) {
        // All-0/1 payloads are binary; anything else is a hex literal whose
        // last digit happens to be B, which requires an H suffix.
        if !body.is_empty() && body.bytes().all(|b| b == b'0' || b == b'1') {
            i64::from_str_radix(body, 2).ok()?
        } else {
            return None;
        }
    } else if let Some(oct) = text
        .strip_suffix('o')
        .or_else(|| text.strip_suffix('O'))
        .or_else(|| text.strip_suffix('q'))
        .or_else(|| text.strip_suffix('Q'))
    {
        i64::from_str_radix(oct, 8).ok()?
    } else {
        text.parse::<i64>().ok()?
    };

    Some(if is_neg { -val } else { val })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_number_decimal() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0"), Some(0));
        assert_eq!(parse_number("-10"), Some(-10));
    }

    #[test]
    fn parse_number_hex() {
        assert_eq!(parse_number("0x2A"), Some(42));
        assert_eq!(parse_number("0X2a"), Some(42));
        assert_eq!(parse_number("$2A"), Some(42));
        assert_eq!(parse_number("2Ah"), Some(42));
        assert_eq!(parse_number("0B8H"), Some(0x0B8));
    }

    #[test]
    fn parse_number_dollar_hex_ending_in_b() {
        // $BB must take the hex-prefix path, not the binary-suffix path.
        assert_eq!(parse_number("$BB"), Some(0xBB));
        assert_eq!(parse_number("$0B"), Some(0x0B));
    }

    #[test]
    fn parse_number_binary() {
        assert_eq!(parse_number("0b101010"), Some(42));
        assert_eq!(parse_number("%101010"), Some(42));
        assert_eq!(parse_number("101010b"), Some(42));
    }

    #[test]
    fn parse_number_octal() {
        assert_eq!(parse_number("52o"), Some(42));
        assert_eq!(parse_number("52Q"), Some(42));
    }

    #[test]
    fn parse_number_rejects_garbage() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("12FG"), None);
        assert_eq!(parse_number("0b2"), None);
    }

    #[test]
    fn operand_equality_ignores_spelling() {
        let a = Operand::Immediate(18, "0x12".to_string());
        let b = Operand::Immediate(18, "18".to_string());
        assert_eq!(a, b);

        let ind_a = Operand::Indirect(
            Box::new(Operand::Register("hl".to_string())),
            "(hl)".to_string(),
        );
        let ind_b = Operand::Indirect(
            Box::new(Operand::Register("hl".to_string())),
            "( hl )".to_string(),
        );
        assert_eq!(ind_a, ind_b);
    }

    #[test]
    fn register_equality_folds_case() {
        assert_eq!(
            Operand::Register("HL".to_string()),
            Operand::Register("hl".to_string())
        );
        assert_eq!(
            Operand::Register("HL".to_string()).name().as_deref(),
            Some("hl")
        );
    }

    #[test]
    fn register_class_queries() {
        assert!(Operand::Register("A".to_string()).is_reg8());
        assert!(Operand::Register("hl".to_string()).is_reg16());
        assert!(!Operand::Register("hl".to_string()).is_reg8());
        assert!(Operand::Indexed {
            base: "ix".to_string(),
            offset: 5,
            text: "(ix+5)".to_string()
        }
        .is_indirect());
    }

    proptest! {
        #[test]
        fn parse_number_decimal_round_trip_u32(value in any::<u32>()) {
            let text = value.to_string();
            prop_assert_eq!(parse_number(&text), Some(value as i64));
        }

        #[test]
        fn parse_number_hex_round_trip_u32(value in any::<u32>()) {
            let text = format!("0x{:X}", value);
            prop_assert_eq!(parse_number(&text), Some(value as i64));
        }

        #[test]
        fn parse_number_binary_round_trip_u16(value in any::<u16>()) {
            let text = format!("0b{:b}", value);
            prop_assert_eq!(parse_number(&text), Some(value as i64));
        }
    }
}
