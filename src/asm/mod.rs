// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembly line model.
//!
//! Input lines are tokenized once on entry into [`SourceLine`] values. Only
//! instruction lines participate in pattern matching; labels act as window
//! barriers and everything else passes through verbatim.

pub mod operand;
pub mod scanner;

use operand::{is_condition_name, is_index_register, is_register_name, Operand};
use scanner::{ScanMode, Scanner, TokenType};

/// A parsed assembly instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Mnemonic folded to lower case.
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    /// Original source text, emitted verbatim when the line is unmatched.
    pub text: String,
}

/// One classified line of the input stream.
#[derive(Debug, Clone)]
pub enum SourceLine {
    Instruction(Instruction),
    /// Label definition. Any trailing content stays on the line verbatim;
    /// such lines are never rewritten and always split match windows.
    Label { name: String, text: String },
    Directive(String),
    Comment(String),
    Blank(String),
    /// Unparsable line, passed through untouched.
    Opaque(String),
}

impl SourceLine {
    pub fn text(&self) -> &str {
        match self {
            SourceLine::Instruction(instr) => &instr.text,
            SourceLine::Label { text, .. } => text,
            SourceLine::Directive(text)
            | SourceLine::Comment(text)
            | SourceLine::Blank(text)
            | SourceLine::Opaque(text) => text,
        }
    }

    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            SourceLine::Instruction(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, SourceLine::Label { .. })
    }

    pub fn is_directive(&self) -> bool {
        matches!(self, SourceLine::Directive(_))
    }
}

const DIRECTIVES: &[&str] = &[
    "ORG", "DEFB", "DEFW", "DEFM", "DEFS", "EQU", "PROC", "LOCAL", "END", "ENDP",
];

/// Classify and parse one raw source line.
pub fn parse_line(line: &str) -> SourceLine {
    let text = line.trim_end_matches(['\r', '\n']).to_string();
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return SourceLine::Blank(text);
    }
    if trimmed.starts_with(';') {
        return SourceLine::Comment(text);
    }
    if trimmed.starts_with('#') {
        // Preprocessor metadata such as #line markers.
        return SourceLine::Directive(text);
    }

    if let Some(name) = label_name(trimmed) {
        return SourceLine::Label { name, text };
    }
    if is_directive_line(trimmed) {
        return SourceLine::Directive(text);
    }

    match parse_instruction_text(&text) {
        Ok(instr) => SourceLine::Instruction(instr),
        Err(_) => SourceLine::Opaque(text),
    }
}

/// Parse a whole line buffer.
pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Vec<SourceLine> {
    lines.iter().map(|line| parse_line(line.as_ref())).collect()
}

/// Parse a line that must be an instruction, as when instantiating a
/// replacement template.
pub fn parse_instruction_text(text: &str) -> Result<Instruction, String> {
    let mut scanner = Scanner::new(text, ScanMode::Asm);
    if scanner.next_token() != TokenType::Identifier {
        return Err(format!("expected a mnemonic: {}", text.trim()));
    }
    let mnemonic = scanner.get_string().to_ascii_lowercase();
    let operands = parse_operand_list(&mut scanner, &mnemonic)?;
    Ok(Instruction {
        mnemonic,
        operands,
        text: text.to_string(),
    })
}

fn label_name(trimmed: &str) -> Option<String> {
    let colon = trimmed.find(':')?;
    let head = &trimmed[..colon];
    if head.is_empty() {
        return None;
    }
    let mut chars = head.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_' || first == '.') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return None;
    }
    Some(head.to_string())
}

fn is_directive_line(trimmed: &str) -> bool {
    let mut words = trimmed.split_whitespace();
    let first = words.next().unwrap_or("").to_ascii_uppercase();
    if DIRECTIVES.contains(&first.as_str()) {
        return true;
    }
    // `NAME EQU expr` puts the directive in second position.
    let second = words.next().unwrap_or("").to_ascii_uppercase();
    second == "EQU"
}

/// Parse a comma-separated operand list. Condition codes are recognized
/// contextually: the first operand of `jp`/`jr`/`call` (when another operand
/// follows) and the sole operand of `ret`.
pub(crate) fn parse_operand_list(
    scanner: &mut Scanner,
    mnemonic: &str,
) -> Result<Vec<Operand>, String> {
    let mut operands = Vec::new();
    let mut t = scanner.next_token();
    if t == TokenType::Eof {
        return Ok(operands);
    }

    loop {
        let op = parse_one_operand(scanner, t)?;
        operands.push(op);
        match scanner.next_token() {
            TokenType::Comma => t = scanner.next_token(),
            TokenType::Eof => break,
            TokenType::Error => return Err(scanner.get_error_msg().to_string()),
            other => return Err(format!("unexpected token after operand: {other:?}")),
        }
    }

    apply_condition_context(mnemonic, &mut operands);
    Ok(operands)
}

pub(crate) fn parse_one_operand(scanner: &mut Scanner, t: TokenType) -> Result<Operand, String> {
    match t {
        TokenType::Identifier => {
            let name = scanner.get_string().to_string();
            if is_register_name(&name) {
                Ok(Operand::Register(name))
            } else {
                Ok(Operand::Symbol(name))
            }
        }
        TokenType::Constant => Ok(Operand::Immediate(
            scanner.get_value(),
            scanner.get_string().to_string(),
        )),
        TokenType::Minus => match scanner.next_token() {
            TokenType::Constant => Ok(Operand::Immediate(
                -scanner.get_value(),
                format!("-{}", scanner.get_string()),
            )),
            _ => Err("expected a constant after unary minus".to_string()),
        },
        TokenType::Plus => match scanner.next_token() {
            TokenType::Constant => Ok(Operand::Immediate(
                scanner.get_value(),
                scanner.get_string().to_string(),
            )),
            _ => Err("expected a constant after unary plus".to_string()),
        },
        TokenType::OpenParen => parse_indirect(scanner),
        TokenType::Error => Err(scanner.get_error_msg().to_string()),
        other => Err(format!("unexpected operand token: {other:?}")),
    }
}

fn parse_indirect(scanner: &mut Scanner) -> Result<Operand, String> {
    let t = scanner.next_token();

    // Indexed addressing: (ix+d) / (iy-d), implicit zero displacement allowed.
    if t == TokenType::Identifier && is_index_register(scanner.get_string()) {
        let base = scanner.get_string().to_string();
        return match scanner.next_token() {
            TokenType::CloseParen => Ok(Operand::Indexed {
                offset: 0,
                text: format!("({base})"),
                base,
            }),
            sign @ (TokenType::Plus | TokenType::Minus) => {
                if scanner.next_token() != TokenType::Constant {
                    return Err("expected a displacement constant".to_string());
                }
                let magnitude = scanner.get_value();
                let spelled = scanner.get_string().to_string();
                if scanner.next_token() != TokenType::CloseParen {
                    return Err("unterminated indexed operand".to_string());
                }
                let (offset, sign_ch) = if sign == TokenType::Minus {
                    (-magnitude, '-')
                } else {
                    (magnitude, '+')
                };
                Ok(Operand::Indexed {
                    text: format!("({base}{sign_ch}{spelled})"),
                    base,
                    offset,
                })
            }
            _ => Err("malformed indexed operand".to_string()),
        };
    }

    let inner = parse_one_operand(scanner, t)?;
    match scanner.next_token() {
        TokenType::CloseParen => {
            let text = format!("({})", inner.text());
            Ok(Operand::Indirect(Box::new(inner), text))
        }
        // An address expression such as (label+1): keep it as an opaque
        // symbolic inner operand, compared textually.
        TokenType::Plus | TokenType::Minus => {
            let mut expr = inner.text();
            expr.push_str(scanner.get_string());
            loop {
                match scanner.next_token() {
                    TokenType::CloseParen => break,
                    TokenType::Eof | TokenType::Error => {
                        return Err("unterminated indirect operand".to_string())
                    }
                    _ => expr.push_str(scanner.get_string()),
                }
            }
            let text = format!("({expr})");
            Ok(Operand::Indirect(Box::new(Operand::Symbol(expr)), text))
        }
        _ => Err("unterminated indirect operand".to_string()),
    }
}

fn apply_condition_context(mnemonic: &str, operands: &mut [Operand]) {
    let convert_first = match mnemonic {
        "jp" | "jr" | "call" => operands.len() >= 2,
        "ret" => operands.len() == 1,
        _ => false,
    };
    if !convert_first {
        return;
    }
    let name = match &operands[0] {
        Operand::Register(name) | Operand::Symbol(name) => name.clone(),
        _ => return,
    };
    if is_condition_name(&name) {
        operands[0] = Operand::Condition(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(text: &str) -> Instruction {
        match parse_line(text) {
            SourceLine::Instruction(instr) => instr,
            other => panic!("expected instruction for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn classifies_blank_comment_label_directive() {
        assert!(matches!(parse_line("   "), SourceLine::Blank(_)));
        assert!(matches!(parse_line("; hi"), SourceLine::Comment(_)));
        assert!(matches!(parse_line("#line 12"), SourceLine::Directive(_)));
        assert!(matches!(parse_line("  DEFB 1, 2"), SourceLine::Directive(_)));
        assert!(matches!(parse_line("TOTAL EQU 42"), SourceLine::Directive(_)));
        match parse_line("__LABEL0:") {
            SourceLine::Label { name, .. } => assert_eq!(name, "__LABEL0"),
            other => panic!("expected label, got {other:?}"),
        }
    }

    #[test]
    fn label_with_trailing_content_is_still_a_label_barrier() {
        match parse_line("L1: ld a, 1") {
            SourceLine::Label { name, text } => {
                assert_eq!(name, "L1");
                assert_eq!(text, "L1: ld a, 1");
            }
            other => panic!("expected label, got {other:?}"),
        }
    }

    #[test]
    fn parses_two_operand_instruction() {
        let i = instr("  ld a, 5");
        assert_eq!(i.mnemonic, "ld");
        assert_eq!(i.operands.len(), 2);
        assert_eq!(i.operands[0], Operand::Register("a".to_string()));
        assert_eq!(i.operands[1].numeric_value(), Some(5));
    }

    #[test]
    fn condition_context_only_for_branches() {
        let jp = instr("  jp nc, __LABEL1");
        assert!(jp.operands[0].is_condition());
        assert!(jp.operands[1].is_symbol());

        let ld = instr("  ld c, 1");
        assert!(ld.operands[0].is_register());

        let ret = instr("  ret z");
        assert!(ret.operands[0].is_condition());

        let jp_plain = instr("  jp __LABEL1");
        assert!(jp_plain.operands[0].is_symbol());
    }

    #[test]
    fn parses_indirect_and_indexed() {
        let i = instr("  ld a, (hl)");
        assert!(i.operands[1].is_indirect());
        assert_eq!(i.operands[1], instr("ld a, ( HL )").operands[1]);

        let ix = instr("  ld b, (ix + 5)");
        match &ix.operands[1] {
            Operand::Indexed { base, offset, .. } => {
                assert_eq!(base, "ix");
                assert_eq!(*offset, 5);
            }
            other => panic!("expected indexed operand, got {other:?}"),
        }

        let mem = instr("  ld hl, (0x8000)");
        match &mem.operands[1] {
            Operand::Indirect(inner, _) => assert_eq!(inner.numeric_value(), Some(0x8000)),
            other => panic!("expected indirect operand, got {other:?}"),
        }
    }

    #[test]
    fn numeric_operands_compare_by_value() {
        let hex = instr("  cp 0x12");
        let dec = instr("  cp 18");
        assert_eq!(hex.operands[0], dec.operands[0]);
        assert_eq!(hex.operands[0].text(), "0x12");
    }

    #[test]
    fn unparsable_line_is_opaque() {
        assert!(matches!(parse_line("  ??? what"), SourceLine::Opaque(_)));
    }

    #[test]
    fn instruction_keeps_original_text() {
        let i = instr("   LD   A, (IX+2)  ; pick up arg");
        assert_eq!(i.mnemonic, "ld");
        assert_eq!(i.text, "   LD   A, (IX+2)  ; pick up arg");
    }
}
