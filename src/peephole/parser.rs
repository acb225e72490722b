// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Rule file reader.
//!
//! A rule file is a sequence of sections: `OLEVEL: n`, `OFLAG: n`, and the
//! brace blocks `REPLACE {{ .. }}`, `DEFINE {{ .. }}`, `IF {{ .. }}`,
//! `WITH {{ .. }}`. Line comments start with `;;`. Everything is
//! validated at load time; a rule that parses is frozen and can no longer
//! fail structurally during matching.

use std::collections::BTreeSet;

use crate::peephole::expr::{parse_expr, validate_expr, Expr};
use crate::peephole::pattern::BlockPattern;
use crate::peephole::template::BlockTemplate;

/// A parsed, validated optimization rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Minimum optimization level at which the rule is active.
    pub level: u32,
    /// Unique rule identifier.
    pub flag: u32,
    pub pattern: BlockPattern,
    /// `DEFINE` assignments in declaration order.
    pub defines: Vec<(u32, Expr)>,
    /// `IF` predicate; absent means always true.
    pub predicate: Option<Expr>,
    pub template: BlockTemplate,
    /// Originating file name, for diagnostics.
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct RuleParseError {
    pub line: u32,
    pub message: String,
}

impl RuleParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: line as u32,
            message: message.into(),
        }
    }
}

struct Section {
    header_line: usize,
    lines: Vec<String>,
}

pub fn parse_rule_str(text: &str, source: &str) -> Result<Rule, RuleParseError> {
    let mut level: Option<u32> = None;
    let mut flag: Option<u32> = None;
    let mut replace: Option<Section> = None;
    let mut define: Option<Section> = None;
    let mut cond: Option<Section> = None;
    let mut with: Option<Section> = None;

    let raw: Vec<&str> = text.lines().collect();
    let mut idx = 0usize;
    while idx < raw.len() {
        let line_no = idx + 1;
        let line = strip_comment(raw[idx]);
        let trimmed = line.trim();
        idx += 1;
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("OLEVEL:") {
            set_scalar(&mut level, rest, "OLEVEL", line_no)?;
        } else if let Some(rest) = trimmed.strip_prefix("OFLAG:") {
            set_scalar(&mut flag, rest, "OFLAG", line_no)?;
        } else if let Some(rest) = block_header(trimmed, "REPLACE") {
            set_block(&mut replace, read_block(&raw, &mut idx, rest, line_no)?, "REPLACE", line_no)?;
        } else if let Some(rest) = block_header(trimmed, "DEFINE") {
            set_block(&mut define, read_block(&raw, &mut idx, rest, line_no)?, "DEFINE", line_no)?;
        } else if let Some(rest) = block_header(trimmed, "IF") {
            set_block(&mut cond, read_block(&raw, &mut idx, rest, line_no)?, "IF", line_no)?;
        } else if let Some(rest) = block_header(trimmed, "WITH") {
            set_block(&mut with, read_block(&raw, &mut idx, rest, line_no)?, "WITH", line_no)?;
        } else {
            return Err(RuleParseError::new(
                line_no,
                format!("unknown section: {trimmed}"),
            ));
        }
    }

    let level = level.ok_or_else(|| RuleParseError::new(1, "missing OLEVEL section"))?;
    let flag = flag.ok_or_else(|| RuleParseError::new(1, "missing OFLAG section"))?;
    let replace = replace.ok_or_else(|| RuleParseError::new(1, "missing REPLACE block"))?;
    let with = with.ok_or_else(|| RuleParseError::new(1, "missing WITH block"))?;

    let pattern = BlockPattern::parse(&replace.lines)
        .map_err(|e| RuleParseError::new(replace.header_line, e))?;
    let template = BlockTemplate::parse(&with.lines)
        .map_err(|e| RuleParseError::new(with.header_line, e))?;

    let mut bound: BTreeSet<u32> = pattern.vars().clone();
    let mut defines = Vec::new();
    if let Some(section) = &define {
        for line in &section.lines {
            let (var, expr) = parse_define(line)
                .map_err(|e| RuleParseError::new(section.header_line, e))?;
            if pattern.vars().contains(&var) {
                return Err(RuleParseError::new(
                    section.header_line,
                    format!("variable ${var} already bound by the pattern"),
                ));
            }
            if defines.iter().any(|(v, _)| *v == var) {
                return Err(RuleParseError::new(
                    section.header_line,
                    format!("variable ${var} defined twice"),
                ));
            }
            validate_expr(&expr, &bound)
                .map_err(|e| RuleParseError::new(section.header_line, e))?;
            bound.insert(var);
            defines.push((var, expr));
        }
    }

    let predicate = match &cond {
        Some(section) => {
            let joined = section.lines.join(" ");
            if joined.trim().is_empty() {
                return Err(RuleParseError::new(section.header_line, "empty IF block"));
            }
            let expr = parse_expr(&joined)
                .map_err(|e| RuleParseError::new(section.header_line, e))?;
            validate_expr(&expr, &bound)
                .map_err(|e| RuleParseError::new(section.header_line, e))?;
            Some(expr)
        }
        None => None,
    };

    for var in template.vars() {
        if !bound.contains(&var) {
            return Err(RuleParseError::new(
                with.header_line,
                format!("reference to unbound variable ${var} in WITH block"),
            ));
        }
    }

    Ok(Rule {
        level,
        flag,
        pattern,
        defines,
        predicate,
        template,
        source: source.to_string(),
    })
}

fn strip_comment(line: &str) -> &str {
    match line.find(";;") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn set_scalar(
    slot: &mut Option<u32>,
    rest: &str,
    name: &str,
    line_no: usize,
) -> Result<(), RuleParseError> {
    if slot.is_some() {
        return Err(RuleParseError::new(line_no, format!("duplicate {name} section")));
    }
    let value = rest
        .trim()
        .parse::<u32>()
        .map_err(|_| RuleParseError::new(line_no, format!("malformed {name} value: {}", rest.trim())))?;
    *slot = Some(value);
    Ok(())
}

fn set_block(
    slot: &mut Option<Section>,
    section: Section,
    name: &str,
    line_no: usize,
) -> Result<(), RuleParseError> {
    if slot.is_some() {
        return Err(RuleParseError::new(line_no, format!("duplicate {name} block")));
    }
    *slot = Some(section);
    Ok(())
}

fn block_header<'a>(trimmed: &'a str, key: &str) -> Option<&'a str> {
    let rest = trimmed.strip_prefix(key)?;
    let rest = rest.trim_start();
    rest.strip_prefix("{{")
}

/// Collect a block's content lines. The opening `{{` has been consumed;
/// `inline` is whatever followed it on the header line.
fn read_block(
    raw: &[&str],
    idx: &mut usize,
    inline: &str,
    header_line: usize,
) -> Result<Section, RuleParseError> {
    let mut lines = Vec::new();

    if let Some(pos) = inline.find("}}") {
        let content = inline[..pos].trim();
        if !content.is_empty() {
            lines.push(content.to_string());
        }
        return Ok(Section {
            header_line,
            lines,
        });
    }
    if !inline.trim().is_empty() {
        lines.push(inline.trim_end().to_string());
    }

    while *idx < raw.len() {
        let line = strip_comment(raw[*idx]);
        *idx += 1;
        match line.find("}}") {
            Some(pos) => {
                let content = line[..pos].trim_end();
                if !content.trim().is_empty() {
                    lines.push(content.to_string());
                }
                return Ok(Section {
                    header_line,
                    lines,
                });
            }
            None => {
                if !line.trim().is_empty() {
                    lines.push(line.trim_end().to_string());
                }
            }
        }
    }

    Err(RuleParseError::new(header_line, "unterminated block"))
}

fn parse_define(line: &str) -> Result<(u32, Expr), String> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix('$')
        .ok_or_else(|| format!("malformed DEFINE assignment: {trimmed}"))?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(format!("malformed DEFINE assignment: {trimmed}"));
    }
    let var: u32 = digits
        .parse()
        .map_err(|_| format!("malformed variable in DEFINE: {trimmed}"))?;
    if var == 0 {
        return Err("variable index must be a positive integer".to_string());
    }
    let rest = rest[digits.len()..].trim_start();
    let rest = rest
        .strip_prefix('=')
        .ok_or_else(|| format!("expected '=' in DEFINE assignment: {trimmed}"))?;
    if rest.starts_with('=') {
        return Err(format!("expected '=' in DEFINE assignment: {trimmed}"));
    }
    let expr = parse_expr(rest)?;
    Ok((var, expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE_18: &str = "\
OLEVEL: 1
OFLAG: 18
REPLACE {{
  call __EQ16
  $1 a
  jp $2, $3
}}
DEFINE {{ $4 = (($2 == nz) && z) || nz }}
IF {{ ($1 == or) || ($1 == and) }}
WITH {{
  or a
  sbc hl, de
  jp $4, $3
}}
";

    #[test]
    fn parses_representative_rule() {
        let rule = parse_rule_str(RULE_18, "18.opt").expect("rule");
        assert_eq!(rule.level, 1);
        assert_eq!(rule.flag, 18);
        assert_eq!(rule.pattern.len(), 3);
        assert_eq!(rule.defines.len(), 1);
        assert!(rule.predicate.is_some());
        assert_eq!(rule.template.len(), 3);
        assert_eq!(rule.pattern.first_mnemonic(), Some("call"));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "\
;; drop a redundant register move
OLEVEL: 1
OFLAG: 1

REPLACE {{
  ld $1, $1  ;; same source and destination
}}
IF {{ IS_REG8($1) }}
WITH {{
}}
";
        let rule = parse_rule_str(text, "01.opt").expect("rule");
        assert_eq!(rule.flag, 1);
        assert_eq!(rule.pattern.len(), 1);
        assert!(rule.template.is_empty());
    }

    #[test]
    fn unknown_section_is_an_error() {
        let text = "OLEVEL: 1\nOFLAG: 2\nFROB {{ x }}\n";
        let err = parse_rule_str(text, "x.opt").unwrap_err();
        assert!(err.message.contains("unknown section"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let text = "OLEVEL: 1\nOFLAG: 2\nREPLACE {{\n  or a\n";
        let err = parse_rule_str(text, "x.opt").unwrap_err();
        assert!(err.message.contains("unterminated block"));
    }

    #[test]
    fn missing_sections_are_errors() {
        let no_flag = "OLEVEL: 1\nREPLACE {{\n or a\n}}\nWITH {{\n}}\n";
        assert!(parse_rule_str(no_flag, "x.opt")
            .unwrap_err()
            .message
            .contains("missing OFLAG"));

        let no_replace = "OLEVEL: 1\nOFLAG: 3\nWITH {{\n}}\n";
        assert!(parse_rule_str(no_replace, "x.opt")
            .unwrap_err()
            .message
            .contains("missing REPLACE"));
    }

    #[test]
    fn empty_pattern_is_an_error() {
        let text = "OLEVEL: 1\nOFLAG: 2\nREPLACE {{\n}}\nWITH {{\n or a\n}}\n";
        let err = parse_rule_str(text, "x.opt").unwrap_err();
        assert!(err.message.contains("empty"));
    }

    #[test]
    fn unbound_variable_in_with_is_an_error() {
        let text = "OLEVEL: 1\nOFLAG: 2\nREPLACE {{\n sub 1\n}}\nWITH {{\n jp $9, L\n}}\n";
        let err = parse_rule_str(text, "x.opt").unwrap_err();
        assert!(err.message.contains("unbound variable $9"));
    }

    #[test]
    fn unknown_function_in_if_is_an_error() {
        let text = "OLEVEL: 1\nOFLAG: 2\nREPLACE {{\n sub $1\n}}\nIF {{ NOPE($1) }}\nWITH {{\n}}\n";
        let err = parse_rule_str(text, "x.opt").unwrap_err();
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn define_cannot_shadow_pattern_variable() {
        let text = "\
OLEVEL: 1
OFLAG: 2
REPLACE {{
 sub $1
}}
DEFINE {{ $1 = 5 }}
WITH {{
 or a
}}
";
        let err = parse_rule_str(text, "x.opt").unwrap_err();
        assert!(err.message.contains("already bound by the pattern"));
    }

    #[test]
    fn define_order_establishes_scope() {
        let text = "\
OLEVEL: 1
OFLAG: 2
REPLACE {{
 sub $1
}}
DEFINE {{
 $2 = CONCAT($1, \"x\")
 $3 = UPPER($2)
}}
WITH {{
 sub $3
}}
";
        let rule = parse_rule_str(text, "x.opt").expect("rule");
        assert_eq!(rule.defines.len(), 2);

        let backwards = "\
OLEVEL: 1
OFLAG: 2
REPLACE {{
 sub $1
}}
DEFINE {{
 $3 = UPPER($2)
 $2 = CONCAT($1, \"x\")
}}
WITH {{
 sub $3
}}
";
        let err = parse_rule_str(backwards, "x.opt").unwrap_err();
        assert!(err.message.contains("unbound variable $2"));
    }

    #[test]
    fn duplicate_sections_are_errors() {
        let text = "OLEVEL: 1\nOLEVEL: 2\nOFLAG: 3\nREPLACE {{\n or a\n}}\nWITH {{\n}}\n";
        assert!(parse_rule_str(text, "x.opt")
            .unwrap_err()
            .message
            .contains("duplicate OLEVEL"));
    }

    #[test]
    fn malformed_expression_is_an_error() {
        let text = "OLEVEL: 1\nOFLAG: 2\nREPLACE {{\n sub 1\n}}\nIF {{ ($1 == }}\nWITH {{\n}}\n";
        assert!(parse_rule_str(text, "x.opt").is_err());
    }
}
