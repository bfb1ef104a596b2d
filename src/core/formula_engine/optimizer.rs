//! Syntactic formula optimization
//!
//! Rewrites run over the token stream, never the raw text, so string literals
//! that merely look like `+0` are left alone. The rewrites are heuristics: they
//! drop identities and redundant grouping but do not prove equivalence.

use super::tokenizer::{render, tokenize, Token};
use serde::Serialize;

const VOLATILE_FUNCTIONS: [&str; 6] = ["NOW", "TODAY", "RAND", "RANDBETWEEN", "INDIRECT", "OFFSET"];
const COMPARISONS: [&str; 6] = ["=", "<>", "<", ">", "<=", ">="];

/// What kind of improvement an advice entry proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdviceKind {
    /// VLOOKUP → INDEX/MATCH
    LookupRewrite,
    VolatileFunction,
    NestedIf,
    /// SUMIF/COUNTIF → SUMIFS/COUNTIFS
    MultiCriteria,
    WholeColumnReference,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advice {
    pub kind: AdviceKind,
    pub message: String,
    /// Suggested replacement text, when one can be derived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// Outcome of `optimize_formula`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimization {
    pub original: String,
    /// Rewritten formula; equal to `original` when no rewrite applied
    pub optimized: String,
    pub advice: Vec<Advice>,
}

impl Optimization {
    pub fn is_rewritten(&self) -> bool {
        self.optimized != self.original
    }

    /// True when there is anything to tell the user
    pub fn has_suggestions(&self) -> bool {
        self.is_rewritten() || !self.advice.is_empty()
    }
}

/// Simplify a formula and collect performance advice
pub fn optimize_formula(formula: &str) -> Optimization {
    let Ok(mut tokens) = tokenize(formula) else {
        return Optimization {
            original: formula.to_string(),
            optimized: formula.to_string(),
            advice: Vec::new(),
        };
    };

    let advice = collect_advice(&tokens);

    let mut changed = false;
    while simplify_once(&mut tokens) {
        changed = true;
    }

    let optimized = if changed {
        let prefix = if formula.trim_start().starts_with('=') {
            "="
        } else {
            ""
        };
        format!("{prefix}{}", render(&tokens))
    } else {
        formula.to_string()
    };

    Optimization {
        original: formula.to_string(),
        optimized,
        advice,
    }
}

/// Apply the first rewrite that matches; false when none does
fn simplify_once(tokens: &mut Vec<Token>) -> bool {
    collapse_signs(tokens)
        || drop_additive_identity(tokens)
        || drop_multiplicative_identity(tokens)
        || unwrap_single_primary(tokens)
        || unwrap_redundant_group(tokens)
}

fn is_comparison(token: &Token) -> bool {
    matches!(token, Token::Operator(op) if COMPARISONS.contains(&op.as_str()))
}

fn is_zero(token: &Token) -> bool {
    matches!(token, Token::Number(n) if *n == 0.0)
}

fn is_one(token: &Token) -> bool {
    matches!(token, Token::Number(n) if *n == 1.0)
}

/// `--` → `+`, `+-` → `-`
fn collapse_signs(tokens: &mut Vec<Token>) -> bool {
    for i in 0..tokens.len().saturating_sub(1) {
        let replacement = if tokens[i].is_operator("-") && tokens[i + 1].is_operator("-") {
            "+"
        } else if tokens[i].is_operator("+") && tokens[i + 1].is_operator("-") {
            "-"
        } else {
            continue;
        };
        tokens[i] = Token::Operator(replacement.to_string());
        tokens.remove(i + 1);
        return true;
    }
    false
}

/// `X+0` / `X-0` and a leading `0+X`
fn drop_additive_identity(tokens: &mut Vec<Token>) -> bool {
    for i in 0..tokens.len() {
        // X+0 / X-0 where nothing binding tighter follows the zero
        if (tokens[i].is_operator("+") || tokens[i].is_operator("-"))
            && i > 0
            && tokens[i - 1].ends_operand()
            && tokens.get(i + 1).is_some_and(is_zero)
        {
            let follower_ok = match tokens.get(i + 2) {
                None | Some(Token::CloseParen) | Some(Token::Comma) => true,
                Some(t) => ["+", "-", "&"].iter().any(|op| t.is_operator(op)) || is_comparison(t),
            };
            if follower_ok {
                tokens.drain(i..i + 2);
                return true;
            }
        }

        // 0+X at the start of an operand
        if is_zero(&tokens[i]) && tokens.get(i + 1).is_some_and(|t| t.is_operator("+")) {
            let leader_ok = match i.checked_sub(1).map(|p| &tokens[p]) {
                None | Some(Token::OpenParen) | Some(Token::Comma) => true,
                Some(t) => t.is_operator("&") || is_comparison(t),
            };
            let has_operand = tokens
                .get(i + 2)
                .is_some_and(|t| !matches!(t, Token::CloseParen | Token::Comma));
            if leader_ok && has_operand {
                tokens.drain(i..i + 2);
                return true;
            }
        }
    }
    false
}

/// `X*1` / `X/1` and a leading `1*X`
fn drop_multiplicative_identity(tokens: &mut Vec<Token>) -> bool {
    for i in 0..tokens.len() {
        if (tokens[i].is_operator("*") || tokens[i].is_operator("/"))
            && i > 0
            && tokens[i - 1].ends_operand()
            && tokens.get(i + 1).is_some_and(is_one)
            && !tokens
                .get(i + 2)
                .is_some_and(|t| t.is_operator("^") || t.is_operator("%"))
        {
            tokens.drain(i..i + 2);
            return true;
        }

        if is_one(&tokens[i]) && tokens.get(i + 1).is_some_and(|t| t.is_operator("*")) {
            let leader_ok = match i.checked_sub(1).map(|p| &tokens[p]) {
                None | Some(Token::OpenParen) | Some(Token::Comma) => true,
                Some(t) => {
                    ["+", "-", "*", "&"].iter().any(|op| t.is_operator(op)) || is_comparison(t)
                }
            };
            if leader_ok {
                tokens.drain(i..i + 2);
                return true;
            }
        }
    }
    false
}

/// `(A1)` → `A1`, `(Sheet2!B3)` → `Sheet2!B3`, but never a function's own parentheses
fn unwrap_single_primary(tokens: &mut Vec<Token>) -> bool {
    for i in 0..tokens.len() {
        if tokens[i] != Token::OpenParen {
            continue;
        }
        if i > 0 && matches!(tokens[i - 1], Token::Identifier(_)) {
            continue;
        }
        let inner = match (tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
            (Some(Token::SheetPrefix(_)), Some(Token::Identifier(_)), Some(Token::CloseParen)) => 2,
            (
                Some(Token::Number(_) | Token::Text(_) | Token::Identifier(_) | Token::ErrorLiteral(_)),
                Some(Token::CloseParen),
                _,
            ) => 1,
            _ => continue,
        };
        tokens.remove(i + inner + 1);
        tokens.remove(i);
        return true;
    }
    false
}

/// Parentheses that span a whole argument, a whole nested group or the whole formula
fn unwrap_redundant_group(tokens: &mut Vec<Token>) -> bool {
    for i in 0..tokens.len() {
        if tokens[i] != Token::OpenParen {
            continue;
        }
        let Some(close) = matching_close(tokens, i) else {
            return false;
        };
        let before = i.checked_sub(1).map(|p| &tokens[p]);
        let after = tokens.get(close + 1);
        let opens_slot = match before {
            None | Some(Token::Comma) => true,
            // `((X))` or `F((X))`: the outer pair still encloses everything
            Some(Token::OpenParen) => true,
            _ => false,
        };
        let closes_slot = matches!(after, None | Some(Token::CloseParen) | Some(Token::Comma));
        if opens_slot && closes_slot {
            tokens.remove(close);
            tokens.remove(i);
            return true;
        }
    }
    false
}

fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, token) in tokens[open..].iter().enumerate() {
        match token {
            Token::OpenParen => depth += 1,
            Token::CloseParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Top-level arguments of the call whose '(' sits at `open`
fn call_arguments(tokens: &[Token], open: usize) -> Option<Vec<&[Token]>> {
    let close = matching_close(tokens, open)?;
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = open + 1;
    for i in open + 1..close {
        match tokens[i] {
            Token::OpenParen => depth += 1,
            Token::CloseParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                args.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < close {
        args.push(&tokens[start..close]);
    }
    Some(args)
}

fn collect_advice(tokens: &[Token]) -> Vec<Advice> {
    let mut advice = Vec::new();
    let mut if_count = 0;
    let mut volatile = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let Token::Identifier(name) = token else {
            continue;
        };
        if tokens.get(i + 1) != Some(&Token::OpenParen) {
            continue;
        }
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "IF" => if_count += 1,
            "VLOOKUP" => advice.push(Advice {
                kind: AdviceKind::LookupRewrite,
                message: "INDEX/MATCH is faster than VLOOKUP and can look up to the left".into(),
                replacement: vlookup_replacement(tokens, i + 1),
            }),
            "SUMIF" | "COUNTIF" => advice.push(Advice {
                kind: AdviceKind::MultiCriteria,
                message: format!("{upper}S handles several criteria and is more flexible than {upper}"),
                replacement: Some(format!("{upper}S(")),
            }),
            name if VOLATILE_FUNCTIONS.contains(&name) => {
                if !volatile.contains(&upper) {
                    volatile.push(upper.clone());
                }
            }
            _ => {}
        }
    }

    for name in volatile {
        advice.push(Advice {
            kind: AdviceKind::VolatileFunction,
            message: format!(
                "{name} is volatile and recalculates on every change; prefer a static value"
            ),
            replacement: None,
        });
    }

    if if_count >= 3 {
        advice.push(Advice {
            kind: AdviceKind::NestedIf,
            message: "Deeply nested IFs are hard to read; consider IFS() or SWITCH()".into(),
            replacement: Some("IFS()".into()),
        });
    }

    let whole_column = tokens.windows(3).any(|w| match w {
        [Token::Identifier(a), Token::Colon, Token::Identifier(b)] => {
            is_column_only(a) && is_column_only(b)
        }
        _ => false,
    });
    if whole_column {
        advice.push(Advice {
            kind: AdviceKind::WholeColumnReference,
            message: "Whole-column references scan over a million cells; use the data range".into(),
            replacement: None,
        });
    }

    advice
}

fn is_column_only(text: &str) -> bool {
    let letters = text.strip_prefix('$').unwrap_or(text);
    !letters.is_empty() && letters.len() <= 3 && letters.chars().all(|c| c.is_ascii_alphabetic())
}

/// VLOOKUP(v, t, c[, exact]) → INDEX(t,MATCH(v,INDEX(t,0,1),exact),c)
fn vlookup_replacement(tokens: &[Token], open: usize) -> Option<String> {
    let args = call_arguments(tokens, open)?;
    let (lookup, table, column) = match args.as_slice() {
        [lookup, table, column] | [lookup, table, column, _] => (*lookup, *table, *column),
        _ => return None,
    };
    let match_type = match args.get(3) {
        Some(flag) => render(flag),
        None => "TRUE".to_string(),
    };
    let table = render(table);
    Some(format!(
        "INDEX({table},MATCH({},INDEX({table},0,1),{match_type}),{})",
        render(lookup),
        render(column)
    ))
}
