//! Client-surface emission.
//!
//! Re-emits a validated token stream as the equivalent expression in the
//! client-side surface, driven by the same registry the evaluator uses:
//!
//! - operator aliases normalize (`and` → `&&`, `lt` → `<`, `eq` → `==`, …),
//! - functions emit under their client-surface name; a name of `NA` means
//!   the client runtime has no equivalent and the whole emission is empty,
//! - variables become `READ('name')` calls,
//! - string literals are quoted with JSON escaping (valid in the client
//!   surface),
//! - when the expression references variables, the result is wrapped in
//!   `IF(ANY_NA(['v1','v2']), null, ( … ))` so a not-applicable variable
//!   poisons the whole expression instead of evaluating with garbage.
//!
//! Callers validate the expression first (parse-only evaluation); the
//! emitter itself only walks tokens.

use std::collections::BTreeSet;

use crate::functions::FunctionSpec;
use crate::lexer::{Token, TokenKind};
use crate::EvalError;

fn quote(text: &str) -> String {
    // JSON string escaping is valid in the client surface.
    serde_json::Value::String(text.to_string()).to_string()
}

fn map_operator(text: &str) -> &str {
    match text {
        "and" => "&&",
        "or" => "||",
        "lt" => "<",
        "le" => "<=",
        "gt" => ">",
        "ge" => ">=",
        "eq" => "==",
        "ne" => "!=",
        other => other,
    }
}

/// Emit the client-surface expression for a validated token stream.
pub fn emit_client_expression<F>(
    tokens: &[Token],
    vars_used: &BTreeSet<String>,
    lookup: &F,
) -> Result<String, EvalError>
where
    F: Fn(&str) -> Option<FunctionSpec>,
{
    let mut parts: Vec<String> = Vec::new();
    // A function name fuses with its opening parenthesis.
    let mut fuse_lparen = false;

    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::Number => {
                if t.text.parse::<f64>().is_ok() {
                    parts.push(t.text.clone());
                } else {
                    parts.push(quote(&t.text));
                }
            }
            TokenKind::DqString | TokenKind::SqString => parts.push(quote(&t.text)),
            TokenKind::LParen => {
                if fuse_lparen {
                    fuse_lparen = false;
                    match parts.last_mut() {
                        Some(last) => last.push('('),
                        None => parts.push("(".to_string()),
                    }
                } else {
                    parts.push("(".to_string());
                }
            }
            TokenKind::RParen | TokenKind::Comma => parts.push(t.text.clone()),
            TokenKind::AndOr | TokenKind::Compare => {
                parts.push(map_operator(&t.text).to_string())
            }
            TokenKind::Not => parts.push("!".to_string()),
            TokenKind::Assign => parts.push("=".to_string()),
            TokenKind::BinaryOp => parts.push(t.text.clone()),
            TokenKind::Word
                if tokens.get(i + 1).map(|n| n.kind) == Some(TokenKind::LParen) =>
            {
                match lookup(&t.text) {
                    Some(spec) if spec.client_supported() => {
                        parts.push(spec.client_name.to_string());
                        fuse_lparen = true;
                    }
                    // No client equivalent: the whole expression is
                    // unavailable on that side.
                    Some(_) => return Ok(String::new()),
                    None => {
                        return Err(EvalError::syntax("undefined function", t));
                    }
                }
            }
            TokenKind::Word | TokenKind::Sgqa => {
                parts.push(format!("READ('{}')", t.text));
            }
            TokenKind::Space => {}
            TokenKind::Other => {
                return Err(EvalError::syntax("unrecognized token", t));
            }
        }
    }

    let body = join_tokens(&parts);

    if vars_used.is_empty() {
        Ok(format!("({})", body))
    } else {
        let names: Vec<String> = vars_used.iter().map(|n| format!("'{}'", n)).collect();
        Ok(format!(
            "IF(ANY_NA([{}]), null, ({}))",
            names.join(", "),
            body
        ))
    }
}

/// Join emitted fragments with spaces, except around grouping punctuation.
fn join_tokens(parts: &[String]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 && part != ")" && part != "," && !out.ends_with('(') {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}
