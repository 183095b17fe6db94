//! The expression engine: recursive-descent evaluation over a value stack.
//!
//! [`ExpressionEngine`] owns the injected resolvers plus a per-call
//! evaluation state (token vector, cursor, operand stack, error log,
//! referenced-variable set). Each public entry point rebuilds that state, so
//! nothing leaks between calls; the engine itself is single-threaded.
//!
//! Grammar, lowest to highest precedence:
//!
//! ```text
//! expressions      := expression ( ',' expression )*
//! expression       := ( variable '=' logicalOr )  |  logicalOr
//! logicalOr        := logicalAnd ( ('||'|'or') logicalAnd )*
//! logicalAnd       := equality ( ('&&'|'and') equality )*
//! equality         := relation ( ('=='|'!='|'eq'|'ne') relation )*
//! relation         := additive ( ('<'|'<='|'>'|'>='|aliases) additive )*
//! additive         := multiplicative ( ('+'|'-') multiplicative )*
//! multiplicative   := unary ( ('*'|'/') unary )*
//! unary            := ('+'|'-'|'!')? primary
//! primary          := '(' expressions ')' | function | variable | literal
//! ```
//!
//! The parser evaluates as it goes: terminals push an [`Operand`], operators
//! pop and push. A successful parse leaves exactly one stack entry. Errors
//! short-circuit the production they occur in, but the top-level comma loop
//! keeps going so several errors can surface from one call.

use std::collections::BTreeSet;

use log::{debug, trace};

use crate::emitter;
use crate::expand::ReferenceExpander;
use crate::functions::{self, DispatchError, FunctionSpec};
use crate::lexer::{self, Token, TokenKind};
use crate::resolver::{AssignOp, QuestionResolver, VarAttr, VariableResolver};
use crate::splitter::{split_template, SegmentKind};
use crate::value::{self, CmpOp, Operand, Origin, Value};
use crate::{ErrorKind, EvalError};

/// Split a surface name into its root and a trailing attribute, when the
/// last dotted segment is one of the allowed attributes.
pub(crate) fn split_attr(name: &str) -> (&str, Option<VarAttr>) {
    match name.rfind('.') {
        Some(pos) => match VarAttr::from_name(&name[pos + 1..]) {
            Some(attr) => (&name[..pos], Some(attr)),
            None => (name, None),
        },
        None => (name, None),
    }
}

/// Sandboxed evaluator for survey-template expressions.
pub struct ExpressionEngine {
    vars: Box<dyn VariableResolver>,
    questions: Box<dyn QuestionResolver>,
    registered: Vec<FunctionSpec>,
    expander: ReferenceExpander,

    // Per-evaluation state, rebuilt by every evaluate call.
    expr: String,
    tokens: Vec<Token>,
    pos: usize,
    stack: Vec<Operand>,
    errors: Vec<EvalError>,
    parse_only: bool,
    vars_used: BTreeSet<String>,
    result: Option<Operand>,
    group_seq: i32,
    question_seq: i32,
}

impl ExpressionEngine {
    pub fn new(vars: Box<dyn VariableResolver>, questions: Box<dyn QuestionResolver>) -> Self {
        ExpressionEngine {
            vars,
            questions,
            registered: Vec::new(),
            expander: ReferenceExpander::new(),
            expr: String::new(),
            tokens: Vec::new(),
            pos: 0,
            stack: Vec::new(),
            errors: Vec::new(),
            parse_only: false,
            vars_used: BTreeSet::new(),
            result: None,
            group_seq: -1,
            question_seq: -1,
        }
    }

    /// Merge additional functions into this instance's registry. Later
    /// registrations shadow earlier ones and the defaults.
    pub fn register_functions(&mut self, specs: &[FunctionSpec]) {
        self.registered.extend_from_slice(specs);
    }

    pub(crate) fn lookup_function(&self, name: &str) -> Option<FunctionSpec> {
        self.registered
            .iter()
            .rev()
            .find(|f| f.name == name)
            .copied()
            .or_else(|| functions::find_function(name).copied())
    }

    /// Evaluate one expression. Returns `true` on success; the value is then
    /// available via [`result`](Self::result), referenced variables via
    /// [`vars_used`](Self::vars_used). With `parse_only` no function bodies
    /// run and no writes happen; syntax, names, and arity are still checked.
    pub fn evaluate(&mut self, expr: &str, parse_only: bool) -> bool {
        self.expander.clear();
        self.evaluate_in(expr, parse_only, -1, -1)
    }

    fn evaluate_in(
        &mut self,
        expr: &str,
        parse_only: bool,
        group_seq: i32,
        question_seq: i32,
    ) -> bool {
        debug!("evaluate (parse_only={}): {:?}", parse_only, expr);
        self.parse_only = parse_only;
        self.group_seq = group_seq;
        self.question_seq = question_seq;
        self.errors.clear();
        self.stack.clear();
        self.vars_used.clear();
        self.result = None;
        self.pos = 0;

        self.expr = self.expander.expand(expr, self.questions.as_ref());
        self.tokens = lexer::tokenize(&self.expr, false);
        trace!("tokens: {:?}", self.tokens);

        // Unrecognized lexemes are syntax errors before parsing starts.
        let bad: Vec<Token> = self
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Other)
            .cloned()
            .collect();
        for t in &bad {
            self.errors.push(EvalError::syntax("unrecognized token", t));
        }
        if !self.errors.is_empty() {
            return false;
        }

        if self.tokens.is_empty() {
            self.result = Some(Operand::new(Value::Str(String::new()), Origin::String, 0));
            return true;
        }

        let mut ok = self.eval_expressions();
        if ok && self.pos < self.tokens.len() {
            let t = self.tokens[self.pos].clone();
            self.errors
                .push(EvalError::syntax("extra tokens after the expression", &t));
            ok = false;
        }
        if !ok || !self.errors.is_empty() {
            return false;
        }

        if self.stack.len() != 1 {
            // A successful parse must leave exactly one value; anything else
            // is an engine defect, reported rather than ignored.
            self.errors.push(EvalError {
                kind: ErrorKind::Runtime,
                message: "internal error: unbalanced evaluation stack".to_string(),
                token: String::new(),
                offset: 0,
            });
            return false;
        }
        self.result = self.stack.pop();
        true
    }

    /// The last evaluation's value, if it succeeded.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref().map(|o| &o.value)
    }

    /// The last evaluation's value rendered for substitution.
    pub fn result_string(&self) -> String {
        self.result.as_ref().map(|o| o.text()).unwrap_or_default()
    }

    /// Errors from the last evaluation, in the order they were recorded.
    pub fn errors(&self) -> &[EvalError] {
        &self.errors
    }

    /// Errors from the last evaluation, ordered by source offset.
    pub fn errors_sorted(&self) -> Vec<EvalError> {
        let mut sorted = self.errors.clone();
        sorted.sort_by(EvalError::by_offset);
        sorted
    }

    /// Distinct variable surface forms referenced by the last evaluation.
    pub fn vars_used(&self) -> &BTreeSet<String> {
        &self.vars_used
    }

    /// Diagnostic tokenization; `edit_mode` keeps whitespace tokens.
    pub fn tokenize(&self, src: &str, edit_mode: bool) -> Vec<Token> {
        lexer::tokenize(src, edit_mode)
    }

    /// [`process_string`](Self::process_string) with one recursion level and
    /// no survey position.
    pub fn process(&mut self, src: &str) -> String {
        self.process_string(src, 1, -1, -1)
    }

    /// Substitute every `{…}` expression in a host string. A segment that
    /// fails to evaluate is kept verbatim (braces included). The result is
    /// re-processed up to `recursion_levels` times, then `\{` and `\}` are
    /// unescaped.
    pub fn process_string(
        &mut self,
        src: &str,
        recursion_levels: usize,
        group_seq: i32,
        question_seq: i32,
    ) -> String {
        debug!("process_string ({} levels): {:?}", recursion_levels, src);
        self.expander.clear();

        let mut current = src.to_string();
        for _ in 0..recursion_levels.max(1) {
            let segments = split_template(&current);
            if !segments.iter().any(|s| s.kind == SegmentKind::Expression) {
                break;
            }
            let mut out = String::with_capacity(current.len());
            for seg in &segments {
                match seg.kind {
                    SegmentKind::Literal => out.push_str(&seg.text),
                    SegmentKind::Expression => {
                        let inner = &seg.text[1..seg.text.len() - 1];
                        if self.evaluate_in(inner, false, group_seq, question_seq) {
                            out.push_str(&self.result_string());
                        } else {
                            trace!("substitution failed, keeping {:?}", seg.text);
                            out.push_str(&seg.text);
                        }
                    }
                }
            }
            let settled = out == current;
            current = out;
            if settled {
                break;
            }
        }
        current.replace("\\{", "{").replace("\\}", "}")
    }

    /// Evaluate to a boolean for relevance logic: `false` on any error, on a
    /// null result, and when any referenced variable is currently
    /// irrelevant, unless its surface form opted out via `.NAOK` or
    /// `.relevanceStatus`.
    pub fn boolean_evaluate(&mut self, expr: &str, group_seq: i32, question_seq: i32) -> bool {
        self.expander.clear();
        if !self.evaluate_in(expr, false, group_seq, question_seq) {
            return false;
        }
        let result = match &self.result {
            Some(op) => op.value.clone(),
            None => return false,
        };
        if matches!(result, Value::Null) {
            return false;
        }
        let names: Vec<String> = self.vars_used.iter().cloned().collect();
        for name in names {
            if name.ends_with(".NAOK") || name.ends_with(".relevanceStatus") {
                continue;
            }
            let (root, _) = split_attr(&name);
            match self.vars.read(
                root,
                Some(VarAttr::RelevanceStatus),
                None,
                group_seq,
                question_seq,
            ) {
                Ok(status) if status.is_truthy() => {}
                _ => return false,
            }
        }
        result.is_truthy()
    }

    /// Compile an expression into the client-surface equivalent. An
    /// expression that fails parse-only validation, or that uses a function
    /// the client runtime lacks, emits the empty string.
    pub fn to_client_expression(&mut self, expr: &str) -> String {
        self.expander.clear();
        if !self.evaluate_in(expr, true, -1, -1) {
            return String::new();
        }
        let lookup = |name: &str| self.lookup_function(name);
        match emitter::emit_client_expression(&self.tokens, &self.vars_used, &lookup) {
            Ok(emitted) => emitted,
            Err(e) => {
                self.errors.push(e);
                String::new()
            }
        }
    }

    // ── Token cursor ────────────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_is(&self, kind: TokenKind, texts: &[&str]) -> bool {
        matches!(self.peek(), Some(t) if t.kind == kind && texts.contains(&t.text.as_str()))
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        self.pos += 1;
        t
    }

    fn error(&mut self, e: EvalError) -> bool {
        self.errors.push(e);
        false
    }

    fn end_error(&mut self, message: &str) -> bool {
        let offset = self.expr.chars().count();
        self.errors.push(EvalError::syntax_at(message, offset));
        false
    }

    fn pop2(&mut self, op: &Token) -> Option<(Operand, Operand)> {
        let b = self.stack.pop();
        let a = self.stack.pop();
        match (a, b) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => {
                self.errors.push(EvalError::runtime(
                    "internal error: evaluation stack underflow",
                    op,
                ));
                None
            }
        }
    }

    // ── Grammar productions ─────────────────────────────────────────────────

    fn eval_expressions(&mut self) -> bool {
        let mut ok = self.eval_expression();
        while self.peek_kind() == Some(TokenKind::Comma) {
            self.pos += 1;
            if ok {
                // Sequence expression: the earlier value is discarded.
                self.stack.pop();
            }
            let next = self.eval_expression();
            ok = ok && next;
        }
        ok
    }

    fn eval_expression(&mut self) -> bool {
        let assignment = matches!(
            self.peek_kind(),
            Some(TokenKind::Word) | Some(TokenKind::Sgqa)
        ) && matches!(
            self.tokens.get(self.pos + 1).map(|t| t.kind),
            Some(TokenKind::Assign)
        );
        if assignment {
            let target = self.advance();
            self.pos += 1; // '='
            self.vars_used.insert(target.text.clone());
            if !self.eval_logical_or() {
                return false;
            }
            return self.assign_variable(&target);
        }

        if !self.eval_logical_or() {
            return false;
        }
        if self.peek_kind() == Some(TokenKind::Assign) {
            let t = self.advance();
            return self.error(EvalError::type_error("only variables may be assigned", &t));
        }
        true
    }

    fn eval_logical_or(&mut self) -> bool {
        if !self.eval_logical_and() {
            return false;
        }
        while self.peek_is(TokenKind::AndOr, &["||", "or"]) {
            let op = self.advance();
            if !self.eval_logical_and() {
                return false;
            }
            if !self.apply_binary(&op) {
                return false;
            }
        }
        true
    }

    fn eval_logical_and(&mut self) -> bool {
        if !self.eval_equality() {
            return false;
        }
        while self.peek_is(TokenKind::AndOr, &["&&", "and"]) {
            let op = self.advance();
            if !self.eval_equality() {
                return false;
            }
            if !self.apply_binary(&op) {
                return false;
            }
        }
        true
    }

    fn eval_equality(&mut self) -> bool {
        if !self.eval_relation() {
            return false;
        }
        while self.peek_is(TokenKind::Compare, &["==", "!=", "eq", "ne"]) {
            let op = self.advance();
            if !self.eval_relation() {
                return false;
            }
            if !self.apply_binary(&op) {
                return false;
            }
        }
        true
    }

    fn eval_relation(&mut self) -> bool {
        if !self.eval_additive() {
            return false;
        }
        while self.peek_is(
            TokenKind::Compare,
            &["<", "<=", ">", ">=", "lt", "le", "gt", "ge"],
        ) {
            let op = self.advance();
            if !self.eval_additive() {
                return false;
            }
            if !self.apply_binary(&op) {
                return false;
            }
        }
        true
    }

    fn eval_additive(&mut self) -> bool {
        if !self.eval_multiplicative() {
            return false;
        }
        while self.peek_is(TokenKind::BinaryOp, &["+", "-"]) {
            let op = self.advance();
            if !self.eval_multiplicative() {
                return false;
            }
            if !self.apply_binary(&op) {
                return false;
            }
        }
        true
    }

    fn eval_multiplicative(&mut self) -> bool {
        if !self.eval_unary() {
            return false;
        }
        while self.peek_is(TokenKind::BinaryOp, &["*", "/"]) {
            let op = self.advance();
            if !self.eval_unary() {
                return false;
            }
            if !self.apply_binary(&op) {
                return false;
            }
        }
        true
    }

    fn eval_unary(&mut self) -> bool {
        if self.peek_is(TokenKind::BinaryOp, &["+", "-"]) || self.peek_kind() == Some(TokenKind::Not)
        {
            let op = self.advance();
            if !self.eval_primary() {
                return false;
            }
            let v = match self.stack.pop() {
                Some(v) => v,
                None => {
                    return self.error(EvalError::runtime(
                        "internal error: evaluation stack underflow",
                        &op,
                    ));
                }
            };
            let result = match op.text.as_str() {
                "+" => Operand::num(v.value.num_value(), op.offset),
                "-" => Operand::num(-v.value.num_value(), op.offset),
                _ => Operand::bool(!v.value.is_truthy(), op.offset),
            };
            self.stack.push(result);
            true
        } else {
            self.eval_primary()
        }
    }

    fn eval_primary(&mut self) -> bool {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return self.end_error("unterminated expression"),
        };
        match token.kind {
            TokenKind::Number => {
                self.pos += 1;
                match token.text.parse::<f64>() {
                    Ok(n) => {
                        self.stack.push(Operand::num(n, token.offset));
                        true
                    }
                    Err(_) => self.error(EvalError::syntax("malformed number", &token)),
                }
            }
            TokenKind::DqString => {
                self.pos += 1;
                self.stack.push(Operand::new(
                    Value::Str(token.text.clone()),
                    Origin::DqString,
                    token.offset,
                ));
                true
            }
            TokenKind::SqString => {
                self.pos += 1;
                self.stack.push(Operand::new(
                    Value::Str(token.text.clone()),
                    Origin::SqString,
                    token.offset,
                ));
                true
            }
            TokenKind::LParen => {
                self.pos += 1;
                if !self.eval_expressions() {
                    return false;
                }
                if self.peek_kind() == Some(TokenKind::RParen) {
                    self.pos += 1;
                    true
                } else {
                    self.error(EvalError::syntax("unbalanced parentheses", &token))
                }
            }
            TokenKind::Word
                if self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::LParen) =>
            {
                self.eval_function(token)
            }
            TokenKind::Word | TokenKind::Sgqa => {
                self.pos += 1;
                self.read_variable(&token)
            }
            _ => {
                self.pos += 1;
                self.error(EvalError::syntax("unexpected token", &token))
            }
        }
    }

    fn eval_function(&mut self, name_tok: Token) -> bool {
        let spec = match self.lookup_function(&name_tok.text) {
            Some(spec) => spec,
            None => {
                self.pos += 1;
                return self.error(EvalError::syntax("undefined function", &name_tok));
            }
        };
        self.pos += 2; // name and '('

        let mut args: Vec<Operand> = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                if !self.eval_expression() {
                    return false;
                }
                match self.stack.pop() {
                    Some(v) => args.push(v),
                    None => {
                        return self.error(EvalError::runtime(
                            "internal error: evaluation stack underflow",
                            &name_tok,
                        ));
                    }
                }
                match self.peek_kind() {
                    Some(TokenKind::Comma) => {
                        self.pos += 1;
                    }
                    Some(TokenKind::RParen) => break,
                    Some(_) => {
                        let t = self.advance();
                        return self.error(EvalError::syntax(
                            "expected ',' or ')' between arguments",
                            &t,
                        ));
                    }
                    None => {
                        return self.error(EvalError::syntax("unbalanced parentheses", &name_tok));
                    }
                }
            }
        }
        self.pos += 1; // ')'

        match functions::dispatch(&spec, &args, self.parse_only) {
            Ok(v) => {
                self.stack.push(Operand::from_result(v, name_tok.offset));
                true
            }
            Err(DispatchError::Arity(msg)) => self.error(EvalError::arity(msg, &name_tok)),
            Err(DispatchError::Runtime(msg)) => self.error(EvalError::runtime(msg, &name_tok)),
        }
    }

    fn read_variable(&mut self, token: &Token) -> bool {
        let name = token.text.as_str();
        self.vars_used.insert(name.to_string());
        let (root, attr) = split_attr(name);

        let outcome = match attr {
            // NAOK reads skip the relevance gate.
            Some(VarAttr::Naok) | Some(VarAttr::ValueNaok) => {
                self.vars
                    .read(root, None, None, self.group_seq, self.question_seq)
            }
            Some(a) => self
                .vars
                .read(root, Some(a), None, self.group_seq, self.question_seq),
            None => {
                match self.vars.read(
                    root,
                    Some(VarAttr::RelevanceStatus),
                    None,
                    self.group_seq,
                    self.question_seq,
                ) {
                    Err(e) => Err(e),
                    Ok(status) if !status.is_truthy() => {
                        // Hidden element: the read yields an opaque null,
                        // not a zero.
                        self.stack
                            .push(Operand::new(Value::Null, Origin::Number, token.offset));
                        return true;
                    }
                    Ok(_) => self
                        .vars
                        .read(root, None, None, self.group_seq, self.question_seq),
                }
            }
        };

        match outcome {
            Err(_) => self.error(EvalError::syntax("undefined variable", token)),
            Ok(v) => {
                let only_num = self
                    .vars
                    .read(
                        root,
                        Some(VarAttr::Onlynum),
                        None,
                        self.group_seq,
                        self.question_seq,
                    )
                    .map(|v| v.is_truthy())
                    .unwrap_or(false);
                let origin = if only_num { Origin::Number } else { Origin::Word };
                self.stack.push(Operand::new(v, origin, token.offset));
                true
            }
        }
    }

    fn assign_variable(&mut self, target: &Token) -> bool {
        let (root, attr) = split_attr(&target.text);
        if !matches!(attr, None | Some(VarAttr::Naok)) {
            return self.error(EvalError::type_error(
                "only variables may be assigned",
                target,
            ));
        }

        let read_write = match self.vars.read(
            root,
            Some(VarAttr::ReadWrite),
            None,
            self.group_seq,
            self.question_seq,
        ) {
            Ok(v) => v,
            Err(_) => return self.error(EvalError::syntax("undefined variable", target)),
        };
        if read_write.as_text() != "Y" {
            return self.error(EvalError::type_error(
                format!("variable '{}' is read-only", root),
                target,
            ));
        }

        if self.parse_only {
            // The assigned value is already on the stack.
            return true;
        }
        let value = match self.stack.pop() {
            Some(v) => v,
            None => {
                return self.error(EvalError::runtime(
                    "internal error: evaluation stack underflow",
                    target,
                ));
            }
        };
        match self.vars.write(AssignOp::Assign, root, &value.value) {
            Ok(stored) => {
                self.stack.push(Operand::from_result(stored, target.offset));
                true
            }
            Err(msg) => self.error(EvalError::runtime(msg, target)),
        }
    }

    fn apply_binary(&mut self, op: &Token) -> bool {
        let (a, b) = match self.pop2(op) {
            Some(pair) => pair,
            None => return false,
        };
        let offset = op.offset;
        let result = match op.text.as_str() {
            "||" | "or" => Operand::bool(a.value.is_truthy() || b.value.is_truthy(), offset),
            "&&" | "and" => Operand::bool(a.value.is_truthy() && b.value.is_truthy(), offset),
            "==" | "eq" => Operand::bool(value::loose_eq(&a, &b), offset),
            "!=" | "ne" => Operand::bool(!value::loose_eq(&a, &b), offset),
            "<" | "lt" => Operand::bool(value::ordered_cmp(&a, &b, CmpOp::Lt), offset),
            "<=" | "le" => Operand::bool(value::ordered_cmp(&a, &b, CmpOp::Le), offset),
            ">" | "gt" => Operand::bool(value::ordered_cmp(&a, &b, CmpOp::Gt), offset),
            ">=" | "ge" => Operand::bool(value::ordered_cmp(&a, &b, CmpOp::Ge), offset),
            "+" => Operand::from_result(value::add(&a, &b), offset),
            "-" => Operand::from_result(value::arith(&a, &b, '-'), offset),
            "*" => Operand::from_result(value::arith(&a, &b, '*'), offset),
            "/" => Operand::from_result(value::arith(&a, &b, '/'), offset),
            _ => return self.error(EvalError::syntax("unknown operator", op)),
        };
        self.stack.push(result);
        true
    }
}
