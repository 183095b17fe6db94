//! Injected collaborators: variable and question resolution.
//!
//! The engine never owns survey data. Reads and writes go through
//! [`VariableResolver`]; `self`/`that` expansion asks a [`QuestionResolver`]
//! for question metadata. Hosts implement these against their data model;
//! [`SimpleVars`] and [`SimpleQuestions`] are in-memory implementations for
//! tests, the REPL, and hosts without a survey store.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// The attribute suffixes a variable reference may carry (`q1.NAOK`,
/// `q1.shown`, …) plus `onlynum`, which is only queried internally and is
/// not part of the reference grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarAttr {
    Code,
    Gid,
    Grelevance,
    Gseq,
    JsName,
    Mandatory,
    Naok,
    Qid,
    Qseq,
    Question,
    ReadWrite,
    RelevanceStatus,
    Relevance,
    Rowdivid,
    Sgqa,
    Shown,
    Type,
    ValueNaok,
    Value,
    /// Internal: forces NUMBER origin on reads. Not lexable.
    Onlynum,
}

impl VarAttr {
    /// Lexable attribute names, in the order the tokenizer's alternation
    /// tries them. `relevanceStatus` must precede `relevance` and
    /// `valueNAOK` must precede `value` (prefix pairs).
    pub const NAMES: &'static [&'static str] = &[
        "code",
        "gid",
        "grelevance",
        "gseq",
        "jsName",
        "mandatory",
        "NAOK",
        "qid",
        "qseq",
        "question",
        "readWrite",
        "relevanceStatus",
        "relevance",
        "rowdivid",
        "sgqa",
        "shown",
        "type",
        "valueNAOK",
        "value",
    ];

    pub fn from_name(name: &str) -> Option<VarAttr> {
        Some(match name {
            "code" => VarAttr::Code,
            "gid" => VarAttr::Gid,
            "grelevance" => VarAttr::Grelevance,
            "gseq" => VarAttr::Gseq,
            "jsName" => VarAttr::JsName,
            "mandatory" => VarAttr::Mandatory,
            "NAOK" => VarAttr::Naok,
            "qid" => VarAttr::Qid,
            "qseq" => VarAttr::Qseq,
            "question" => VarAttr::Question,
            "readWrite" => VarAttr::ReadWrite,
            "relevanceStatus" => VarAttr::RelevanceStatus,
            "relevance" => VarAttr::Relevance,
            "rowdivid" => VarAttr::Rowdivid,
            "sgqa" => VarAttr::Sgqa,
            "shown" => VarAttr::Shown,
            "type" => VarAttr::Type,
            "valueNAOK" => VarAttr::ValueNaok,
            "value" => VarAttr::Value,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            VarAttr::Code => "code",
            VarAttr::Gid => "gid",
            VarAttr::Grelevance => "grelevance",
            VarAttr::Gseq => "gseq",
            VarAttr::JsName => "jsName",
            VarAttr::Mandatory => "mandatory",
            VarAttr::Naok => "NAOK",
            VarAttr::Qid => "qid",
            VarAttr::Qseq => "qseq",
            VarAttr::Question => "question",
            VarAttr::ReadWrite => "readWrite",
            VarAttr::RelevanceStatus => "relevanceStatus",
            VarAttr::Relevance => "relevance",
            VarAttr::Rowdivid => "rowdivid",
            VarAttr::Sgqa => "sgqa",
            VarAttr::Shown => "shown",
            VarAttr::Type => "type",
            VarAttr::ValueNaok => "valueNAOK",
            VarAttr::Value => "value",
            VarAttr::Onlynum => "onlynum",
        }
    }
}

/// Assignment forms accepted by the write-through channel. Only `=` is
/// reachable from expression text; the compound forms exist for hosts that
/// drive the channel directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    PlusAssign,
    MinusAssign,
    MulAssign,
    DivAssign,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::PlusAssign => "+=",
            AssignOp::MinusAssign => "-=",
            AssignOp::MulAssign => "*=",
            AssignOp::DivAssign => "/=",
        }
    }
}

/// Variable store interface.
///
/// `read` with `attr = None` returns the stored value; with an attribute it
/// returns that attribute. Both error (with a host message) when the
/// variable is unknown. `write` applies the assignment and returns the
/// canonical stored value, which is what subsequent reads observe.
pub trait VariableResolver {
    fn read(
        &self,
        name: &str,
        attr: Option<VarAttr>,
        default: Option<&Value>,
        group_seq: i32,
        question_seq: i32,
    ) -> Result<Value, String>;

    fn write(&mut self, op: AssignOp, name: &str, value: &Value) -> Result<Value, String>;
}

/// One answer field of a question (`name` is the full SGQA field name,
/// `code` the author-facing code).
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionField {
    pub name: String,
    pub code: String,
}

/// Question metadata consumed by `self`/`that` expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub sgqa: String,
    pub fields: Vec<QuestionField>,
}

impl Question {
    /// Convenience constructor from `(name, code)` pairs.
    pub fn new(sgqa: &str, fields: &[(&str, &str)]) -> Self {
        Question {
            sgqa: sgqa.to_string(),
            fields: fields
                .iter()
                .map(|(name, code)| QuestionField {
                    name: (*name).to_string(),
                    code: (*code).to_string(),
                })
                .collect(),
        }
    }
}

/// Question lookup interface. `current` is the question whose template is
/// being rendered; it anchors bare `self` references.
pub trait QuestionResolver {
    fn by_code(&self, code: &str) -> Option<Question>;
    fn current(&self) -> Option<Question>;
}

// ── In-memory implementations ───────────────────────────────────────────────

/// One variable in a [`SimpleVars`] store.
#[derive(Debug, Clone)]
pub struct VarRecord {
    pub value: Value,
    pub read_write: bool,
    pub relevant: bool,
    pub only_num: bool,
    /// Extra attributes by lexable name (`qid`, `sgqa`, …).
    pub attrs: HashMap<String, String>,
}

impl VarRecord {
    pub fn new(value: impl Into<Value>) -> Self {
        VarRecord {
            value: value.into(),
            read_write: false,
            relevant: true,
            only_num: false,
            attrs: HashMap::new(),
        }
    }

    pub fn writable(mut self) -> Self {
        self.read_write = true;
        self
    }

    pub fn irrelevant(mut self) -> Self {
        self.relevant = false;
        self
    }

    pub fn numeric_only(mut self) -> Self {
        self.only_num = true;
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }
}

/// HashMap-backed variable store.
#[derive(Debug, Clone, Default)]
pub struct SimpleVars {
    vars: HashMap<String, VarRecord>,
}

impl SimpleVars {
    pub fn new() -> Self {
        SimpleVars::default()
    }

    /// Define a writable variable (the common case for tests and the REPL).
    pub fn define(&mut self, name: &str, value: impl Into<Value>) {
        self.vars
            .insert(name.to_string(), VarRecord::new(value).writable());
    }

    pub fn define_record(&mut self, name: &str, record: VarRecord) {
        self.vars.insert(name.to_string(), record);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name).map(|r| &r.value)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl VariableResolver for SimpleVars {
    fn read(
        &self,
        name: &str,
        attr: Option<VarAttr>,
        default: Option<&Value>,
        _group_seq: i32,
        _question_seq: i32,
    ) -> Result<Value, String> {
        let rec = self
            .vars
            .get(name)
            .ok_or_else(|| format!("unknown variable '{}'", name))?;
        match attr {
            None | Some(VarAttr::Value) | Some(VarAttr::Naok) | Some(VarAttr::ValueNaok) => {
                Ok(rec.value.clone())
            }
            Some(VarAttr::ReadWrite) => Ok(Value::Str(
                if rec.read_write { "Y" } else { "N" }.to_string(),
            )),
            Some(VarAttr::RelevanceStatus) => {
                Ok(Value::Num(if rec.relevant { 1.0 } else { 0.0 }))
            }
            Some(VarAttr::Onlynum) => Ok(Value::Num(if rec.only_num { 1.0 } else { 0.0 })),
            Some(VarAttr::Shown) => Ok(Value::Str(rec.value.as_text())),
            Some(a) => match rec.attrs.get(a.name()) {
                Some(s) => Ok(Value::Str(s.clone())),
                None => default.cloned().ok_or_else(|| {
                    format!("variable '{}' has no attribute '{}'", name, a.name())
                }),
            },
        }
    }

    fn write(&mut self, op: AssignOp, name: &str, value: &Value) -> Result<Value, String> {
        let rec = self
            .vars
            .get_mut(name)
            .ok_or_else(|| format!("unknown variable '{}'", name))?;
        if !rec.read_write {
            return Err(format!("variable '{}' is read-only", name));
        }
        let current = rec.value.num_value();
        let stored = match op {
            AssignOp::Assign => value.clone(),
            AssignOp::PlusAssign => Value::Num(current + value.num_value()),
            AssignOp::MinusAssign => Value::Num(current - value.num_value()),
            AssignOp::MulAssign => Value::Num(current * value.num_value()),
            AssignOp::DivAssign => {
                let d = value.num_value();
                Value::Num(if d == 0.0 { f64::NAN } else { current / d })
            }
        };
        rec.value = stored.clone();
        Ok(stored)
    }
}

// Shared handle so tests and the REPL can inspect the store after the
// engine (which owns a Box<dyn VariableResolver>) has written through it.
impl VariableResolver for Rc<RefCell<SimpleVars>> {
    fn read(
        &self,
        name: &str,
        attr: Option<VarAttr>,
        default: Option<&Value>,
        group_seq: i32,
        question_seq: i32,
    ) -> Result<Value, String> {
        self.borrow().read(name, attr, default, group_seq, question_seq)
    }

    fn write(&mut self, op: AssignOp, name: &str, value: &Value) -> Result<Value, String> {
        self.borrow_mut().write(op, name, value)
    }
}

/// HashMap-backed question store.
#[derive(Debug, Clone, Default)]
pub struct SimpleQuestions {
    questions: HashMap<String, Question>,
    current: Option<String>,
}

impl SimpleQuestions {
    pub fn new() -> Self {
        SimpleQuestions::default()
    }

    pub fn define(&mut self, code: &str, question: Question) {
        self.questions.insert(code.to_string(), question);
    }

    /// Mark the question whose template is being rendered (`self` target).
    pub fn set_current(&mut self, code: &str) {
        self.current = Some(code.to_string());
    }
}

impl QuestionResolver for SimpleQuestions {
    fn by_code(&self, code: &str) -> Option<Question> {
        self.questions.get(code).cloned()
    }

    fn current(&self) -> Option<Question> {
        self.current.as_ref().and_then(|c| self.by_code(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_vars_read_value_and_attributes() {
        let mut vars = SimpleVars::new();
        vars.define("age", 30i64);
        vars.define_record(
            "hidden",
            VarRecord::new("x").irrelevant().with_attr("qid", "12"),
        );

        assert_eq!(vars.read("age", None, None, -1, -1), Ok(Value::Num(30.0)));
        assert_eq!(
            vars.read("age", Some(VarAttr::ReadWrite), None, -1, -1),
            Ok(Value::Str("Y".into()))
        );
        assert_eq!(
            vars.read("hidden", Some(VarAttr::RelevanceStatus), None, -1, -1),
            Ok(Value::Num(0.0))
        );
        assert_eq!(
            vars.read("hidden", Some(VarAttr::Qid), None, -1, -1),
            Ok(Value::Str("12".into()))
        );
        assert!(vars.read("missing", None, None, -1, -1).is_err());
    }

    #[test]
    fn attribute_default_is_used_when_absent() {
        let mut vars = SimpleVars::new();
        vars.define("a", 1i64);
        let fallback = Value::Str("default".into());
        assert_eq!(
            vars.read("a", Some(VarAttr::Mandatory), Some(&fallback), -1, -1),
            Ok(fallback.clone())
        );
        assert!(vars.read("a", Some(VarAttr::Mandatory), None, -1, -1).is_err());
    }

    #[test]
    fn write_through_respects_read_write_flag() {
        let mut vars = SimpleVars::new();
        vars.define("a", 1i64);
        vars.define_record("b", VarRecord::new(1i64));

        assert_eq!(
            vars.write(AssignOp::Assign, "a", &Value::Num(5.0)),
            Ok(Value::Num(5.0))
        );
        assert_eq!(vars.get("a"), Some(&Value::Num(5.0)));
        assert!(vars.write(AssignOp::Assign, "b", &Value::Num(5.0)).is_err());
    }

    #[test]
    fn compound_assignment_forms() {
        let mut vars = SimpleVars::new();
        vars.define("n", 10i64);
        assert_eq!(
            vars.write(AssignOp::PlusAssign, "n", &Value::Num(4.0)),
            Ok(Value::Num(14.0))
        );
        assert_eq!(
            vars.write(AssignOp::DivAssign, "n", &Value::Num(7.0)),
            Ok(Value::Num(2.0))
        );
        assert!(matches!(
            vars.write(AssignOp::DivAssign, "n", &Value::Num(0.0)),
            Ok(Value::Num(n)) if n.is_nan()
        ));
    }

    #[test]
    fn shared_handle_delegates() {
        let shared = Rc::new(RefCell::new(SimpleVars::new()));
        shared.borrow_mut().define("x", 1i64);
        let mut handle = Rc::clone(&shared);
        handle.write(AssignOp::Assign, "x", &Value::Num(9.0)).unwrap();
        assert_eq!(shared.borrow().get("x"), Some(&Value::Num(9.0)));
    }

    #[test]
    fn question_lookup_and_current() {
        let mut qs = SimpleQuestions::new();
        qs.define(
            "q1",
            Question::new("123X4X5", &[("123X4X5a", "a"), ("123X4X5b", "b")]),
        );
        assert!(qs.by_code("q1").is_some());
        assert!(qs.by_code("q2").is_none());
        assert!(qs.current().is_none());
        qs.set_current("q1");
        assert_eq!(qs.current().unwrap().sgqa, "123X4X5");
    }

    #[test]
    fn attr_names_round_trip() {
        for name in VarAttr::NAMES {
            let attr = VarAttr::from_name(name).expect("lexable attr must parse");
            assert_eq!(attr.name(), *name);
        }
        assert_eq!(VarAttr::from_name("onlynum"), None);
    }
}
