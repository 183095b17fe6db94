//! Expansion of `self` / `that` pseudo-references.
//!
//! Before an expression is lexed, references like `self.nocomments.NAOK` or
//! `that.q2.sq_1` are rewritten into a comma-separated list of concrete
//! variable names, one per matching answer field of the target question.
//! Sub-segments filter the field list:
//!
//! | segment        | effect                                               |
//! |----------------|------------------------------------------------------|
//! | `comments`     | keep only fields whose name ends in `comment`        |
//! | `nocomments`   | drop fields whose name ends in `comment`             |
//! | `sq_<regex>`   | keep fields whose suffix past the SGQA prefix matches|
//! | `nosq_<regex>` | drop fields whose suffix matches                     |
//!
//! A trailing attribute from the allowed set is appended to every expanded
//! name. Anything unrecognized invalidates the reference and the original
//! text is left untouched, as is a reference to an unknown question. Quoted
//! strings inside the expression are never rewritten.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::resolver::{QuestionResolver, VarAttr};

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:self|that\.[A-Za-z0-9_]+)(?:\.[A-Za-z0-9_]+)*\b").expect("reference pattern")
});

/// Rewrites pseudo-references, memoizing each distinct reference for the
/// duration of one host call (`clear` resets between calls).
#[derive(Debug, Default)]
pub struct ReferenceExpander {
    cache: HashMap<String, String>,
}

impl ReferenceExpander {
    pub fn new() -> Self {
        ReferenceExpander::default()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Expand every pseudo-reference outside of quoted strings.
    pub fn expand(&mut self, src: &str, questions: &dyn QuestionResolver) -> String {
        if !src.contains("self") && !src.contains("that.") {
            return src.to_string();
        }

        let mut out = String::with_capacity(src.len());
        let mut run = String::new();
        let chars: Vec<char> = src.chars().collect();
        let mut i = 0usize;

        while i < chars.len() {
            let c = chars[i];
            if c == '\'' || c == '"' {
                out.push_str(&self.expand_run(&run, questions));
                run.clear();
                // Copy the quoted literal verbatim, honoring escapes.
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let q = chars[i];
                    if q == '\\' && i + 1 < chars.len() {
                        out.push('\\');
                        out.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    out.push(q);
                    i += 1;
                    if q == c {
                        break;
                    }
                }
            } else {
                run.push(c);
                i += 1;
            }
        }
        out.push_str(&self.expand_run(&run, questions));
        out
    }

    fn expand_run(&mut self, run: &str, questions: &dyn QuestionResolver) -> String {
        REFERENCE
            .replace_all(run, |caps: &regex::Captures<'_>| {
                self.resolve(&caps[0], questions)
            })
            .into_owned()
    }

    fn resolve(&mut self, reference: &str, questions: &dyn QuestionResolver) -> String {
        if let Some(hit) = self.cache.get(reference) {
            return hit.clone();
        }
        let expansion =
            resolve_reference(reference, questions).unwrap_or_else(|| reference.to_string());
        self.cache.insert(reference.to_string(), expansion.clone());
        expansion
    }
}

/// Resolve one reference; `None` means "leave the original text alone".
fn resolve_reference(reference: &str, questions: &dyn QuestionResolver) -> Option<String> {
    let mut parts = reference.split('.');
    let root = parts.next()?;
    let question = match root {
        "self" => questions.current()?,
        "that" => questions.by_code(parts.next()?)?,
        _ => return None,
    };

    let mut fields = question.fields.clone();
    let mut attr: Option<&str> = None;
    let rest: Vec<&str> = parts.collect();

    for (idx, seg) in rest.iter().enumerate() {
        match *seg {
            "comments" => fields.retain(|f| f.name.ends_with("comment")),
            "nocomments" => fields.retain(|f| !f.name.ends_with("comment")),
            s if s.starts_with("sq_") => match Regex::new(&s[3..]) {
                Ok(re) => fields.retain(|f| re.is_match(field_suffix(&f.name, &question.sgqa))),
                // An uncompilable filter matches nothing.
                Err(_) => fields.clear(),
            },
            s if s.starts_with("nosq_") => {
                if let Ok(re) = Regex::new(&s[5..]) {
                    fields.retain(|f| !re.is_match(field_suffix(&f.name, &question.sgqa)));
                }
            }
            s if idx == rest.len() - 1 && VarAttr::from_name(s).is_some() => attr = Some(s),
            _ => return None,
        }
    }

    let names: Vec<String> = fields
        .iter()
        .map(|f| match attr {
            Some(a) => format!("{}.{}", f.name, a),
            None => f.name.clone(),
        })
        .collect();
    Some(names.join(","))
}

fn field_suffix<'a>(field_name: &'a str, sgqa: &str) -> &'a str {
    field_name.strip_prefix(sgqa).unwrap_or(field_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Question, SimpleQuestions};

    fn questions() -> SimpleQuestions {
        let mut qs = SimpleQuestions::new();
        qs.define(
            "q1",
            Question::new(
                "123X4X5",
                &[
                    ("q1_1", "1"),
                    ("q1_2", "2"),
                    ("q1_1comment", "1comment"),
                ],
            ),
        );
        qs.define(
            "grid",
            Question::new(
                "123X4X6",
                &[
                    ("123X4X6a1", "a1"),
                    ("123X4X6a2", "a2"),
                    ("123X4X6b1", "b1"),
                ],
            ),
        );
        qs.set_current("q1");
        qs
    }

    fn expand(src: &str) -> String {
        ReferenceExpander::new().expand(src, &questions())
    }

    #[test]
    fn self_expands_to_all_fields() {
        assert_eq!(expand("count(self)"), "count(q1_1,q1_2,q1_1comment)");
    }

    #[test]
    fn nocomments_filter_with_attribute() {
        assert_eq!(expand("self.nocomments.NAOK"), "q1_1.NAOK,q1_2.NAOK");
        assert_eq!(expand("self.comments"), "q1_1comment");
    }

    #[test]
    fn that_reference_with_sq_filters() {
        assert_eq!(expand("sum(that.grid.sq_a)"), "sum(123X4X6a1,123X4X6a2)");
        assert_eq!(expand("sum(that.grid.nosq_a)"), "sum(123X4X6b1)");
        assert_eq!(expand("that.grid.sq_1$"), "123X4X6a1,123X4X6b1");
    }

    #[test]
    fn unknown_question_left_unchanged() {
        assert_eq!(expand("that.missing.NAOK"), "that.missing.NAOK");
    }

    #[test]
    fn invalid_segment_left_unchanged() {
        assert_eq!(expand("self.bogus_filter"), "self.bogus_filter");
    }

    #[test]
    fn self_without_current_question_left_unchanged() {
        let qs = SimpleQuestions::new();
        assert_eq!(ReferenceExpander::new().expand("self", &qs), "self");
    }

    #[test]
    fn quoted_text_is_never_rewritten() {
        assert_eq!(
            expand("'self' + self.comments"),
            "'self' + q1_1comment"
        );
        assert_eq!(expand("\"that.grid\""), "\"that.grid\"");
    }

    #[test]
    fn words_containing_self_are_untouched() {
        assert_eq!(expand("myself"), "myself");
        assert_eq!(expand("selfie"), "selfie");
    }

    #[test]
    fn empty_sq_pattern_keeps_every_field() {
        assert_eq!(expand("count(self.sq_)"), "count(q1_1,q1_2,q1_1comment)");
    }

    #[test]
    fn cache_survives_within_one_expander() {
        let qs = questions();
        let mut ex = ReferenceExpander::new();
        assert_eq!(ex.expand("self.comments", &qs), "q1_1comment");
        // A second expansion of the same reference is served from the cache
        // even if the resolver would now answer differently.
        let mut changed = qs.clone();
        changed.define("q1", Question::new("123X4X5", &[("other", "o")]));
        assert_eq!(ex.expand("self.comments", &changed), "q1_1comment");
        ex.clear();
        assert_eq!(ex.expand("self.comments", &changed), "");
    }
}
