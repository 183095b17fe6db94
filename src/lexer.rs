//! Regex tokenizer for the expression language.
//!
//! One composite pattern splits the source into contiguous fragments
//! (preserving offsets); each fragment is then classified by testing an
//! ordered list of anchored patterns; first match wins. The order is
//! load-bearing: it is what makes `and`, `lt`, `eq` operators instead of
//! variable names, and SGQA codes like `123X4X9a` a single token instead of
//! a number followed by a word.
//!
//! Classification order: quoted strings, whitespace, punctuation, and/or,
//! comparisons, SGQA codes, words, numbers, `!`, `++`/`--`, `=`, `+ - * /`,
//! catch-all.
//!
//! Quoted strings are unquoted after classification (`\"` → `"`, `\'` → `'`,
//! `\\` → `\`). Whitespace tokens are dropped unless the caller asks for
//! edit-mode tokenization.

use std::sync::LazyLock;

use regex::Regex;

use crate::resolver::VarAttr;

/// Token classification. `Other` marks an unrecognized lexeme and is a
/// syntax error when evaluation reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    SqString,
    DqString,
    Word,
    Sgqa,
    LParen,
    RParen,
    Comma,
    Assign,
    BinaryOp,
    Compare,
    AndOr,
    Not,
    Space,
    Other,
}

/// One lexed token: kind, unquoted text, 0-based character offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

// Pattern sources, in classification order. Punctuation is refined to
// LParen/RParen/Comma from the lexeme afterwards.
const DQ_STRING: &str = r#""(?:\\.|[^"\\])*""#;
const SQ_STRING: &str = r"'(?:\\.|[^'\\])*'";
const WHITESPACE: &str = r"\s+";
const PUNCT: &str = r"[(),]";
const AND_OR: &str = r"&&|\|\||\band\b|\bor\b";
const COMPARE: &str = r"<=|<|>=|>|==|!=|\ble\b|\blt\b|\bge\b|\bgt\b|\beq\b|\bne\b";
const WORD: &str = r"(?:TOKEN:)?[A-Za-z][A-Za-z0-9_]*(?:\.[A-Za-z][A-Za-z0-9_]*)*";
const NUMBER: &str = r"[0-9]+(?:\.[0-9]*)?|\.[0-9]+";
const NOT: &str = r"!";
const INC_DEC: &str = r"\+\+|--";
const ASSIGN: &str = r"=";
const BINARY_OP: &str = r"[+*/-]";
const ANY: &str = r"(?s).";

fn sgqa_pattern() -> String {
    // SID X GID X QID [sub][#][01], optional INSERTANS: prefix, optional
    // trailing attribute from the allowed set.
    format!(
        r"(?:INSERTANS:)?[0-9]+X[0-9]+X[0-9]+[A-Z0-9_]*#?[01]?(?:\.(?:{}))?",
        VarAttr::NAMES.join("|")
    )
}

struct Classifier {
    patterns: Vec<(Regex, TokenKind)>,
    composite: Regex,
}

static CLASSIFIER: LazyLock<Classifier> = LazyLock::new(|| {
    let sgqa = sgqa_pattern();
    let ordered: Vec<(&str, TokenKind)> = vec![
        (DQ_STRING, TokenKind::DqString),
        (SQ_STRING, TokenKind::SqString),
        (WHITESPACE, TokenKind::Space),
        (PUNCT, TokenKind::LParen),
        (AND_OR, TokenKind::AndOr),
        (COMPARE, TokenKind::Compare),
        (sgqa.as_str(), TokenKind::Sgqa),
        (WORD, TokenKind::Word),
        (NUMBER, TokenKind::Number),
        (NOT, TokenKind::Not),
        (INC_DEC, TokenKind::Other),
        (ASSIGN, TokenKind::Assign),
        (BINARY_OP, TokenKind::BinaryOp),
        (ANY, TokenKind::Other),
    ];

    let composite = Regex::new(
        &ordered
            .iter()
            .map(|(p, _)| format!("(?:{})", p))
            .collect::<Vec<_>>()
            .join("|"),
    )
    .expect("composite token pattern must compile");

    let patterns = ordered
        .into_iter()
        .map(|(p, kind)| {
            let anchored = Regex::new(&format!("^(?:{})$", p)).expect("token pattern must compile");
            (anchored, kind)
        })
        .collect();

    Classifier {
        patterns,
        composite,
    }
});

fn classify(fragment: &str) -> TokenKind {
    for (pattern, kind) in &CLASSIFIER.patterns {
        if pattern.is_match(fragment) {
            if *kind == TokenKind::LParen {
                return match fragment {
                    "(" => TokenKind::LParen,
                    ")" => TokenKind::RParen,
                    _ => TokenKind::Comma,
                };
            }
            return *kind;
        }
    }
    TokenKind::Other
}

/// Strip the surrounding quotes and resolve the escape sequences the
/// language defines; any other backslash pair is kept verbatim.
fn unquote(fragment: &str) -> String {
    let inner: Vec<char> = fragment.chars().collect();
    let inner = &inner[1..inner.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == '\\' && i + 1 < inner.len() {
            match inner[i + 1] {
                '"' => out.push('"'),
                '\'' => out.push('\''),
                '\\' => out.push('\\'),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            i += 2;
        } else {
            out.push(inner[i]);
            i += 1;
        }
    }
    out
}

/// Tokenize an expression. With `edit_mode` the whitespace tokens are kept
/// so offsets can be mapped back onto the author's text.
pub fn tokenize(src: &str, edit_mode: bool) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut char_offset = 0usize;

    // The composite pattern's final `.` alternative matches any character,
    // so the matches tile the input with no gaps.
    for m in CLASSIFIER.composite.find_iter(src) {
        let fragment = m.as_str();
        let kind = classify(fragment);
        let len = fragment.chars().count();

        if kind == TokenKind::Space && !edit_mode {
            char_offset += len;
            continue;
        }

        let text = match kind {
            TokenKind::DqString | TokenKind::SqString => unquote(fragment),
            _ => fragment.to_string(),
        };

        tokens.push(Token {
            kind,
            text,
            offset: char_offset,
        });
        char_offset += len;
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src, false).iter().map(|t| t.kind).collect()
    }

    fn texts(src: &str) -> Vec<String> {
        tokenize(src, false).iter().map(|t| t.text.clone()).collect()
    }

    #[test]
    fn classification_order_table() {
        use TokenKind::*;
        // (source, expected kinds), pinned because parsing depends on it.
        let cases: Vec<(&str, Vec<TokenKind>)> = vec![
            ("1+2", vec![Number, BinaryOp, Number]),
            ("1.5*.5", vec![Number, BinaryOp, Number]),
            ("a and b", vec![Word, AndOr, Word]),
            ("a&&b||c", vec![Word, AndOr, Word, AndOr, Word]),
            ("1 lt 2", vec![Number, Compare, Number]),
            ("1<=2", vec![Number, Compare, Number]),
            ("a==b", vec![Word, Compare, Word]),
            ("a = 5", vec![Word, Assign, Number]),
            ("a != b", vec![Word, Compare, Word]),
            ("!x", vec![Not, Word]),
            ("f(x,y)", vec![Word, LParen, Word, Comma, Word, RParen]),
            ("'a'+\"b\"", vec![SqString, BinaryOp, DqString]),
            ("123X4X9", vec![Sgqa]),
            ("123X4X9a1.NAOK", vec![Sgqa]),
            ("INSERTANS:123X4X9", vec![Sgqa]),
            ("TOKEN:FIRSTNAME", vec![Word]),
            ("q1.shown", vec![Word]),
            // Aliases only match on word boundaries.
            ("flt(1)", vec![Word, LParen, Number, RParen]),
            ("android", vec![Word]),
            // Reserved increment/decrement stay unrecognized.
            ("a++", vec![Word, Other]),
            ("a--b", vec![Word, Other, Word]),
            // Catch-all for anything else.
            ("@", vec![Other]),
            ("a.", vec![Word, Other]),
        ];
        for (src, expected) in cases {
            assert_eq!(kinds(src), expected, "token kinds of {:?}", src);
        }
    }

    #[test]
    fn sgqa_wins_over_number_and_word() {
        let toks = tokenize("12X34X56a#1", false);
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Sgqa);
        assert_eq!(toks[0].text, "12X34X56a#1");
    }

    #[test]
    fn strings_are_unquoted() {
        assert_eq!(texts(r#""a\"b""#), vec!["a\"b"]);
        assert_eq!(texts(r"'it\'s'"), vec!["it's"]);
        assert_eq!(texts(r#""back\\slash""#), vec!["back\\slash"]);
        // Unknown escapes stay verbatim.
        assert_eq!(texts(r#""a\nb""#), vec!["a\\nb"]);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let toks = tokenize("\"abc", false);
        assert_eq!(toks[0].kind, TokenKind::Other);
        assert_eq!(toks[0].text, "\"");
    }

    #[test]
    fn offsets_are_character_based_and_monotonic() {
        let toks = tokenize("ä + 'öü'", false);
        assert_eq!(toks[0].offset, 0); // ä
        assert_eq!(toks[1].offset, 2); // +
        assert_eq!(toks[2].offset, 4); // 'öü'
        for pair in toks.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
    }

    #[test]
    fn edit_mode_keeps_spaces() {
        let plain = tokenize("1 + 2", false);
        assert_eq!(plain.len(), 3);
        let edit = tokenize("1 + 2", true);
        assert_eq!(edit.len(), 5);
        assert_eq!(edit[1].kind, TokenKind::Space);
        assert_eq!(edit[3].kind, TokenKind::Space);
        // Offsets line up with the original text either way.
        assert_eq!(plain[2].offset, 4);
        assert_eq!(edit[4].offset, 4);
    }

    #[test]
    fn compare_aliases_and_symbols() {
        for src in ["le", "lt", "ge", "gt", "eq", "ne", "<=", "<", ">=", ">", "==", "!="] {
            assert_eq!(kinds(src), vec![TokenKind::Compare], "{:?}", src);
        }
    }
}
