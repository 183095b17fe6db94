//! Curly-brace template splitter.
//!
//! Turns a host string into an ordered run of literal and expression
//! segments. A small character-driven state machine handles the corner
//! cases authors rely on:
//!
//! - `\{` and `\}` are literal braces (unescaped by the host at the end of
//!   substitution, not here).
//! - `{` immediately followed by whitespace is literal, as is `}`
//!   immediately preceded by whitespace, so `{ 1+2 }` stays text.
//! - Inside an expression, quoted strings hide their braces from the depth
//!   count, so `{'}'}` is one expression containing a one-brace string.
//! - A still-open expression at end of input is demoted to a literal; a
//!   malformed template never fails to split.

/// Segment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Literal,
    Expression,
}

/// One splitter output. Expression segments keep their surrounding braces so
/// a failed evaluation can substitute the original text back verbatim.
/// Offsets are 0-based character positions into the host string.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub offset: usize,
    pub kind: SegmentKind,
}

/// Split a host string into literal and expression segments.
pub fn split_template(src: &str) -> Vec<Segment> {
    let chars: Vec<char> = src.chars().collect();
    let mut segments = Vec::new();

    let mut literal = String::new();
    let mut literal_start = 0usize;
    let mut expr = String::new();
    let mut expr_start = 0usize;
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;

    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];

        if depth == 0 {
            match c {
                '\\' if i + 1 < chars.len() => {
                    literal.push('\\');
                    literal.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                '{' => {
                    let opens = matches!(chars.get(i + 1), Some(next) if !next.is_whitespace());
                    if opens {
                        if !literal.is_empty() {
                            segments.push(Segment {
                                text: std::mem::take(&mut literal),
                                offset: literal_start,
                                kind: SegmentKind::Literal,
                            });
                        }
                        expr.clear();
                        expr.push('{');
                        expr_start = i;
                        depth = 1;
                        in_quote = None;
                    } else {
                        literal.push('{');
                    }
                }
                _ => literal.push(c),
            }
            i += 1;
            continue;
        }

        // Inside an expression.
        if let Some(q) = in_quote {
            if c == '\\' && i + 1 < chars.len() {
                expr.push('\\');
                expr.push(chars[i + 1]);
                i += 2;
                continue;
            }
            expr.push(c);
            if c == q {
                in_quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\\' if i + 1 < chars.len() => {
                expr.push('\\');
                expr.push(chars[i + 1]);
                i += 2;
                continue;
            }
            '\'' | '"' => {
                in_quote = Some(c);
                expr.push(c);
            }
            '{' => {
                expr.push('{');
                if matches!(chars.get(i + 1), Some(next) if !next.is_whitespace()) {
                    depth += 1;
                }
            }
            '}' => {
                let demoted = i > 0 && chars[i - 1].is_whitespace();
                expr.push('}');
                if !demoted {
                    depth -= 1;
                    if depth == 0 {
                        segments.push(Segment {
                            text: std::mem::take(&mut expr),
                            offset: expr_start,
                            kind: SegmentKind::Expression,
                        });
                        literal_start = i + 1;
                    }
                }
            }
            _ => expr.push(c),
        }
        i += 1;
    }

    // Unterminated expression: demote to literal rather than failing.
    if depth > 0 && !expr.is_empty() {
        segments.push(Segment {
            text: expr,
            offset: expr_start,
            kind: SegmentKind::Literal,
        });
    } else if !literal.is_empty() {
        segments.push(Segment {
            text: literal,
            offset: literal_start,
            kind: SegmentKind::Literal,
        });
    }

    segments
}
