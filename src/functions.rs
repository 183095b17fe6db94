//! Whitelisted function registry and builtin implementations.
//!
//! Every callable the expression language knows is one row in
//! [`DEFAULT_FUNCTIONS`]: local name, client-surface name (or `NA` when the
//! client runtime has no equivalent), documentation strings, the
//! implementation, and the allowed arities. Evaluation and client-surface
//! emission both read this table, so the two surfaces cannot drift apart.
//!
//! Dispatch validates arity first, then either calls the implementation or,
//! in parse-only mode, returns the placeholder `1` so syntax and arity can
//! be checked without side effects.
//!
//! The string functions operate on UTF-8 code-points throughout; the numeric
//! functions coerce numeric-ish arguments to floats and yield NaN otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{Datelike, Duration, Local, NaiveDate, TimeZone, Timelike, Utc};
use regex::Regex;

use crate::value::{loose_eq, ordered_cmp, CmpOp, Operand, Value};

/// Allowed argument counts for one function: an explicit set, or an open
/// lower bound for the variadic ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    OneOf(&'static [usize]),
    AtLeast(usize),
}

impl Arity {
    pub fn validate(&self, got: usize) -> Result<(), String> {
        let ok = match self {
            Arity::OneOf(set) => set.contains(&got),
            Arity::AtLeast(min) => got >= *min,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("allows {} arguments, {} given", self.describe(), got))
        }
    }

    fn describe(&self) -> String {
        match self {
            Arity::OneOf(set) => set
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" or "),
            Arity::AtLeast(min) => format!("at least {}", min),
        }
    }
}

/// Implementation signature: already-evaluated operands in, value out.
pub type BuiltinFn = fn(&[Operand]) -> Result<Value, String>;

/// One registry row.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    /// Client-surface name; `NA` marks the function unsupported client-side.
    pub client_name: &'static str,
    pub description: &'static str,
    pub signature: &'static str,
    pub doc_url: &'static str,
    pub func: BuiltinFn,
    pub arity: Arity,
}

impl FunctionSpec {
    pub fn client_supported(&self) -> bool {
        self.client_name != "NA"
    }

    pub fn validate_arity(&self, got: usize) -> Result<(), String> {
        self.arity
            .validate(got)
            .map_err(|e| format!("function '{}' {}", self.name, e))
    }
}

/// Dispatch failure, split so the evaluator can classify the error.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    Arity(String),
    Runtime(String),
}

/// Arity-check, then call, or short-circuit to the placeholder `1` in
/// parse-only mode.
pub fn dispatch(
    spec: &FunctionSpec,
    args: &[Operand],
    parse_only: bool,
) -> Result<Value, DispatchError> {
    spec.validate_arity(args.len())
        .map_err(DispatchError::Arity)?;
    if parse_only {
        return Ok(Value::Num(1.0));
    }
    (spec.func)(args).map_err(DispatchError::Runtime)
}

/// Look up a default-registry function by its local name.
pub fn find_function(name: &str) -> Option<&'static FunctionSpec> {
    BY_NAME.get(name).copied()
}

static BY_NAME: LazyLock<HashMap<&'static str, &'static FunctionSpec>> =
    LazyLock::new(|| DEFAULT_FUNCTIONS.iter().map(|f| (f.name, f)).collect());

// ── Argument helpers ────────────────────────────────────────────────────────

fn text(args: &[Operand], i: usize) -> String {
    args.get(i).map(|a| a.text()).unwrap_or_default()
}

fn num(args: &[Operand], i: usize) -> f64 {
    args.get(i).map(|a| a.value.num_value()).unwrap_or(f64::NAN)
}

fn int(args: &[Operand], i: usize) -> i64 {
    let n = num(args, i);
    if n.is_nan() {
        0
    } else {
        n as i64
    }
}

fn chars_of(s: &str) -> Vec<char> {
    s.chars().collect()
}

// ── Numeric functions ───────────────────────────────────────────────────────

fn f_abs(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).abs()))
}

fn f_acos(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).acos()))
}

fn f_asin(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).asin()))
}

fn f_atan(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).atan()))
}

fn f_atan2(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).atan2(num(args, 1))))
}

fn f_ceil(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).ceil()))
}

fn f_cos(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).cos()))
}

fn f_exp(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).exp()))
}

fn f_floor(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).floor()))
}

fn f_log(args: &[Operand]) -> Result<Value, String> {
    let n = num(args, 0);
    if n.is_nan() || n <= 0.0 {
        return Ok(Value::Num(f64::NAN));
    }
    if args.len() == 2 {
        let base = num(args, 1);
        if base.is_nan() || base <= 0.0 || base == 1.0 {
            return Ok(Value::Num(f64::NAN));
        }
        Ok(Value::Num(n.ln() / base.ln()))
    } else {
        Ok(Value::Num(n.ln()))
    }
}

fn f_max(args: &[Operand]) -> Result<Value, String> {
    let mut best = &args[0];
    for arg in &args[1..] {
        if ordered_cmp(arg, best, CmpOp::Gt) {
            best = arg;
        }
    }
    Ok(best.value.clone())
}

fn f_min(args: &[Operand]) -> Result<Value, String> {
    let mut best = &args[0];
    for arg in &args[1..] {
        if ordered_cmp(arg, best, CmpOp::Lt) {
            best = arg;
        }
    }
    Ok(best.value.clone())
}

fn f_pi(_args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(std::f64::consts::PI))
}

fn f_pow(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).powf(num(args, 1))))
}

fn f_round(args: &[Operand]) -> Result<Value, String> {
    let n = num(args, 0);
    let digits = if args.len() == 2 { int(args, 1) } else { 0 };
    let factor = 10f64.powi(digits as i32);
    Ok(Value::Num((n * factor).round() / factor))
}

fn f_sin(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).sin()))
}

fn f_sqrt(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).sqrt()))
}

fn f_tan(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(num(args, 0).tan()))
}

fn f_rand(args: &[Operand]) -> Result<Value, String> {
    if args.is_empty() {
        return Ok(Value::Num(rand::random_range(0..=2147483647i64) as f64));
    }
    let (lo, hi) = (int(args, 0), int(args, 1));
    if lo > hi {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Num(rand::random_range(lo..=hi) as f64))
}

// ── Type tests ──────────────────────────────────────────────────────────────

fn f_intval(args: &[Operand]) -> Result<Value, String> {
    let s = text(args, 0);
    let base = if args.len() == 2 {
        int(args, 1).clamp(2, 36) as u32
    } else {
        10
    };
    let trimmed = s.trim();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(r) => (-1i64, r),
        None => (1i64, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_digit(base))
        .collect();
    let value = i64::from_str_radix(&digits, base).unwrap_or(0);
    Ok(Value::Num((sign * value) as f64))
}

fn f_is_int(args: &[Operand]) -> Result<Value, String> {
    let v = &args[0].value;
    let yes = match v {
        Value::Num(n) => n.is_finite() && n.fract() == 0.0,
        Value::Str(s) => {
            !s.is_empty() && v.is_numericish() && v.num_value().fract() == 0.0
        }
        _ => false,
    };
    Ok(Value::Bool(yes))
}

fn f_is_float(args: &[Operand]) -> Result<Value, String> {
    let v = &args[0].value;
    let yes = match v {
        Value::Num(n) => n.is_finite() && n.fract() != 0.0,
        Value::Str(s) => !s.is_empty() && v.is_numericish() && v.num_value().fract() != 0.0,
        _ => false,
    };
    Ok(Value::Bool(yes))
}

fn f_is_nan(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Bool(args[0].value.num_value().is_nan()))
}

fn f_is_numeric(args: &[Operand]) -> Result<Value, String> {
    let yes = match &args[0].value {
        Value::Num(_) => true,
        Value::Str(s) => !s.is_empty() && s.trim().parse::<f64>().is_ok(),
        _ => false,
    };
    Ok(Value::Bool(yes))
}

fn f_is_null(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Bool(matches!(args[0].value, Value::Null)))
}

fn f_is_string(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Bool(matches!(args[0].value, Value::Str(_))))
}

// ── String functions ────────────────────────────────────────────────────────

fn f_addslashes(args: &[Operand]) -> Result<Value, String> {
    let mut out = String::new();
    for c in text(args, 0).chars() {
        match c {
            '\'' | '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    Ok(Value::Str(out))
}

fn f_stripslashes(args: &[Operand]) -> Result<Value, String> {
    let chars = chars_of(&text(args, 0));
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
        } else if chars[i] == '\\' {
            i += 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(Value::Str(out))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_entities(s: &str, full: bool) -> String {
    let chars = chars_of(s);
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '&' {
            if let Some(rel) = chars[i + 1..].iter().take(10).position(|&c| c == ';') {
                let entity: String = chars[i + 1..i + 1 + rel].iter().collect();
                let decoded = match entity.as_str() {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" | "#039" | "#39" => Some('\''),
                    "nbsp" if full => Some('\u{a0}'),
                    e if full && e.starts_with('#') => {
                        let body = &e[1..];
                        let code = if let Some(hex) =
                            body.strip_prefix('x').or_else(|| body.strip_prefix('X'))
                        {
                            u32::from_str_radix(hex, 16).ok()
                        } else {
                            body.parse::<u32>().ok()
                        };
                        code.and_then(char::from_u32)
                    }
                    _ => None,
                };
                if let Some(c) = decoded {
                    out.push(c);
                    i += rel + 2;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn f_htmlentities(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(escape_html(&text(args, 0))))
}

fn f_html_entity_decode(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(decode_entities(&text(args, 0), true)))
}

fn f_htmlspecialchars(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(escape_html(&text(args, 0))))
}

fn f_htmlspecialchars_decode(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(decode_entities(&text(args, 0), false)))
}

fn f_nl2br(args: &[Operand]) -> Result<Value, String> {
    let chars = chars_of(&text(args, 0));
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\r' | '\n' => {
                out.push_str("<br />");
                out.push(chars[i]);
                // \r\n and \n\r are single line breaks.
                if i + 1 < chars.len()
                    && (chars[i + 1] == '\r' || chars[i + 1] == '\n')
                    && chars[i + 1] != chars[i]
                {
                    out.push(chars[i + 1]);
                    i += 1;
                }
            }
            c => out.push(c),
        }
        i += 1;
    }
    Ok(Value::Str(out))
}

fn f_number_format(args: &[Operand]) -> Result<Value, String> {
    let n = num(args, 0);
    if !n.is_finite() {
        return Ok(Value::Str("NaN".to_string()));
    }
    let decimals = if args.len() >= 2 {
        int(args, 1).clamp(0, 100) as usize
    } else {
        0
    };
    let (point, sep) = if args.len() == 4 {
        (text(args, 2), text(args, 3))
    } else {
        (".".to_string(), ",".to_string())
    };
    let negative = n < 0.0;
    let fixed = format!("{:.*}", decimals, n.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (fixed, String::new()),
    };
    let mut grouped = String::new();
    for (pos, c) in int_part.chars().enumerate() {
        if pos > 0 && (int_part.len() - pos) % 3 == 0 {
            grouped.push_str(&sep);
        }
        grouped.push(c);
    }
    let mut out = String::new();
    if negative && (grouped.chars().any(|c| c != '0') || frac_part.chars().any(|c| c != '0')) {
        out.push('-');
    }
    out.push_str(&grouped);
    if decimals > 0 {
        out.push_str(&point);
        out.push_str(&frac_part);
    }
    Ok(Value::Str(out))
}

fn f_quoted_printable_encode(args: &[Operand]) -> Result<Value, String> {
    let mut out = String::new();
    for b in text(args, 0).bytes() {
        let printable = (33..=126).contains(&b) && b != b'=';
        if printable || b == b' ' || b == b'\t' {
            out.push(b as char);
        } else {
            out.push_str(&format!("={:02X}", b));
        }
    }
    Ok(Value::Str(out))
}

fn f_quoted_printable_decode(args: &[Operand]) -> Result<Value, String> {
    let s = text(args, 0);
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' {
            // Soft line break.
            if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') {
                i += 3;
                continue;
            }
            if bytes.get(i + 1) == Some(&b'\n') {
                i += 2;
                continue;
            }
            if i + 2 < bytes.len() {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Ok(Value::Str(String::from_utf8_lossy(&out).into_owned()))
}

fn f_quotemeta(args: &[Operand]) -> Result<Value, String> {
    let mut out = String::new();
    for c in text(args, 0).chars() {
        if ".\\+*?[^]$()".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    Ok(Value::Str(out))
}

fn exp_with_sign(s: String, upper: bool) -> String {
    match s.find(|c| c == 'e' || c == 'E') {
        Some(pos) => {
            let mantissa = &s[..pos];
            let exp = &s[pos + 1..];
            let sign = if exp.starts_with('-') { "" } else { "+" };
            let marker = if upper { "E" } else { "e" };
            format!("{}{}{}{}", mantissa, marker, sign, exp)
        }
        None => s,
    }
}

fn php_sprintf(fmt: &str, args: &[Operand]) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut argi = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut left = false;
        let mut plus = false;
        let mut pad = ' ';
        loop {
            match chars.peek().copied() {
                Some('-') => {
                    left = true;
                    chars.next();
                }
                Some('+') => {
                    plus = true;
                    chars.next();
                }
                Some('0') => {
                    pad = '0';
                    chars.next();
                }
                Some(' ') => {
                    chars.next();
                }
                Some('\'') => {
                    chars.next();
                    if let Some(p) = chars.next() {
                        pad = p;
                    }
                }
                _ => break,
            }
        }

        let mut width = 0usize;
        while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
            width = (width * 10 + chars.next().unwrap().to_digit(10).unwrap() as usize)
                .min(1_000_000);
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                p = (p * 10 + chars.next().unwrap().to_digit(10).unwrap() as usize).min(100);
            }
            precision = Some(p);
        }

        let conv = chars
            .next()
            .ok_or_else(|| "sprintf: format string ends inside a specifier".to_string())?;
        let arg = args
            .get(argi)
            .ok_or_else(|| "sprintf: too few arguments".to_string())?;
        argi += 1;

        let n = arg.value.num_value();
        let i = if n.is_nan() { 0i64 } else { n as i64 };
        let f = if n.is_nan() { 0.0 } else { n };
        let numeric = !matches!(conv, 's' | 'c');
        let rendered = match conv {
            's' => {
                let t = arg.text();
                match precision {
                    Some(p) => t.chars().take(p).collect(),
                    None => t,
                }
            }
            'd' => {
                if plus && i >= 0 {
                    format!("+{}", i)
                } else {
                    i.to_string()
                }
            }
            'u' => (i as u64).to_string(),
            'f' | 'F' => format!("{:.*}", precision.unwrap_or(6), f),
            'e' => exp_with_sign(format!("{:.*e}", precision.unwrap_or(6), f), false),
            'E' => exp_with_sign(format!("{:.*e}", precision.unwrap_or(6), f), true),
            'g' => Value::Num(f).as_text(),
            'x' => format!("{:x}", i),
            'X' => format!("{:X}", i),
            'o' => format!("{:o}", i),
            'b' => format!("{:b}", i),
            'c' => char::from_u32(i as u32).map(String::from).unwrap_or_default(),
            other => return Err(format!("sprintf: unsupported conversion '%{}'", other)),
        };

        let len = rendered.chars().count();
        if len < width {
            let fill: String = std::iter::repeat(pad).take(width - len).collect();
            if left {
                out.push_str(&rendered);
                out.push_str(&fill);
            } else if pad == '0' && numeric && rendered.starts_with('-') {
                out.push('-');
                out.push_str(&fill);
                out.push_str(&rendered[1..]);
            } else {
                out.push_str(&fill);
                out.push_str(&rendered);
            }
        } else {
            out.push_str(&rendered);
        }
    }
    Ok(out)
}

fn f_sprintf(args: &[Operand]) -> Result<Value, String> {
    php_sprintf(&text(args, 0), &args[1..]).map(Value::Str)
}

fn f_str_pad(args: &[Operand]) -> Result<Value, String> {
    let input = text(args, 0);
    let target = int(args, 1).clamp(0, 1_000_000) as usize;
    let pad = if args.len() >= 3 {
        let p = text(args, 2);
        if p.is_empty() {
            return Ok(Value::Str(input));
        }
        p
    } else {
        " ".to_string()
    };
    // 0 = left, 1 = right (default), 2 = both.
    let mode = if args.len() == 4 { int(args, 3) } else { 1 };

    let len = input.chars().count();
    if target <= len {
        return Ok(Value::Str(input));
    }
    let missing = target - len;
    let fill = |n: usize| -> String { pad.chars().cycle().take(n).collect() };
    let out = match mode {
        0 => format!("{}{}", fill(missing), input),
        2 => {
            let left = missing / 2;
            format!("{}{}{}", fill(left), input, fill(missing - left))
        }
        _ => format!("{}{}", input, fill(missing)),
    };
    Ok(Value::Str(out))
}

fn f_str_repeat(args: &[Operand]) -> Result<Value, String> {
    let times = int(args, 1).clamp(0, 1_000_000) as usize;
    Ok(Value::Str(text(args, 0).repeat(times)))
}

fn f_str_replace(args: &[Operand]) -> Result<Value, String> {
    let search = text(args, 0);
    let replace = text(args, 1);
    let subject = text(args, 2);
    if search.is_empty() {
        return Ok(Value::Str(subject));
    }
    Ok(Value::Str(subject.replace(&search, &replace)))
}

fn cmp_to_num(ord: std::cmp::Ordering) -> Value {
    Value::Num(match ord {
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
        std::cmp::Ordering::Greater => 1.0,
    })
}

fn lower(s: &str) -> String {
    // Char-wise folding keeps positions aligned for the ci searches.
    s.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

fn f_strcasecmp(args: &[Operand]) -> Result<Value, String> {
    Ok(cmp_to_num(lower(&text(args, 0)).cmp(&lower(&text(args, 1)))))
}

fn f_strcmp(args: &[Operand]) -> Result<Value, String> {
    Ok(cmp_to_num(text(args, 0).cmp(&text(args, 1))))
}

fn f_strip_tags(args: &[Operand]) -> Result<Value, String> {
    let allowed: HashSet<String> = if args.len() == 2 {
        let spec = text(args, 1);
        spec.split('<')
            .filter_map(|part| part.split('>').next())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    } else {
        HashSet::new()
    };

    let chars = chars_of(&text(args, 0));
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '<' {
            match chars[i..].iter().position(|&c| c == '>') {
                Some(rel) => {
                    let tag: String = chars[i..=i + rel].iter().collect();
                    let name: String = tag
                        .trim_start_matches('<')
                        .trim_start_matches('/')
                        .chars()
                        .take_while(|c| c.is_ascii_alphanumeric())
                        .collect::<String>()
                        .to_lowercase();
                    if allowed.contains(&name) {
                        out.push_str(&tag);
                    }
                    i += rel + 1;
                }
                // Unclosed tag swallows the rest.
                None => break,
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(Value::Str(out))
}

/// Code-point position of `needle` in `haystack` starting at `offset`.
fn char_find(haystack: &str, needle: &str, offset: usize) -> Option<usize> {
    let h = chars_of(haystack);
    let n = chars_of(needle);
    if offset > h.len() {
        return None;
    }
    if n.is_empty() {
        return Some(offset);
    }
    if n.len() > h.len() {
        return None;
    }
    (offset..=h.len() - n.len()).find(|&i| h[i..i + n.len()] == n[..])
}

fn f_stripos(args: &[Operand]) -> Result<Value, String> {
    let offset = if args.len() == 3 { int(args, 2).max(0) as usize } else { 0 };
    match char_find(&lower(&text(args, 0)), &lower(&text(args, 1)), offset) {
        Some(pos) => Ok(Value::Num(pos as f64)),
        None => Ok(Value::Bool(false)),
    }
}

fn f_strpos(args: &[Operand]) -> Result<Value, String> {
    let offset = if args.len() == 3 { int(args, 2).max(0) as usize } else { 0 };
    match char_find(&text(args, 0), &text(args, 1), offset) {
        Some(pos) => Ok(Value::Num(pos as f64)),
        None => Ok(Value::Bool(false)),
    }
}

fn str_portion(haystack: &str, pos: usize, before: bool) -> String {
    let h = chars_of(haystack);
    if before {
        h[..pos].iter().collect()
    } else {
        h[pos..].iter().collect()
    }
}

fn f_stristr(args: &[Operand]) -> Result<Value, String> {
    let haystack = text(args, 0);
    let before = args.len() == 3 && args[2].value.is_truthy();
    match char_find(&lower(&haystack), &lower(&text(args, 1)), 0) {
        Some(pos) => Ok(Value::Str(str_portion(&haystack, pos, before))),
        None => Ok(Value::Bool(false)),
    }
}

fn f_strstr(args: &[Operand]) -> Result<Value, String> {
    let haystack = text(args, 0);
    let before = args.len() == 3 && args[2].value.is_truthy();
    match char_find(&haystack, &text(args, 1), 0) {
        Some(pos) => Ok(Value::Str(str_portion(&haystack, pos, before))),
        None => Ok(Value::Bool(false)),
    }
}

fn f_strlen(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(text(args, 0).chars().count() as f64))
}

fn f_strrev(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(text(args, 0).chars().rev().collect()))
}

fn f_strtolower(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(text(args, 0).to_lowercase()))
}

fn f_strtoupper(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(text(args, 0).to_uppercase()))
}

fn f_strtotime(args: &[Operand]) -> Result<Value, String> {
    let s = text(args, 0);
    let s = s.trim();
    if s.eq_ignore_ascii_case("now") {
        return Ok(Value::Num(Utc::now().timestamp() as f64));
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];
    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            if let Some(dt) = Local.from_local_datetime(&ndt).earliest() {
                return Ok(Value::Num(dt.timestamp() as f64));
            }
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(nd) = NaiveDate::parse_from_str(s, fmt) {
            let ndt = nd.and_hms_opt(0, 0, 0).expect("midnight is valid");
            if let Some(dt) = Local.from_local_datetime(&ndt).earliest() {
                return Ok(Value::Num(dt.timestamp() as f64));
            }
        }
    }
    Ok(Value::Bool(false))
}

fn f_substr(args: &[Operand]) -> Result<Value, String> {
    let chars = chars_of(&text(args, 0));
    let len = chars.len() as i64;
    let mut start = int(args, 1);
    if start < 0 {
        start = (len + start).max(0);
    }
    let start = start.min(len) as usize;

    let end = if args.len() == 3 {
        let length = int(args, 2);
        if length < 0 {
            ((len + length).max(start as i64)) as usize
        } else {
            start.saturating_add(length as usize).min(len as usize)
        }
    } else {
        len as usize
    };
    Ok(Value::Str(chars[start..end.max(start)].iter().collect()))
}

const DEFAULT_TRIM: &str = " \t\n\r\0\x0B";

fn trim_set(args: &[Operand]) -> String {
    if args.len() == 2 {
        text(args, 1)
    } else {
        DEFAULT_TRIM.to_string()
    }
}

fn f_trim(args: &[Operand]) -> Result<Value, String> {
    let set = trim_set(args);
    Ok(Value::Str(
        text(args, 0).trim_matches(|c| set.contains(c)).to_string(),
    ))
}

fn f_ltrim(args: &[Operand]) -> Result<Value, String> {
    let set = trim_set(args);
    Ok(Value::Str(
        text(args, 0)
            .trim_start_matches(|c| set.contains(c))
            .to_string(),
    ))
}

fn f_rtrim(args: &[Operand]) -> Result<Value, String> {
    let set = trim_set(args);
    Ok(Value::Str(
        text(args, 0)
            .trim_end_matches(|c| set.contains(c))
            .to_string(),
    ))
}

fn f_ucwords(args: &[Operand]) -> Result<Value, String> {
    let mut out = String::new();
    let mut at_word_start = true;
    for c in text(args, 0).chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    Ok(Value::Str(out))
}

// ── Date functions ──────────────────────────────────────────────────────────

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match next {
        Some(d) => d.pred_opt().map(|p| p.day()).unwrap_or(30),
        None => 30,
    }
}

fn format_date<Tz: TimeZone>(fmt: &str, dt: &chrono::DateTime<Tz>) -> String {
    const DAYS_SHORT: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    const DAYS_LONG: [&str; 7] = [
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
        "Sunday",
    ];
    const MONTHS_SHORT: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    const MONTHS_LONG: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];

    let weekday = dt.weekday();
    let mut out = String::new();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            'd' => out.push_str(&format!("{:02}", dt.day())),
            'j' => out.push_str(&dt.day().to_string()),
            'D' => out.push_str(DAYS_SHORT[weekday.num_days_from_monday() as usize]),
            'l' => out.push_str(DAYS_LONG[weekday.num_days_from_monday() as usize]),
            'N' => out.push_str(&weekday.number_from_monday().to_string()),
            'w' => out.push_str(&weekday.num_days_from_sunday().to_string()),
            'z' => out.push_str(&dt.ordinal0().to_string()),
            'F' => out.push_str(MONTHS_LONG[dt.month0() as usize]),
            'M' => out.push_str(MONTHS_SHORT[dt.month0() as usize]),
            'm' => out.push_str(&format!("{:02}", dt.month())),
            'n' => out.push_str(&dt.month().to_string()),
            't' => out.push_str(&days_in_month(dt.year(), dt.month()).to_string()),
            'L' => out.push(if NaiveDate::from_ymd_opt(dt.year(), 2, 29).is_some() {
                '1'
            } else {
                '0'
            }),
            'Y' => out.push_str(&dt.year().to_string()),
            'y' => out.push_str(&format!("{:02}", dt.year().rem_euclid(100))),
            'a' => out.push_str(if dt.hour() < 12 { "am" } else { "pm" }),
            'A' => out.push_str(if dt.hour() < 12 { "AM" } else { "PM" }),
            'g' => out.push_str(&dt.hour12().1.to_string()),
            'h' => out.push_str(&format!("{:02}", dt.hour12().1)),
            'G' => out.push_str(&dt.hour().to_string()),
            'H' => out.push_str(&format!("{:02}", dt.hour())),
            'i' => out.push_str(&format!("{:02}", dt.minute())),
            's' => out.push_str(&format!("{:02}", dt.second())),
            'U' => out.push_str(&dt.timestamp().to_string()),
            other => out.push(other),
        }
    }
    out
}

fn f_date(args: &[Operand]) -> Result<Value, String> {
    let ts = if args.len() == 2 {
        int(args, 1)
    } else {
        Utc::now().timestamp()
    };
    match Local.timestamp_opt(ts, 0).earliest() {
        Some(dt) => Ok(Value::Str(format_date(&text(args, 0), &dt))),
        None => Ok(Value::Bool(false)),
    }
}

fn f_gmdate(args: &[Operand]) -> Result<Value, String> {
    let ts = if args.len() == 2 {
        int(args, 1)
    } else {
        Utc::now().timestamp()
    };
    match Utc.timestamp_opt(ts, 0).earliest() {
        Some(dt) => Ok(Value::Str(format_date(&text(args, 0), &dt))),
        None => Ok(Value::Bool(false)),
    }
}

fn f_idate(args: &[Operand]) -> Result<Value, String> {
    let ts = if args.len() == 2 {
        int(args, 1)
    } else {
        Utc::now().timestamp()
    };
    let dt = match Local.timestamp_opt(ts, 0).earliest() {
        Some(dt) => dt,
        None => return Ok(Value::Bool(false)),
    };
    let c = match text(args, 0).chars().next() {
        Some(c) => c,
        None => return Ok(Value::Bool(false)),
    };
    let n: i64 = match c {
        'd' | 'j' => dt.day() as i64,
        'm' | 'n' => dt.month() as i64,
        'Y' => dt.year() as i64,
        'y' => dt.year().rem_euclid(100) as i64,
        'H' | 'G' => dt.hour() as i64,
        'g' | 'h' => dt.hour12().1 as i64,
        'i' => dt.minute() as i64,
        's' => dt.second() as i64,
        'w' => dt.weekday().num_days_from_sunday() as i64,
        'N' => dt.weekday().number_from_monday() as i64,
        'z' => dt.ordinal0() as i64,
        't' => days_in_month(dt.year(), dt.month()) as i64,
        'L' => i64::from(NaiveDate::from_ymd_opt(dt.year(), 2, 29).is_some()),
        'U' => dt.timestamp(),
        _ => return Ok(Value::Bool(false)),
    };
    Ok(Value::Num(n as f64))
}

fn f_mktime(args: &[Operand]) -> Result<Value, String> {
    let now = Local::now();
    let part = |i: usize, default: i64| -> i64 {
        if i < args.len() {
            int(args, i)
        } else {
            default
        }
    };
    let hour = part(0, now.hour() as i64);
    let minute = part(1, now.minute() as i64);
    let second = part(2, now.second() as i64);
    let month = part(3, now.month() as i64);
    let day = part(4, now.day() as i64);
    let year = part(5, now.year() as i64);

    // Any representable date fits well inside this bound.
    const FIELD_LIMIT: i64 = 10_000_000;
    if [hour, minute, second, month, day, year]
        .iter()
        .any(|p| p.abs() > FIELD_LIMIT)
    {
        return Ok(Value::Bool(false));
    }

    // Out-of-range fields roll over, so month 13 is January next year and
    // day 0 is the last day of the previous month.
    let months_total = year * 12 + (month - 1);
    let norm_year = months_total.div_euclid(12);
    let norm_month = months_total.rem_euclid(12) + 1;
    let base = match NaiveDate::from_ymd_opt(norm_year as i32, norm_month as u32, 1) {
        Some(d) => d,
        None => return Ok(Value::Bool(false)),
    };
    let midnight = base.and_hms_opt(0, 0, 0).expect("midnight is valid");
    let offset = Duration::days(day - 1)
        + Duration::hours(hour)
        + Duration::minutes(minute)
        + Duration::seconds(second);
    let ndt = match midnight.checked_add_signed(offset) {
        Some(ndt) => ndt,
        None => return Ok(Value::Bool(false)),
    };
    match Local.from_local_datetime(&ndt).earliest() {
        Some(dt) => Ok(Value::Num(dt.timestamp() as f64)),
        None => Ok(Value::Bool(false)),
    }
}

fn f_checkdate(args: &[Operand]) -> Result<Value, String> {
    let (month, day, year) = (int(args, 0), int(args, 1), int(args, 2));
    let ok = (1..=32767).contains(&year)
        && (1..=12).contains(&month)
        && day >= 1
        && NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).is_some();
    Ok(Value::Bool(ok))
}

fn f_time(_args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Num(Utc::now().timestamp() as f64))
}

// ── Survey functions ────────────────────────────────────────────────────────

fn f_count(args: &[Operand]) -> Result<Value, String> {
    let n = args.iter().filter(|a| !a.text().is_empty()).count();
    Ok(Value::Num(n as f64))
}

fn f_countif(args: &[Operand]) -> Result<Value, String> {
    let target = &args[0];
    let n = args[1..].iter().filter(|a| loose_eq(a, target)).count();
    Ok(Value::Num(n as f64))
}

/// Pattern for `RX` matching: optional `/…/` delimiters, compiled silently
/// (an invalid pattern matches nothing).
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let inner = if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        &pattern[1..pattern.len() - 1]
    } else {
        pattern
    };
    Regex::new(inner).ok()
}

fn match_op(op: &str, x: &Operand, v: &Operand) -> bool {
    match op {
        "==" | "eq" => loose_eq(x, v),
        "!=" | "ne" => !loose_eq(x, v),
        "<" | "lt" => ordered_cmp(x, v, CmpOp::Lt),
        "<=" | "le" => ordered_cmp(x, v, CmpOp::Le),
        ">" | "gt" => ordered_cmp(x, v, CmpOp::Gt),
        ">=" | "ge" => ordered_cmp(x, v, CmpOp::Ge),
        "RX" => match compile_pattern(&v.text()) {
            Some(re) => re.is_match(&x.text()),
            None => false,
        },
        _ => false,
    }
}

fn f_countifop(args: &[Operand]) -> Result<Value, String> {
    let op = text(args, 0);
    let v = &args[1];
    let n = args[2..].iter().filter(|x| match_op(&op, x, v)).count();
    Ok(Value::Num(n as f64))
}

fn f_sum(args: &[Operand]) -> Result<Value, String> {
    let total: f64 = args
        .iter()
        .map(|a| {
            let n = a.value.num_value();
            if n.is_nan() {
                0.0
            } else {
                n
            }
        })
        .sum();
    Ok(Value::Num(total))
}

fn f_sumifop(args: &[Operand]) -> Result<Value, String> {
    let op = text(args, 0);
    let v = &args[1];
    let total: f64 = args[2..]
        .iter()
        .filter(|x| match_op(&op, x, v))
        .map(|x| {
            let n = x.value.num_value();
            if n.is_nan() {
                0.0
            } else {
                n
            }
        })
        .sum();
    Ok(Value::Num(total))
}

fn f_if(args: &[Operand]) -> Result<Value, String> {
    if args[0].value.is_truthy() {
        Ok(args[1].value.clone())
    } else {
        Ok(args[2].value.clone())
    }
}

fn f_implode(args: &[Operand]) -> Result<Value, String> {
    let glue = text(args, 0);
    let parts: Vec<String> = args[1..].iter().map(|a| a.text()).collect();
    Ok(Value::Str(parts.join(&glue)))
}

fn f_join(args: &[Operand]) -> Result<Value, String> {
    Ok(Value::Str(args.iter().map(|a| a.text()).collect()))
}

fn f_list(args: &[Operand]) -> Result<Value, String> {
    let parts: Vec<String> = args
        .iter()
        .map(|a| a.text())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(Value::Str(parts.join(", ")))
}

fn f_stddev(args: &[Operand]) -> Result<Value, String> {
    let values: Vec<f64> = args
        .iter()
        .map(|a| a.value.num_value())
        .filter(|n| !n.is_nan())
        .collect();
    if values.len() < 2 {
        return Ok(Value::Num(0.0));
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Ok(Value::Num(variance.sqrt()))
}

fn f_unique(args: &[Operand]) -> Result<Value, String> {
    let mut seen = HashSet::new();
    for arg in args {
        let t = arg.text().trim().to_string();
        if t.is_empty() {
            continue;
        }
        if !seen.insert(t) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn f_fixnum(args: &[Operand]) -> Result<Value, String> {
    let v = &args[0].value;
    if v.is_numericish() {
        Ok(Value::Num(v.num_value()))
    } else {
        Ok(v.clone())
    }
}

fn f_is_empty(args: &[Operand]) -> Result<Value, String> {
    let empty = matches!(
        &args[0].value,
        Value::Null | Value::Bool(false)
    ) || matches!(&args[0].value, Value::Str(s) if s.is_empty());
    Ok(Value::Bool(empty))
}

fn f_regex_match(args: &[Operand]) -> Result<Value, String> {
    let matched = match compile_pattern(&text(args, 0)) {
        Some(re) => re.is_match(&text(args, 1)),
        None => false,
    };
    Ok(Value::Bool(matched))
}

fn f_convert_value(args: &[Operand]) -> Result<Value, String> {
    let source = &args[0].value;
    if !source.is_numericish() || source.as_text().is_empty() {
        return Ok(Value::Null);
    }
    let x = source.num_value();
    if x.is_nan() {
        return Ok(Value::Null);
    }
    let strict = int(args, 1) == 1;

    let from_raw = text(args, 2);
    let mut from = Vec::new();
    for part in from_raw.split(',') {
        match part.trim().parse::<f64>() {
            Ok(n) => from.push(n),
            Err(_) => return Ok(Value::Null),
        }
    }
    let to: Vec<String> = text(args, 3)
        .split(',')
        .map(|p| p.trim().to_string())
        .collect();
    if from.is_empty() || from.len() != to.len() {
        return Ok(Value::Null);
    }

    if strict {
        match from.iter().position(|&f| f == x) {
            Some(i) => Ok(Value::Str(to[i].clone())),
            None => Ok(Value::Null),
        }
    } else {
        let mut best = 0usize;
        for (i, f) in from.iter().enumerate() {
            if (f - x).abs() < (from[best] - x).abs() {
                best = i;
            }
        }
        Ok(Value::Str(to[best].clone()))
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

macro_rules! phpdoc {
    ($slug:expr) => {
        concat!("https://www.php.net/manual/en/function.", $slug, ".php")
    };
}

const fn spec(
    name: &'static str,
    client_name: &'static str,
    description: &'static str,
    signature: &'static str,
    doc_url: &'static str,
    func: BuiltinFn,
    arity: Arity,
) -> FunctionSpec {
    FunctionSpec {
        name,
        client_name,
        description,
        signature,
        doc_url,
        func,
        arity,
    }
}

use Arity::{AtLeast, OneOf};

/// The process-wide immutable default registry.
pub static DEFAULT_FUNCTIONS: &[FunctionSpec] = &[
    // Numeric
    spec("abs", "Math.abs", "Absolute value", "abs(n)", phpdoc!("abs"), f_abs, OneOf(&[1])),
    spec("acos", "Math.acos", "Arc cosine", "acos(n)", phpdoc!("acos"), f_acos, OneOf(&[1])),
    spec("asin", "Math.asin", "Arc sine", "asin(n)", phpdoc!("asin"), f_asin, OneOf(&[1])),
    spec("atan", "Math.atan", "Arc tangent", "atan(n)", phpdoc!("atan"), f_atan, OneOf(&[1])),
    spec("atan2", "Math.atan2", "Arc tangent of two variables", "atan2(y, x)", phpdoc!("atan2"), f_atan2, OneOf(&[2])),
    spec("ceil", "Math.ceil", "Round up", "ceil(n)", phpdoc!("ceil"), f_ceil, OneOf(&[1])),
    spec("cos", "Math.cos", "Cosine", "cos(n)", phpdoc!("cos"), f_cos, OneOf(&[1])),
    spec("exp", "Math.exp", "e to the power", "exp(n)", phpdoc!("exp"), f_exp, OneOf(&[1])),
    spec("floor", "Math.floor", "Round down", "floor(n)", phpdoc!("floor"), f_floor, OneOf(&[1])),
    spec("log", "log", "Logarithm, natural or to a base", "log(n[, base])", phpdoc!("log"), f_log, OneOf(&[1, 2])),
    spec("max", "Math.max", "Largest argument", "max(a, b, ...)", phpdoc!("max"), f_max, AtLeast(1)),
    spec("min", "Math.min", "Smallest argument", "min(a, b, ...)", phpdoc!("min"), f_min, AtLeast(1)),
    spec("pi", "PI", "The circle constant", "pi()", phpdoc!("pi"), f_pi, OneOf(&[0])),
    spec("pow", "Math.pow", "Exponentiation", "pow(base, exp)", phpdoc!("pow"), f_pow, OneOf(&[2])),
    spec("rand", "rand", "Random integer", "rand([min, max])", phpdoc!("rand"), f_rand, OneOf(&[0, 2])),
    spec("round", "round", "Round, optionally to digits", "round(n[, digits])", phpdoc!("round"), f_round, OneOf(&[1, 2])),
    spec("sin", "Math.sin", "Sine", "sin(n)", phpdoc!("sin"), f_sin, OneOf(&[1])),
    spec("sqrt", "Math.sqrt", "Square root", "sqrt(n)", phpdoc!("sqrt"), f_sqrt, OneOf(&[1])),
    spec("tan", "Math.tan", "Tangent", "tan(n)", phpdoc!("tan"), f_tan, OneOf(&[1])),
    // Type tests and conversion
    spec("intval", "intval", "Leading-integer value", "intval(x[, base])", phpdoc!("intval"), f_intval, OneOf(&[1, 2])),
    spec("is_int", "is_int", "Integer-valued test", "is_int(x)", phpdoc!("is-int"), f_is_int, OneOf(&[1])),
    spec("is_float", "is_float", "Fractional-valued test", "is_float(x)", phpdoc!("is-float"), f_is_float, OneOf(&[1])),
    spec("is_nan", "isNaN", "Not-a-number test", "is_nan(x)", phpdoc!("is-nan"), f_is_nan, OneOf(&[1])),
    spec("is_numeric", "is_numeric", "Numeric test", "is_numeric(x)", phpdoc!("is-numeric"), f_is_numeric, OneOf(&[1])),
    spec("is_null", "is_null", "Null test", "is_null(x)", phpdoc!("is-null"), f_is_null, OneOf(&[1])),
    spec("is_string", "is_string", "String test", "is_string(x)", phpdoc!("is-string"), f_is_string, OneOf(&[1])),
    // Strings
    spec("addslashes", "addslashes", "Backslash-escape quotes", "addslashes(s)", phpdoc!("addslashes"), f_addslashes, OneOf(&[1])),
    spec("stripslashes", "stripslashes", "Remove backslash escapes", "stripslashes(s)", phpdoc!("stripslashes"), f_stripslashes, OneOf(&[1])),
    spec("htmlentities", "htmlentities", "HTML-encode special characters", "htmlentities(s)", phpdoc!("htmlentities"), f_htmlentities, OneOf(&[1])),
    spec("html_entity_decode", "html_entity_decode", "Decode HTML entities", "html_entity_decode(s)", phpdoc!("html-entity-decode"), f_html_entity_decode, OneOf(&[1])),
    spec("htmlspecialchars", "htmlspecialchars", "HTML-encode markup characters", "htmlspecialchars(s)", phpdoc!("htmlspecialchars"), f_htmlspecialchars, OneOf(&[1])),
    spec("htmlspecialchars_decode", "htmlspecialchars_decode", "Decode markup entities", "htmlspecialchars_decode(s)", phpdoc!("htmlspecialchars-decode"), f_htmlspecialchars_decode, OneOf(&[1])),
    spec("nl2br", "nl2br", "Insert <br /> before newlines", "nl2br(s)", phpdoc!("nl2br"), f_nl2br, OneOf(&[1])),
    spec("number_format", "number_format", "Group thousands, fix decimals", "number_format(n[, decimals[, point, sep]])", phpdoc!("number-format"), f_number_format, OneOf(&[1, 2, 4])),
    spec("quoted_printable_encode", "NA", "Quoted-printable encode", "quoted_printable_encode(s)", phpdoc!("quoted-printable-encode"), f_quoted_printable_encode, OneOf(&[1])),
    spec("quoted_printable_decode", "NA", "Quoted-printable decode", "quoted_printable_decode(s)", phpdoc!("quoted-printable-decode"), f_quoted_printable_decode, OneOf(&[1])),
    spec("quotemeta", "quotemeta", "Backslash-escape regex metacharacters", "quotemeta(s)", phpdoc!("quotemeta"), f_quotemeta, OneOf(&[1])),
    spec("sprintf", "sprintf", "Formatted string", "sprintf(format, ...)", phpdoc!("sprintf"), f_sprintf, AtLeast(1)),
    spec("str_pad", "str_pad", "Pad to a length", "str_pad(s, length[, pad[, type]])", phpdoc!("str-pad"), f_str_pad, OneOf(&[2, 3, 4])),
    spec("str_repeat", "str_repeat", "Repeat a string", "str_repeat(s, times)", phpdoc!("str-repeat"), f_str_repeat, OneOf(&[2])),
    spec("str_replace", "str_replace", "Replace all occurrences", "str_replace(search, replace, subject)", phpdoc!("str-replace"), f_str_replace, OneOf(&[3])),
    spec("strcasecmp", "strcasecmp", "Case-insensitive comparison", "strcasecmp(a, b)", phpdoc!("strcasecmp"), f_strcasecmp, OneOf(&[2])),
    spec("strcmp", "strcmp", "Binary-safe comparison", "strcmp(a, b)", phpdoc!("strcmp"), f_strcmp, OneOf(&[2])),
    spec("strip_tags", "strip_tags", "Remove markup tags", "strip_tags(s[, allowed])", phpdoc!("strip-tags"), f_strip_tags, OneOf(&[1, 2])),
    spec("stripos", "stripos", "Case-insensitive position", "stripos(haystack, needle[, offset])", phpdoc!("stripos"), f_stripos, OneOf(&[2, 3])),
    spec("stristr", "stristr", "Case-insensitive search", "stristr(haystack, needle[, before])", phpdoc!("stristr"), f_stristr, OneOf(&[2, 3])),
    spec("strlen", "strlen", "Length in characters", "strlen(s)", phpdoc!("strlen"), f_strlen, OneOf(&[1])),
    spec("strpos", "strpos", "Position of a substring", "strpos(haystack, needle[, offset])", phpdoc!("strpos"), f_strpos, OneOf(&[2, 3])),
    spec("strrev", "strrev", "Reverse", "strrev(s)", phpdoc!("strrev"), f_strrev, OneOf(&[1])),
    spec("strstr", "strstr", "Find a substring", "strstr(haystack, needle[, before])", phpdoc!("strstr"), f_strstr, OneOf(&[2, 3])),
    spec("strtolower", "strtolower", "Lowercase", "strtolower(s)", phpdoc!("strtolower"), f_strtolower, OneOf(&[1])),
    spec("strtoupper", "strtoupper", "Uppercase", "strtoupper(s)", phpdoc!("strtoupper"), f_strtoupper, OneOf(&[1])),
    spec("strtotime", "NA", "Parse a datetime string to a timestamp", "strtotime(s)", phpdoc!("strtotime"), f_strtotime, OneOf(&[1])),
    spec("substr", "substr", "Extract a substring", "substr(s, start[, length])", phpdoc!("substr"), f_substr, OneOf(&[2, 3])),
    spec("trim", "trim", "Trim both ends", "trim(s[, chars])", phpdoc!("trim"), f_trim, OneOf(&[1, 2])),
    spec("ltrim", "ltrim", "Trim the left end", "ltrim(s[, chars])", phpdoc!("ltrim"), f_ltrim, OneOf(&[1, 2])),
    spec("rtrim", "rtrim", "Trim the right end", "rtrim(s[, chars])", phpdoc!("rtrim"), f_rtrim, OneOf(&[1, 2])),
    spec("ucwords", "ucwords", "Uppercase the first letter of each word", "ucwords(s)", phpdoc!("ucwords"), f_ucwords, OneOf(&[1])),
    // Dates
    spec("date", "date", "Format a local timestamp", "date(format[, timestamp])", phpdoc!("date"), f_date, OneOf(&[1, 2])),
    spec("gmdate", "gmdate", "Format a UTC timestamp", "gmdate(format[, timestamp])", phpdoc!("gmdate"), f_gmdate, OneOf(&[1, 2])),
    spec("idate", "NA", "One date component as an integer", "idate(format[, timestamp])", phpdoc!("idate"), f_idate, OneOf(&[1, 2])),
    spec("mktime", "mktime", "Build a timestamp", "mktime([h[, i[, s[, month[, day[, year]]]]]])", phpdoc!("mktime"), f_mktime, OneOf(&[0, 1, 2, 3, 4, 5, 6])),
    spec("checkdate", "checkdate", "Validate a Gregorian date", "checkdate(month, day, year)", phpdoc!("checkdate"), f_checkdate, OneOf(&[3])),
    spec("time", "time", "Current timestamp", "time()", phpdoc!("time"), f_time, OneOf(&[0])),
    // Survey-specific
    spec("count", "count", "Count the non-empty arguments", "count(a, b, ...)", "", f_count, AtLeast(0)),
    spec("countif", "countif", "Count arguments equal to a value", "countif(value, a, b, ...)", "", f_countif, AtLeast(1)),
    spec("countifop", "countifop", "Count arguments matching an operator", "countifop(op, value, a, b, ...)", "", f_countifop, AtLeast(2)),
    spec("sum", "sum", "Sum the arguments", "sum(a, b, ...)", "", f_sum, AtLeast(0)),
    spec("sumifop", "sumifop", "Sum arguments matching an operator", "sumifop(op, value, a, b, ...)", "", f_sumifop, AtLeast(2)),
    spec("if", "if", "Conditional value", "if(test, then, else)", "", f_if, OneOf(&[3])),
    spec("implode", "implode", "Join arguments with a glue string", "implode(glue, a, b, ...)", phpdoc!("implode"), f_implode, AtLeast(1)),
    spec("join", "join", "Concatenate the arguments", "join(a, b, ...)", phpdoc!("join"), f_join, AtLeast(0)),
    spec("list", "list", "Comma-separated list of non-empty arguments", "list(a, b, ...)", "", f_list, AtLeast(1)),
    spec("stddev", "stddev", "Sample standard deviation", "stddev(a, b, ...)", "", f_stddev, AtLeast(0)),
    spec("unique", "unique", "Pairwise-distinct test", "unique(a, b, ...)", "", f_unique, AtLeast(0)),
    spec("fixnum", "fixnum", "Canonical numeric rendering", "fixnum(x)", "", f_fixnum, OneOf(&[1])),
    spec("is_empty", "is_empty", "Null, empty string, or false", "is_empty(x)", "", f_is_empty, OneOf(&[1])),
    spec("regexMatch", "regexMatch", "Regular-expression test", "regexMatch(pattern, input)", "", f_regex_match, OneOf(&[2])),
    spec("convert_value", "convert_value", "Nearest-neighbor list mapping", "convert_value(x, strict, fromList, toList)", "", f_convert_value, OneOf(&[4])),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Origin;

    fn n(x: f64) -> Operand {
        Operand::num(x, 0)
    }

    fn s(text: &str) -> Operand {
        Operand::new(Value::Str(text.to_string()), Origin::DqString, 0)
    }

    fn var(text: &str) -> Operand {
        Operand::new(Value::Str(text.to_string()), Origin::Word, 0)
    }

    fn call(name: &str, args: &[Operand]) -> Value {
        let spec = find_function(name).expect("function must be registered");
        dispatch(spec, args, false).expect("call must succeed")
    }

    #[test]
    fn arity_validation() {
        assert!(Arity::OneOf(&[1]).validate(1).is_ok());
        assert!(Arity::OneOf(&[1]).validate(0).is_err());
        assert!(Arity::OneOf(&[1, 2, 4]).validate(4).is_ok());
        assert!(Arity::OneOf(&[1, 2, 4]).validate(3).is_err());
        assert!(Arity::AtLeast(2).validate(2).is_ok());
        assert!(Arity::AtLeast(2).validate(9).is_ok());
        assert!(Arity::AtLeast(2).validate(1).is_err());

        // The message names both the allowed list and the passed count.
        let err = Arity::OneOf(&[1, 2]).validate(5).unwrap_err();
        assert!(err.contains("1 or 2"));
        assert!(err.contains("5 given"));
    }

    #[test]
    fn registry_metadata() {
        let spec = find_function("if").unwrap();
        assert_eq!(spec.client_name, "if");
        assert_eq!(spec.arity, Arity::OneOf(&[3]));
        assert!(spec.client_supported());

        let spec = find_function("strtotime").unwrap();
        assert!(!spec.client_supported());

        assert!(find_function("system").is_none());
        assert!(find_function("eval").is_none());

        // Names are unique.
        let mut seen = HashSet::new();
        for f in DEFAULT_FUNCTIONS {
            assert!(seen.insert(f.name), "duplicate registry name {}", f.name);
        }
    }

    #[test]
    fn parse_only_short_circuits_after_arity_check() {
        let spec = find_function("sqrt").unwrap();
        assert_eq!(dispatch(spec, &[s("boom")], true), Ok(Value::Num(1.0)));
        assert!(matches!(
            dispatch(spec, &[], true),
            Err(DispatchError::Arity(_))
        ));
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(call("abs", &[n(-3.0)]), Value::Num(3.0));
        assert_eq!(call("ceil", &[n(1.2)]), Value::Num(2.0));
        assert_eq!(call("floor", &[n(1.8)]), Value::Num(1.0));
        assert_eq!(call("pow", &[n(2.0), n(10.0)]), Value::Num(1024.0));
        assert_eq!(call("sqrt", &[n(9.0)]), Value::Num(3.0));
        assert_eq!(call("max", &[n(1.0), n(9.0), n(4.0)]), Value::Num(9.0));
        assert_eq!(call("min", &[n(1.0), n(9.0), n(4.0)]), Value::Num(1.0));
        assert_eq!(call("round", &[n(2.5)]), Value::Num(3.0));
        assert_eq!(call("round", &[n(1.2345), n(2.0)]), Value::Num(1.23));
        assert_eq!(call("atan2", &[n(0.0), n(1.0)]), Value::Num(0.0));
        assert!(matches!(call("pi", &[]), Value::Num(p) if (p - std::f64::consts::PI).abs() < 1e-12));
    }

    #[test]
    fn trig_coerces_or_nans() {
        assert_eq!(call("cos", &[n(0.0)]), Value::Num(1.0));
        assert_eq!(call("cos", &[var("0")]), Value::Num(1.0));
        assert!(matches!(call("sin", &[s("abc")]), Value::Num(x) if x.is_nan()));
        assert!(matches!(call("sqrt", &[n(-1.0)]), Value::Num(x) if x.is_nan()));
    }

    #[test]
    fn log_rejects_non_positive() {
        assert_eq!(call("log", &[n(std::f64::consts::E)]), Value::Num(1.0));
        assert_eq!(call("log", &[n(8.0), n(2.0)]), Value::Num(3.0));
        for bad in [n(0.0), n(-5.0), s("abc")] {
            assert!(matches!(call("log", &[bad]), Value::Num(x) if x.is_nan()));
        }
        assert!(matches!(call("log", &[n(8.0), n(1.0)]), Value::Num(x) if x.is_nan()));
    }

    #[test]
    fn rand_ranges() {
        for _ in 0..32 {
            match call("rand", &[n(3.0), n(5.0)]) {
                Value::Num(x) => assert!((3.0..=5.0).contains(&x)),
                other => panic!("expected number, got {:?}", other),
            }
        }
        assert_eq!(call("rand", &[n(5.0), n(3.0)]), Value::Bool(false));
    }

    #[test]
    fn intval_parses_leading_digits() {
        assert_eq!(call("intval", &[s("42abc")]), Value::Num(42.0));
        assert_eq!(call("intval", &[s("-7")]), Value::Num(-7.0));
        assert_eq!(call("intval", &[s("abc")]), Value::Num(0.0));
        assert_eq!(call("intval", &[s("ff"), n(16.0)]), Value::Num(255.0));
    }

    #[test]
    fn type_tests() {
        assert_eq!(call("is_int", &[n(4.0)]), Value::Bool(true));
        assert_eq!(call("is_int", &[n(4.5)]), Value::Bool(false));
        assert_eq!(call("is_int", &[var("12")]), Value::Bool(true));
        assert_eq!(call("is_int", &[var("")]), Value::Bool(false));
        assert_eq!(call("is_float", &[n(4.5)]), Value::Bool(true));
        assert_eq!(call("is_float", &[n(4.0)]), Value::Bool(false));
        assert_eq!(call("is_nan", &[s("abc")]), Value::Bool(true));
        assert_eq!(call("is_nan", &[s("")]), Value::Bool(false));
        assert_eq!(call("is_numeric", &[s("3.5")]), Value::Bool(true));
        assert_eq!(call("is_numeric", &[s("")]), Value::Bool(false));
        assert_eq!(call("is_numeric", &[s("abc")]), Value::Bool(false));
        assert_eq!(
            call("is_null", &[Operand::new(Value::Null, Origin::Number, 0)]),
            Value::Bool(true)
        );
        assert_eq!(call("is_string", &[s("x")]), Value::Bool(true));
        assert_eq!(call("is_string", &[n(1.0)]), Value::Bool(false));
    }

    #[test]
    fn string_escaping_functions() {
        assert_eq!(
            call("addslashes", &[s("it's \"x\"")]),
            Value::Str("it\\'s \\\"x\\\"".into())
        );
        assert_eq!(
            call("stripslashes", &[s("it\\'s \\\\ok")]),
            Value::Str("it's \\ok".into())
        );
        assert_eq!(
            call("htmlspecialchars", &[s("<a href=\"x\">&'</a>")]),
            Value::Str("&lt;a href=&quot;x&quot;&gt;&amp;&#039;&lt;/a&gt;".into())
        );
        assert_eq!(
            call("htmlspecialchars_decode", &[s("&lt;b&gt; &amp; &#039;")]),
            Value::Str("<b> & '".into())
        );
        assert_eq!(
            call("html_entity_decode", &[s("&#65;&nbsp;&lt;")]),
            Value::Str("A\u{a0}<".into())
        );
        assert_eq!(
            call("quotemeta", &[s("1+1=2?")]),
            Value::Str("1\\+1=2\\?".into())
        );
        assert_eq!(call("nl2br", &[s("a\nb")]), Value::Str("a<br />\nb".into()));
        assert_eq!(
            call("nl2br", &[s("a\r\nb")]),
            Value::Str("a<br />\r\nb".into())
        );
    }

    #[test]
    fn quoted_printable_round_trip() {
        assert_eq!(
            call("quoted_printable_encode", &[s("a=b\u{e9}")]),
            Value::Str("a=3Db=C3=A9".into())
        );
        assert_eq!(
            call("quoted_printable_decode", &[s("a=3Db=C3=A9")]),
            Value::Str("a=b\u{e9}".into())
        );
    }

    #[test]
    fn number_format_grouping() {
        assert_eq!(call("number_format", &[n(1234567.891)]), Value::Str("1,234,568".into()));
        assert_eq!(
            call("number_format", &[n(1234567.891), n(2.0)]),
            Value::Str("1,234,567.89".into())
        );
        assert_eq!(
            call("number_format", &[n(1234.5), n(1.0), s(","), s(".")]),
            Value::Str("1.234,5".into())
        );
        assert_eq!(call("number_format", &[n(-0.4)]), Value::Str("0".into()));
        assert_eq!(call("number_format", &[n(-1234.0)]), Value::Str("-1,234".into()));
    }

    #[test]
    fn sprintf_subset() {
        let cases: Vec<(&str, Vec<Operand>, &str)> = vec![
            ("hello %s", vec![s("world")], "hello world"),
            ("%d items", vec![n(3.7)], "3 items"),
            ("%05d", vec![n(42.0)], "00042"),
            ("%-5d|", vec![n(42.0)], "42   |"),
            ("%05d", vec![n(-42.0)], "-0042"),
            ("%+d %+d", vec![n(3.0), n(-3.0)], "+3 -3"),
            ("%.2f", vec![n(1.005)], "1.00"),
            ("%8.2f", vec![n(3.14159)], "    3.14"),
            ("%x %X %o %b", vec![n(255.0), n(255.0), n(8.0), n(5.0)], "ff FF 10 101"),
            ("%.3s", vec![s("abcdef")], "abc"),
            ("%'x6d", vec![n(12.0)], "xxxx12"),
            ("100%%", vec![], "100%"),
            ("%c", vec![n(65.0)], "A"),
            ("%e", vec![n(1500.0)], "1.500000e+3"),
        ];
        for (fmt, args, expected) in cases {
            let mut full = vec![s(fmt)];
            full.extend(args);
            assert_eq!(call("sprintf", &full), Value::Str(expected.into()), "{:?}", fmt);
        }
        let spec = find_function("sprintf").unwrap();
        assert!(matches!(
            dispatch(spec, &[s("%d %d"), n(1.0)], false),
            Err(DispatchError::Runtime(_))
        ));
    }

    #[test]
    fn padding_and_repetition() {
        assert_eq!(call("str_pad", &[s("5"), n(3.0)]), Value::Str("5  ".into()));
        assert_eq!(
            call("str_pad", &[s("5"), n(3.0), s("0"), n(0.0)]),
            Value::Str("005".into())
        );
        assert_eq!(
            call("str_pad", &[s("ab"), n(7.0), s("xy"), n(2.0)]),
            Value::Str("xyabxyx".into())
        );
        assert_eq!(call("str_pad", &[s("abcd"), n(2.0)]), Value::Str("abcd".into()));
        assert_eq!(call("str_repeat", &[s("ab"), n(3.0)]), Value::Str("ababab".into()));
        assert_eq!(call("str_repeat", &[s("ab"), n(-1.0)]), Value::Str("".into()));
    }

    #[test]
    fn search_and_compare() {
        assert_eq!(call("strlen", &[s("héllo")]), Value::Num(5.0));
        assert_eq!(call("strpos", &[s("hello"), s("ll")]), Value::Num(2.0));
        assert_eq!(call("strpos", &[s("hello"), s("x")]), Value::Bool(false));
        assert_eq!(call("strpos", &[s("ababab"), s("ab"), n(1.0)]), Value::Num(2.0));
        assert_eq!(call("stripos", &[s("HeLLo"), s("ll")]), Value::Num(2.0));
        assert_eq!(call("strstr", &[s("user@host"), s("@")]), Value::Str("@host".into()));
        assert_eq!(
            call("strstr", &[s("user@host"), s("@"), n(1.0)]),
            Value::Str("user".into())
        );
        assert_eq!(call("stristr", &[s("USER@HOST"), s("@host")]), Value::Str("@HOST".into()));
        assert_eq!(call("strstr", &[s("abc"), s("x")]), Value::Bool(false));
        assert_eq!(call("strcmp", &[s("a"), s("b")]), Value::Num(-1.0));
        assert_eq!(call("strcmp", &[s("b"), s("a")]), Value::Num(1.0));
        assert_eq!(call("strcasecmp", &[s("AbC"), s("abc")]), Value::Num(0.0));
        assert_eq!(call("strrev", &[s("héllo")]), Value::Str("olléh".into()));
    }

    #[test]
    fn substr_negative_indexes() {
        assert_eq!(call("substr", &[s("abcdef"), n(2.0)]), Value::Str("cdef".into()));
        assert_eq!(call("substr", &[s("abcdef"), n(2.0), n(2.0)]), Value::Str("cd".into()));
        assert_eq!(call("substr", &[s("abcdef"), n(-2.0)]), Value::Str("ef".into()));
        assert_eq!(call("substr", &[s("abcdef"), n(1.0), n(-2.0)]), Value::Str("bcd".into()));
        assert_eq!(call("substr", &[s("abcdef"), n(9.0)]), Value::Str("".into()));
        assert_eq!(call("substr", &[s("héllo"), n(1.0), n(2.0)]), Value::Str("él".into()));
    }

    #[test]
    fn trims_and_case() {
        assert_eq!(call("trim", &[s("  x  ")]), Value::Str("x".into()));
        assert_eq!(call("trim", &[s("xxhixx"), s("x")]), Value::Str("hi".into()));
        assert_eq!(call("ltrim", &[s("  x ")]), Value::Str("x ".into()));
        assert_eq!(call("rtrim", &[s(" x  ")]), Value::Str(" x".into()));
        assert_eq!(call("strtolower", &[s("AbC")]), Value::Str("abc".into()));
        assert_eq!(call("strtoupper", &[s("AbC")]), Value::Str("ABC".into()));
        assert_eq!(
            call("ucwords", &[s("hello wide  world")]),
            Value::Str("Hello Wide  World".into())
        );
    }

    #[test]
    fn strip_tags_with_allowlist() {
        assert_eq!(
            call("strip_tags", &[s("<p>Hi <b>there</b></p>")]),
            Value::Str("Hi there".into())
        );
        assert_eq!(
            call("strip_tags", &[s("<p>Hi <b>there</b></p>"), s("<b>")]),
            Value::Str("Hi <b>there</b>".into())
        );
        assert_eq!(call("strip_tags", &[s("a <unclosed")]), Value::Str("a ".into()));
    }

    #[test]
    fn string_replace() {
        assert_eq!(
            call("str_replace", &[s("o"), s("0"), s("foobor")]),
            Value::Str("f00b0r".into())
        );
        assert_eq!(
            call("str_replace", &[s(""), s("x"), s("ab")]),
            Value::Str("ab".into())
        );
    }

    #[test]
    fn date_formatting_is_deterministic_in_utc() {
        // 2021-03-04 05:06:07 UTC
        let ts = n(1614834367.0);
        assert_eq!(
            call("gmdate", &[s("Y-m-d H:i:s"), ts.clone()]),
            Value::Str("2021-03-04 05:06:07".into())
        );
        assert_eq!(call("gmdate", &[s("D l N w"), ts.clone()]), Value::Str("Thu Thursday 4 4".into()));
        assert_eq!(call("gmdate", &[s("j/n/y"), ts.clone()]), Value::Str("4/3/21".into()));
        assert_eq!(call("gmdate", &[s("M F t L"), ts.clone()]), Value::Str("Mar March 31 0".into()));
        assert_eq!(call("gmdate", &[s("g a A"), ts.clone()]), Value::Str("5 am AM".into()));
        assert_eq!(call("gmdate", &[s("U"), ts.clone()]), Value::Str("1614834367".into()));
        assert_eq!(call("gmdate", &[s(r"\Ymd"), ts]), Value::Str("Y0304".into()));
    }

    #[test]
    fn checkdate_bounds() {
        assert_eq!(call("checkdate", &[n(2.0), n(29.0), n(2020.0)]), Value::Bool(true));
        assert_eq!(call("checkdate", &[n(2.0), n(30.0), n(2020.0)]), Value::Bool(false));
        assert_eq!(call("checkdate", &[n(13.0), n(1.0), n(2020.0)]), Value::Bool(false));
        assert_eq!(call("checkdate", &[n(0.0), n(1.0), n(2020.0)]), Value::Bool(false));
    }

    #[test]
    fn strtotime_fixed_formats() {
        let parsed = call("strtotime", &[s("2021-03-04 05:06:07")]);
        assert!(matches!(parsed, Value::Num(_)));
        assert_eq!(call("strtotime", &[s("next fortnight")]), Value::Bool(false));
        // Date-only forms agree with each other.
        let iso = call("strtotime", &[s("2021-03-04")]);
        let dotted = call("strtotime", &[s("04.03.2021")]);
        assert_eq!(iso, dotted);
    }

    #[test]
    fn count_family() {
        assert_eq!(call("count", &[s(""), s("a"), s("b"), s("")]), Value::Num(2.0));
        assert_eq!(call("count", &[]), Value::Num(0.0));
        assert_eq!(
            call("countif", &[s("x"), s("x"), s("y"), s("x")]),
            Value::Num(2.0)
        );
        assert_eq!(
            call("countif", &[n(2.0), var("2"), var("3"), var("2")]),
            Value::Num(2.0)
        );
        assert_eq!(
            call("countifop", &[s(">"), n(2.0), n(1.0), n(2.0), n(3.0), n(4.0)]),
            Value::Num(2.0)
        );
        assert_eq!(
            call("countifop", &[s("RX"), s("^[a-z]+$"), s("aa"), s("1"), s("bb")]),
            Value::Num(2.0)
        );
        // Invalid regexes are silently a non-match.
        assert_eq!(
            call("countifop", &[s("RX"), s("("), s("aa"), s("(")]),
            Value::Num(0.0)
        );
    }

    #[test]
    fn sum_family() {
        assert_eq!(call("sum", &[n(1.0), var("2"), s("x")]), Value::Num(3.0));
        assert_eq!(call("sum", &[]), Value::Num(0.0));
        assert_eq!(
            call("sumifop", &[s(">="), n(2.0), n(1.0), n(2.0), n(5.0)]),
            Value::Num(7.0)
        );
        let sd = call("stddev", &[n(2.0), n(4.0), n(4.0), n(4.0), n(5.0), n(5.0), n(7.0), n(9.0)]);
        assert!(matches!(sd, Value::Num(x) if (x - (32.0f64 / 7.0).sqrt()).abs() < 1e-12));
        assert_eq!(call("stddev", &[n(5.0)]), Value::Num(0.0));
    }

    #[test]
    fn unique_list_join() {
        assert_eq!(call("unique", &[s("a"), s("b"), s("a")]), Value::Bool(false));
        assert_eq!(call("unique", &[s("a"), s(" a")]), Value::Bool(false)); // trimmed
        assert_eq!(call("unique", &[s("a"), s(""), s(""), s("b")]), Value::Bool(true));
        assert_eq!(call("list", &[s("a"), s(""), s("b")]), Value::Str("a, b".into()));
        assert_eq!(call("implode", &[s("-"), s("a"), s(""), s("b")]), Value::Str("a--b".into()));
        assert_eq!(call("join", &[s("a"), s("b"), s("c")]), Value::Str("abc".into()));
    }

    #[test]
    fn if_uses_truthiness() {
        assert_eq!(call("if", &[n(1.0), s("yes"), s("no")]), Value::Str("yes".into()));
        assert_eq!(call("if", &[s("0"), s("yes"), s("no")]), Value::Str("no".into()));
        assert_eq!(call("if", &[s(""), s("yes"), s("no")]), Value::Str("no".into()));
    }

    #[test]
    fn is_empty_rules() {
        assert_eq!(call("is_empty", &[s("")]), Value::Bool(true));
        assert_eq!(
            call("is_empty", &[Operand::new(Value::Null, Origin::Number, 0)]),
            Value::Bool(true)
        );
        assert_eq!(
            call("is_empty", &[Operand::new(Value::Bool(false), Origin::Number, 0)]),
            Value::Bool(true)
        );
        // "0" is NOT empty here, unlike host-language empty().
        assert_eq!(call("is_empty", &[s("0")]), Value::Bool(false));
        assert_eq!(call("is_empty", &[n(0.0)]), Value::Bool(false));
    }

    #[test]
    fn fixnum_normalizes_numerics() {
        assert_eq!(call("fixnum", &[var("007")]), Value::Num(7.0));
        assert_eq!(call("fixnum", &[var(" 1.50 ")]), Value::Num(1.5));
        assert_eq!(call("fixnum", &[var("abc")]), Value::Str("abc".into()));
        // The empty string is numeric-ish, so it canonicalizes to zero.
        assert_eq!(call("fixnum", &[var("")]), Value::Num(0.0));
    }

    #[test]
    fn regex_match_delimiters() {
        assert_eq!(call("regexMatch", &[s("^a+$"), s("aaa")]), Value::Bool(true));
        assert_eq!(call("regexMatch", &[s("/^a+$/"), s("aaa")]), Value::Bool(true));
        assert_eq!(call("regexMatch", &[s("^a+$"), s("bbb")]), Value::Bool(false));
        assert_eq!(call("regexMatch", &[s("("), s("x")]), Value::Bool(false));
    }

    #[test]
    fn convert_value_mapping() {
        let lists = [s("1,3,7"), s("one,three,seven")];
        assert_eq!(
            call("convert_value", &[n(3.0), n(1.0), lists[0].clone(), lists[1].clone()]),
            Value::Str("three".into())
        );
        assert_eq!(
            call("convert_value", &[n(4.0), n(1.0), lists[0].clone(), lists[1].clone()]),
            Value::Null
        );
        assert_eq!(
            call("convert_value", &[n(4.0), n(0.0), lists[0].clone(), lists[1].clone()]),
            Value::Str("three".into())
        );
        assert_eq!(
            call("convert_value", &[s("x"), n(0.0), lists[0].clone(), lists[1].clone()]),
            Value::Null
        );
        assert_eq!(
            call("convert_value", &[n(1.0), n(0.0), s("1,2"), s("a")]),
            Value::Null
        );
    }
}
