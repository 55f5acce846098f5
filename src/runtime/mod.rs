// This module is a reference model of the runtime the generated code calls into. DynValue is
// the source language's dynamic value domain and implements its weak-typing conversions:
// truthiness, integer and float coercion with leading-numeric string parsing, and the
// culture-aware formatting of floats that makes some string conversions need the execution
// context. Number is the unboxed int-or-double union. The Machine in machine.rs executes
// conversion plans against these semantics, which lets tests check that what the coercion
// engine emits computes the same result as converting the dynamic value directly.

//! Reference runtime model.

mod machine;

pub use machine::{Machine, RuntimeError, Slot};

use std::fmt;
use std::sync::Arc;

use crate::coerce::{ClassId, HintKind};

/// Significant digits used when formatting floats.
const DOUBLE_PRECISION: usize = 14;

/// Ambient execution state passed to context-dependent helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub decimal_separator: char,
}

impl Default for Context {
    fn default() -> Self {
        Self { decimal_separator: '.' }
    }
}

/// Reference to an object; `class` is `None` for the generic object that
/// scalar-to-object conversion produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub class: Option<ClassId>,
}

/// Unboxed number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Long(i64),
    Double(f64),
}

impl Number {
    pub fn to_bool(self) -> bool {
        match self {
            Number::Long(v) => v != 0,
            Number::Double(v) => v != 0.0,
        }
    }

    pub fn to_long(self) -> i64 {
        match self {
            Number::Long(v) => v,
            Number::Double(v) => double_to_long(v),
        }
    }

    pub fn to_double(self) -> f64 {
        match self {
            Number::Long(v) => v as f64,
            Number::Double(v) => v,
        }
    }

    pub fn to_string_in(self, ctx: &Context) -> String {
        match self {
            Number::Long(v) => v.to_string(),
            Number::Double(v) => format_double(v, ctx),
        }
    }

    pub fn into_value(self) -> DynValue {
        match self {
            Number::Long(v) => DynValue::Long(v),
            Number::Double(v) => DynValue::Double(v),
        }
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum DynValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(Arc<str>),
    Array(Vec<DynValue>),
    Object(ObjectRef),
}

impl DynValue {
    pub fn string(s: &str) -> Self {
        DynValue::String(Arc::from(s))
    }

    pub fn kind(&self) -> HintKind {
        match self {
            DynValue::Null => HintKind::Null,
            DynValue::Bool(_) => HintKind::Bool,
            DynValue::Long(_) => HintKind::Int64,
            DynValue::Double(_) => HintKind::Double,
            DynValue::String(_) => HintKind::String,
            DynValue::Array(_) => HintKind::Array,
            DynValue::Object(_) => HintKind::Object,
        }
    }

    /// Truthiness. A NaN double is truthy: it compares unequal to zero.
    pub fn to_bool(&self) -> bool {
        match self {
            DynValue::Null => false,
            DynValue::Bool(b) => *b,
            DynValue::Long(v) => *v != 0,
            DynValue::Double(v) => *v != 0.0,
            DynValue::String(s) => !(s.is_empty() || &**s == "0"),
            DynValue::Array(items) => !items.is_empty(),
            DynValue::Object(_) => true,
        }
    }

    pub fn to_long(&self) -> i64 {
        match self {
            DynValue::Null => 0,
            DynValue::Bool(b) => *b as i64,
            DynValue::Long(v) => *v,
            DynValue::Double(v) => double_to_long(*v),
            DynValue::String(s) => parse_numeric_prefix(s).map_or(0, Number::to_long),
            DynValue::Array(items) => !items.is_empty() as i64,
            DynValue::Object(_) => 1,
        }
    }

    pub fn to_double(&self) -> f64 {
        match self {
            DynValue::Double(v) => *v,
            DynValue::String(s) => parse_numeric_prefix(s).map_or(0.0, Number::to_double),
            other => other.to_long() as f64,
        }
    }

    pub fn to_number(&self) -> Number {
        match self {
            DynValue::Double(v) => Number::Double(*v),
            DynValue::String(s) => parse_numeric_prefix(s).unwrap_or(Number::Long(0)),
            other => Number::Long(other.to_long()),
        }
    }

    pub fn to_string_in(&self, ctx: &Context) -> String {
        match self {
            DynValue::Null => String::new(),
            DynValue::Bool(true) => "1".to_string(),
            DynValue::Bool(false) => String::new(),
            DynValue::Long(v) => v.to_string(),
            DynValue::Double(v) => format_double(*v, ctx),
            DynValue::String(s) => s.to_string(),
            DynValue::Array(_) => "Array".to_string(),
            DynValue::Object(_) => "Object".to_string(),
        }
    }

    /// Array view: null is empty, scalars and objects are wrapped.
    pub fn to_array(&self) -> Vec<DynValue> {
        match self {
            DynValue::Null => Vec::new(),
            DynValue::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn to_object(&self) -> ObjectRef {
        match self {
            DynValue::Object(obj) => *obj,
            _ => ObjectRef { class: None },
        }
    }
}

impl fmt::Display for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_in(&Context::default()))
    }
}

/// Truncation toward zero; non-finite values become 0 and out-of-range
/// values wrap modulo 2^64.
pub fn double_to_long(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let truncated = value.trunc();
    if truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        truncated as i64
    } else {
        truncated.rem_euclid(18_446_744_073_709_551_616.0) as u64 as i64
    }
}

/// Longest numeric prefix of `s` after leading whitespace, if any.
pub fn parse_numeric_prefix(s: &str) -> Option<Number> {
    let text = s.trim_start_matches([' ', '\t', '\n', '\r', '\x0b', '\x0c']);
    let bytes = text.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_end = digits_from(end);
    let mut has_digits = int_end > end;
    end = int_end;
    let mut floating = false;

    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        if frac_end > end + 1 || has_digits {
            has_digits |= frac_end > end + 1;
            floating = true;
            end = frac_end;
        }
    }
    if !has_digits {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            floating = true;
            end = exp_end;
        }
    }

    let number = &text[..end];
    if !floating {
        if let Ok(v) = number.parse::<i64>() {
            return Some(Number::Long(v));
        }
    }
    number.parse::<f64>().ok().map(Number::Double)
}

/// Shortest general-format rendering with 14 significant digits, using the
/// context's decimal separator.
pub fn format_double(value: f64, ctx: &Context) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.*e}", DOUBLE_PRECISION - 1, value.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    let mut out = String::new();
    if value < 0.0 {
        out.push('-');
    }
    let sep = ctx.decimal_separator;

    if exponent < -4 || exponent >= DOUBLE_PRECISION as i32 {
        out.push_str(&digits[..1]);
        out.push(sep);
        out.push_str(if digits.len() > 1 { &digits[1..] } else { "0" });
        out.push_str(&format!("E{}{}", if exponent < 0 { '-' } else { '+' }, exponent.abs()));
    } else if exponent >= 0 {
        let int_len = exponent as usize + 1;
        if digits.len() <= int_len {
            out.push_str(digits);
            out.extend(std::iter::repeat('0').take(int_len - digits.len()));
        } else {
            out.push_str(&digits[..int_len]);
            out.push(sep);
            out.push_str(&digits[int_len..]);
        }
    } else {
        out.push('0');
        out.push(sep);
        out.extend(std::iter::repeat('0').take((-exponent - 1) as usize));
        out.push_str(digits);
    }
    out
}
