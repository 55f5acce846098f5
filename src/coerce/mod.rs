// This module implements the value representation and coercion engine. Given the
// representation a value currently has on the stack, the flow-analysis hint for it and the
// representation the consumer needs, plan() returns the minimal instruction sequence that
// performs the conversion under the source language's weak-typing rules. Aliases are
// dereferenced first; a singular hint on a union (generic value or number) is exploited by
// reading the hinted payload directly instead of going through a generic helper; and
// plan_by_address() offers the address-taking variant used when the operand lives in an
// addressable place of union kind. Combinations the table marks as errors are reported as
// UnsupportedConversion: they can only arise from a type-system defect upstream.

//! Value representation and coercion engine.
//!
//! The conversion table, rows are sources and columns targets:
//!
//! | from \ to | bool | int64 | double | string | value | number | array | object |
//! |---|---|---|---|---|---|---|---|---|
//! | int64 | nonzero | identity | exact | invariant fmt | box | widen | error | box, ToClass |
//! | double | nonzero | truncate | identity | context fmt | box | widen | error | box, ToClass |
//! | string | helper | parse | parse | identity | box | error | error | error |
//! | number | helper | helper | helper | helper + ctx | box | identity | error | ToClass |
//! | value | helper | helper | helper | helper + ctx | identity | ToNumber | AsArray | ToClass |
//! | array | error | error | error | error | box | error | identity | ToClass |
//! | object | error | error | error | error | FromObject | error | error | downcast |
//!
//! `bool` sources widen to `0`/`1`; `mstring` sources materialize a string
//! first; `alias` sources are dereferenced to `value`. Every `ToClass` is
//! followed by a checked cast when the target names a class.

mod place;
mod repr;

pub use place::Place;
pub use repr::{ClassId, HintKind, Repr, TypeHint};

use std::sync::Arc;

use crate::core::{Coercion, ErrorKind, Helper, Opcode};

/// One instruction of a conversion plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Op(Opcode),
    Call(Helper),
}

/// Instruction sequence converting the top of the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub steps: Vec<Step>,
    /// Representation left on the stack.
    pub result: Repr,
    /// A singular hint selected a cheaper path.
    pub specialized: bool,
}

impl Conversion {
    fn new(result: Repr) -> Self {
        Self { steps: Vec::new(), result, specialized: false }
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    fn op(&mut self, op: Opcode) {
        self.steps.push(Step::Op(op));
    }

    fn call(&mut self, helper: Helper) {
        if helper.needs_context() {
            self.steps.push(Step::Op(Opcode::LdContext));
        }
        self.steps.push(Step::Call(helper));
    }

    fn cast(&mut self, class: Option<ClassId>) {
        if let Some(class) = class {
            self.op(Opcode::CastClass(class));
        }
    }
}

/// Plan the conversion of a value of representation `from`, hinted `hint`,
/// into `to`.
pub fn plan(from: Repr, hint: TypeHint, to: Repr) -> Result<Conversion, ErrorKind> {
    let mut conv = Conversion::new(to);
    let unsupported = || ErrorKind::UnsupportedConversion { from, hint, to };

    let mut current = from;
    if current == Repr::Alias && to != Repr::Alias {
        conv.call(Helper::AliasValue);
        current = Repr::Value;
    }

    match to {
        Repr::Alias if current != Repr::Alias => {
            lower(&mut conv, current, hint, Repr::Value).map_err(|_| unsupported())?;
            conv.call(Helper::NewAlias);
            return Ok(conv);
        }
        Repr::MutableString if current != Repr::MutableString => {
            lower(&mut conv, current, hint, Repr::String).map_err(|_| unsupported())?;
            conv.call(Helper::NewMutableString);
            return Ok(conv);
        }
        _ => {}
    }

    if current == Repr::MutableString && to != Repr::MutableString {
        conv.call(Helper::convert(Coercion::ToString, Repr::MutableString));
        current = Repr::String;
    }

    lower(&mut conv, current, hint, to).map_err(|_| unsupported())?;
    log::trace!("conversion {} ({}) -> {}: {} step(s)", from, hint, to, conv.steps.len());
    Ok(conv)
}

/// Plan a conversion whose receiver is passed by address.
///
/// Applies to places of kind `number` or `value` converted to `bool`,
/// `int64`, `double` or `string`; returns `None` when the by-value path
/// should be used instead, including when `hint` is singular and the payload
/// can be read directly.
pub fn plan_by_address(kind: Repr, hint: TypeHint, to: Repr) -> Option<Conversion> {
    if !matches!(kind, Repr::Number | Repr::Value) {
        return None;
    }
    if specialize(kind, hint, to).is_some() {
        return None;
    }
    let op = match to {
        Repr::Bool => Coercion::ToBoolean,
        Repr::Int64 => Coercion::ToLong,
        Repr::Double => Coercion::ToDouble,
        Repr::String => Coercion::ToString,
        _ => return None,
    };
    let mut conv = Conversion::new(to);
    conv.call(Helper::convert_by_ref(op, kind));
    Some(conv)
}

/// Concrete kind a union of representation `from` can be read as, given a
/// singular `hint`. `Some(None)` means the value is known to be null.
fn specialization(from: Repr, hint: TypeHint, to: Repr) -> Option<Option<Repr>> {
    if from == to || to == Repr::Alias {
        return None;
    }
    let kind = hint.singular()?;
    match (from, kind) {
        (Repr::Value, HintKind::Null) => Some(None),
        (Repr::Value, kind) => kind.repr().map(Some),
        (Repr::Number, HintKind::Int64 | HintKind::Double) => kind.repr().map(Some),
        _ => None,
    }
}

fn null_default(to: Repr) -> Option<Opcode> {
    match to {
        Repr::Bool | Repr::Int32 => Some(Opcode::LdcI4(0)),
        Repr::Int64 => Some(Opcode::LdcI8(0)),
        Repr::Double => Some(Opcode::LdcR8(0.0)),
        Repr::String => Some(Opcode::LdStr(Arc::from(""))),
        _ => None,
    }
}

/// Payload read selected by a singular `hint`, kept only when the hinted
/// kind has its own path to `to`.
fn specialize(from: Repr, hint: TypeHint, to: Repr) -> Option<Conversion> {
    let mut conv = Conversion::new(to);
    conv.specialized = true;
    match specialization(from, hint, to)? {
        None => {
            conv.op(Opcode::Pop);
            conv.op(null_default(to)?);
        }
        Some(kind) => {
            conv.call(Helper::Payload { from, kind });
            table(&mut conv, kind, to).ok()?;
        }
    }
    Some(conv)
}

fn lower(conv: &mut Conversion, from: Repr, hint: TypeHint, to: Repr) -> Result<(), ()> {
    if let Some(special) = specialize(from, hint, to) {
        conv.steps.extend(special.steps);
        conv.specialized = true;
        return Ok(());
    }
    table(conv, from, to)
}

fn table(conv: &mut Conversion, from: Repr, to: Repr) -> Result<(), ()> {
    use Repr::*;
    match (from, to) {
        (a, b) if a == b => {}
        (Object(_), Object(None)) => {}
        (Object(_), Object(class)) => conv.cast(class),

        (Bool, Int32) => {}
        (Bool, Int64) => conv.op(Opcode::ConvI8),
        (Bool, Double) => conv.op(Opcode::ConvR8),
        (Bool, String) => conv.call(Helper::convert(Coercion::ToString, Bool)),
        (Bool, Value) => conv.call(Helper::Box(Bool)),
        (Bool, Number) => {
            conv.op(Opcode::ConvI8);
            conv.call(Helper::NumberFrom(Int64));
        }
        (Bool, Object(class)) => boxed_to_class(conv, Bool, class),

        (Int32, Bool) => nonzero(conv, Opcode::LdcI4(0)),
        (Int32, to) => {
            conv.op(Opcode::ConvI8);
            table(conv, Int64, to)?;
        }

        (Int64, Bool) => nonzero(conv, Opcode::LdcI8(0)),
        (Int64, Int32) => conv.op(Opcode::ConvI4),
        (Int64, Double) => conv.op(Opcode::ConvR8),
        (Int64, String) => conv.call(Helper::convert(Coercion::ToString, Int64)),
        (Int64, Value) => conv.call(Helper::Box(Int64)),
        (Int64, Number) => conv.call(Helper::NumberFrom(Int64)),
        (Int64, Object(class)) => boxed_to_class(conv, Int64, class),

        (Double, Bool) => nonzero(conv, Opcode::LdcR8(0.0)),
        (Double, Int32) => conv.op(Opcode::ConvI4),
        (Double, Int64) => conv.op(Opcode::ConvI8),
        (Double, String) => conv.call(Helper::convert(Coercion::ToString, Double)),
        (Double, Value) => conv.call(Helper::Box(Double)),
        (Double, Number) => conv.call(Helper::NumberFrom(Double)),
        (Double, Object(class)) => boxed_to_class(conv, Double, class),

        (String, Bool) => conv.call(Helper::convert(Coercion::ToBoolean, String)),
        (String, Int32) => {
            conv.call(Helper::convert(Coercion::ToLong, String));
            conv.op(Opcode::ConvI4);
        }
        (String, Int64) => conv.call(Helper::convert(Coercion::ToLong, String)),
        (String, Double) => conv.call(Helper::convert(Coercion::ToDouble, String)),
        (String, Value) => conv.call(Helper::Box(String)),

        (Number | Value, Bool) => conv.call(Helper::convert(Coercion::ToBoolean, from)),
        (Number | Value, Int32) => {
            conv.call(Helper::convert(Coercion::ToLong, from));
            conv.op(Opcode::ConvI4);
        }
        (Number | Value, Int64) => conv.call(Helper::convert(Coercion::ToLong, from)),
        (Number | Value, Double) => conv.call(Helper::convert(Coercion::ToDouble, from)),
        (Number | Value, String) => conv.call(Helper::convert(Coercion::ToString, from)),
        (Number, Value) => conv.call(Helper::Box(Number)),
        (Number | Value | Array, Object(class)) => {
            conv.call(Helper::convert(Coercion::ToClass, from));
            conv.cast(class);
        }
        (Value, Number) => conv.call(Helper::convert(Coercion::ToNumber, Value)),
        (Value, Array) => conv.call(Helper::convert(Coercion::AsArray, Value)),

        (Array, Value) => conv.call(Helper::Box(Array)),
        (Object(_), Value) => conv.call(Helper::FromObject),

        _ => return Err(()),
    }
    Ok(())
}

/// `value != 0` for a scalar of the constant's type, leaving a bool.
fn nonzero(conv: &mut Conversion, zero: Opcode) {
    conv.op(zero);
    conv.op(Opcode::Ceq);
    conv.op(Opcode::LdcI4(0));
    conv.op(Opcode::Ceq);
}

fn boxed_to_class(conv: &mut Conversion, from: Repr, class: Option<ClassId>) {
    conv.call(Helper::Box(from));
    conv.call(Helper::convert(Coercion::ToClass, Repr::Value));
    conv.cast(class);
}
