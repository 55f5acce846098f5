//! Stack machine executing conversion plans.
//!
//! Only the instructions and helpers conversions can produce are modeled;
//! anything else is reported as [`RuntimeError::Unsupported`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use super::{double_to_long, Context, DynValue, Number, ObjectRef};
use crate::coerce::{self, ClassId, Repr, Step, TypeHint};
use crate::core::{Coercion, ErrorKind, Helper, Opcode};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("evaluation stack underflow")]
    StackUnderflow,

    #[error("{op} cannot operate on {found}")]
    TypeMismatch { op: String, found: &'static str },

    #[error("payload read as {expected} but the value is {found:?}")]
    PayloadMismatch { expected: Repr, found: DynValue },

    #[error("object is not an instance of {class}")]
    InvalidCast { class: ClassId },

    #[error("not modeled: {0}")]
    Unsupported(String),

    #[error("{0} value(s) left on the stack")]
    Unbalanced(usize),

    #[error(transparent)]
    Plan(#[from] ErrorKind),
}

/// One evaluation-stack entry.
#[derive(Debug, Clone)]
pub enum Slot {
    /// Bools and 32-bit integers.
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    MutStr(String),
    Number(Number),
    Array(Vec<DynValue>),
    Object(ObjectRef),
    Value(DynValue),
    Alias(Rc<RefCell<DynValue>>),
    Context(Context),
    /// Address of a storage location holding the inner slot.
    Ref(Box<Slot>),
    Null,
}

impl Slot {
    /// The slot holding `value` in representation `repr`, when `value` has
    /// a kind `repr` can hold.
    pub fn of(value: &DynValue, repr: Repr) -> Option<Slot> {
        let slot = match (value, repr) {
            (_, Repr::Value) => Slot::Value(value.clone()),
            (_, Repr::Alias) => Slot::Alias(Rc::new(RefCell::new(value.clone()))),
            (DynValue::Bool(b), Repr::Bool) => Slot::I32(*b as i32),
            (DynValue::Long(v), Repr::Int64) => Slot::I64(*v),
            (DynValue::Long(v), Repr::Int32) => Slot::I32(*v as i32),
            (DynValue::Double(v), Repr::Double) => Slot::F64(*v),
            (DynValue::Long(v), Repr::Number) => Slot::Number(Number::Long(*v)),
            (DynValue::Double(v), Repr::Number) => Slot::Number(Number::Double(*v)),
            (DynValue::String(s), Repr::String) => Slot::Str(s.clone()),
            (DynValue::String(s), Repr::MutableString) => Slot::MutStr(s.to_string()),
            (DynValue::Array(items), Repr::Array) => Slot::Array(items.clone()),
            (DynValue::Object(obj), Repr::Object(_)) => Slot::Object(*obj),
            _ => return None,
        };
        Some(slot)
    }

    fn name(&self) -> &'static str {
        match self {
            Slot::I32(_) => "int32",
            Slot::I64(_) => "int64",
            Slot::F64(_) => "double",
            Slot::Str(_) => "string",
            Slot::MutStr(_) => "mstring",
            Slot::Number(_) => "number",
            Slot::Array(_) => "array",
            Slot::Object(_) => "object",
            Slot::Value(_) => "value",
            Slot::Alias(_) => "alias",
            Slot::Context(_) => "context",
            Slot::Ref(_) => "address",
            Slot::Null => "null",
        }
    }

    /// Read the slot as a dynamic value, interpreting it as `repr`.
    pub fn to_value(&self, repr: Repr) -> Result<DynValue, RuntimeError> {
        let value = match (self, repr) {
            (Slot::I32(v), Repr::Bool) => DynValue::Bool(*v != 0),
            (Slot::I32(v), _) => DynValue::Long(*v as i64),
            (Slot::I64(v), _) => DynValue::Long(*v),
            (Slot::F64(v), _) => DynValue::Double(*v),
            (Slot::Str(s), _) => DynValue::String(s.clone()),
            (Slot::MutStr(s), _) => DynValue::string(s),
            (Slot::Number(n), _) => n.into_value(),
            (Slot::Array(items), _) => DynValue::Array(items.clone()),
            (Slot::Object(obj), _) => DynValue::Object(*obj),
            (Slot::Value(v), _) => v.clone(),
            (Slot::Alias(cell), _) => cell.borrow().clone(),
            (Slot::Ref(inner), _) => inner.to_value(repr)?,
            (Slot::Null, _) => DynValue::Null,
            (Slot::Context(_), _) => {
                return Err(RuntimeError::TypeMismatch { op: "read".to_string(), found: "context" })
            }
        };
        Ok(value)
    }
}

/// Executes instruction sequences over a [`Slot`] stack.
#[derive(Debug, Default)]
pub struct Machine {
    stack: Vec<Slot>,
    context: Context,
}

impl Machine {
    pub fn new(context: Context) -> Self {
        Self { stack: Vec::new(), context }
    }

    pub fn push(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    pub fn pop(&mut self) -> Result<Slot, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Convert `slot` as the generated code would.
    pub fn convert(
        &mut self,
        slot: Slot,
        from: Repr,
        hint: TypeHint,
        to: Repr,
    ) -> Result<Slot, RuntimeError> {
        let plan = coerce::plan(from, hint, to)?;
        self.push(slot);
        self.run(&plan.steps)?;
        self.take_result()
    }

    /// Convert the value stored at an address, through
    /// [`coerce::plan_by_address`].
    pub fn convert_by_address(
        &mut self,
        slot: Slot,
        kind: Repr,
        hint: TypeHint,
        to: Repr,
    ) -> Result<Slot, RuntimeError> {
        let plan = coerce::plan_by_address(kind, hint, to).ok_or_else(|| {
            RuntimeError::Unsupported(format!("{} to {} by address", kind, to))
        })?;
        self.push(Slot::Ref(Box::new(slot)));
        self.run(&plan.steps)?;
        self.take_result()
    }

    fn take_result(&mut self) -> Result<Slot, RuntimeError> {
        let result = self.pop()?;
        if !self.stack.is_empty() {
            return Err(RuntimeError::Unbalanced(self.stack.len()));
        }
        Ok(result)
    }

    pub fn run(&mut self, steps: &[Step]) -> Result<(), RuntimeError> {
        for step in steps {
            match step {
                Step::Op(op) => self.exec(op)?,
                Step::Call(helper) => self.call(*helper)?,
            }
        }
        Ok(())
    }

    fn exec(&mut self, op: &Opcode) -> Result<(), RuntimeError> {
        let slot = match op {
            Opcode::Nop => return Ok(()),
            Opcode::Pop => {
                self.pop()?;
                return Ok(());
            }
            Opcode::Dup => {
                let top = self.pop()?;
                self.push(top.clone());
                top
            }
            Opcode::LdcI4(v) => Slot::I32(*v),
            Opcode::LdcI8(v) => Slot::I64(*v),
            Opcode::LdcR8(v) => Slot::F64(*v),
            Opcode::LdStr(s) => Slot::Str(s.clone()),
            Opcode::LdNull => Slot::Null,
            Opcode::LdContext => Slot::Context(self.context.clone()),
            Opcode::Ceq | Opcode::Clt => {
                let right = self.pop()?;
                let left = self.pop()?;
                let less = *op == Opcode::Clt;
                let result = match (&left, &right) {
                    (Slot::I32(a), Slot::I32(b)) => if less { a < b } else { a == b },
                    (Slot::I64(a), Slot::I64(b)) => if less { a < b } else { a == b },
                    (Slot::F64(a), Slot::F64(b)) => if less { a < b } else { a == b },
                    _ => return Err(mismatch(op, &left)),
                };
                Slot::I32(result as i32)
            }
            Opcode::CltUn => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = match (&left, &right) {
                    (Slot::I32(a), Slot::I32(b)) => (*a as u32) < (*b as u32),
                    (Slot::I64(a), Slot::I64(b)) => (*a as u64) < (*b as u64),
                    (Slot::F64(a), Slot::F64(b)) => !(a >= b),
                    _ => return Err(mismatch(op, &left)),
                };
                Slot::I32(result as i32)
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                let right = self.pop()?;
                let left = self.pop()?;
                match (&left, &right) {
                    (Slot::F64(a), Slot::F64(b)) => Slot::F64(match op {
                        Opcode::Add => a + b,
                        Opcode::Sub => a - b,
                        _ => a * b,
                    }),
                    (Slot::I64(a), Slot::I64(b)) => Slot::I64(match op {
                        Opcode::Add => a.wrapping_add(*b),
                        Opcode::Sub => a.wrapping_sub(*b),
                        _ => a.wrapping_mul(*b),
                    }),
                    _ => return Err(mismatch(op, &left)),
                }
            }
            Opcode::ConvI4 => match self.pop()? {
                Slot::I32(v) => Slot::I32(v),
                Slot::I64(v) => Slot::I32(v as i32),
                Slot::F64(v) => Slot::I32(double_to_long(v) as i32),
                other => return Err(mismatch(op, &other)),
            },
            Opcode::ConvI8 => match self.pop()? {
                Slot::I32(v) => Slot::I64(v as i64),
                Slot::I64(v) => Slot::I64(v),
                Slot::F64(v) => Slot::I64(double_to_long(v)),
                other => return Err(mismatch(op, &other)),
            },
            Opcode::ConvR8 => match self.pop()? {
                Slot::I32(v) => Slot::F64(v as f64),
                Slot::I64(v) => Slot::F64(v as f64),
                Slot::F64(v) => Slot::F64(v),
                other => return Err(mismatch(op, &other)),
            },
            Opcode::CastClass(class) => match self.pop()? {
                Slot::Object(obj) if obj.class == Some(*class) => Slot::Object(obj),
                Slot::Object(_) => return Err(RuntimeError::InvalidCast { class: *class }),
                other => return Err(mismatch(op, &other)),
            },
            other => return Err(RuntimeError::Unsupported(other.to_string())),
        };
        self.push(slot);
        Ok(())
    }

    fn call(&mut self, helper: Helper) -> Result<(), RuntimeError> {
        let context = if helper.needs_context() {
            match self.pop()? {
                Slot::Context(ctx) => ctx,
                other => return Err(mismatch(&helper, &other)),
            }
        } else {
            self.context.clone()
        };

        let result = match helper {
            Helper::Convert { op, from, .. } => {
                let value = self.pop()?.to_value(from)?;
                match op {
                    Coercion::ToBoolean => Slot::I32(value.to_bool() as i32),
                    Coercion::ToLong => Slot::I64(value.to_long()),
                    Coercion::ToDouble => Slot::F64(value.to_double()),
                    Coercion::ToString => Slot::Str(Arc::from(value.to_string_in(&context))),
                    Coercion::ToNumber => Slot::Number(value.to_number()),
                    Coercion::ToClass => Slot::Object(value.to_object()),
                    Coercion::AsArray => Slot::Array(value.to_array()),
                }
            }
            Helper::Box(repr) => Slot::Value(self.pop()?.to_value(repr)?),
            Helper::FromObject => match self.pop()? {
                Slot::Object(obj) => Slot::Value(DynValue::Object(obj)),
                Slot::Null => Slot::Value(DynValue::Null),
                other => return Err(mismatch(&helper, &other)),
            },
            Helper::NumberFrom(_) => match self.pop()? {
                Slot::I64(v) => Slot::Number(Number::Long(v)),
                Slot::F64(v) => Slot::Number(Number::Double(v)),
                other => return Err(mismatch(&helper, &other)),
            },
            Helper::Payload { kind, .. } => {
                let value = self.pop()?.to_value(Repr::Value)?;
                Slot::of(&value, kind)
                    .ok_or(RuntimeError::PayloadMismatch { expected: kind, found: value })?
            }
            Helper::NullValue => Slot::Value(DynValue::Null),
            Helper::NewMutableString => match self.pop()? {
                Slot::Str(s) => Slot::MutStr(s.to_string()),
                other => return Err(mismatch(&helper, &other)),
            },
            Helper::NewAlias => {
                let value = self.pop()?.to_value(Repr::Value)?;
                Slot::Alias(Rc::new(RefCell::new(value)))
            }
            Helper::AliasValue => match self.pop()? {
                Slot::Alias(cell) => Slot::Value(cell.borrow().clone()),
                other => return Err(mismatch(&helper, &other)),
            },
            other => return Err(RuntimeError::Unsupported(other.to_string())),
        };
        self.push(result);
        Ok(())
    }
}

fn mismatch(op: &dyn std::fmt::Display, found: &Slot) -> RuntimeError {
    RuntimeError::TypeMismatch { op: op.to_string(), found: found.name() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(value: DynValue, from: Repr, to: Repr) -> DynValue {
        let mut machine = Machine::default();
        let slot = Slot::of(&value, from).unwrap();
        let result = machine.convert(slot, from, from.hint(), to).unwrap();
        result.to_value(to).unwrap()
    }

    #[test]
    fn test_nonzero_test() {
        assert_eq!(run(DynValue::Long(0), Repr::Int64, Repr::Bool), DynValue::Bool(false));
        assert_eq!(run(DynValue::Long(-1), Repr::Int64, Repr::Bool), DynValue::Bool(true));
        assert_eq!(run(DynValue::Double(f64::NAN), Repr::Double, Repr::Bool), DynValue::Bool(true));
    }

    #[test]
    fn test_context_formatting() {
        let mut machine = Machine::new(Context { decimal_separator: ',' });
        let result = machine
            .convert(Slot::F64(1.5), Repr::Double, TypeHint::DOUBLE, Repr::String)
            .unwrap();
        assert_eq!(result.to_value(Repr::String).unwrap(), DynValue::string("1,5"));
    }

    #[test]
    fn test_payload_mismatch_is_reported() {
        let mut machine = Machine::default();
        let err = machine
            .convert(Slot::Value(DynValue::string("x")), Repr::Value, TypeHint::INT64, Repr::Double)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::PayloadMismatch { expected: Repr::Int64, .. }));
    }

    #[test]
    fn test_checked_cast() {
        let class = ClassId(2);
        let mut machine = Machine::default();
        let value = Slot::Value(DynValue::Object(ObjectRef { class: Some(ClassId(1)) }));
        let err = machine.convert(value, Repr::Value, TypeHint::ANY, Repr::Object(Some(class))).unwrap_err();
        assert_eq!(err, RuntimeError::InvalidCast { class });
    }

    #[test]
    fn test_unsigned_compare_rejects_negative_index() {
        let in_table = |index: i64| {
            let mut machine = Machine::default();
            machine.push(Slot::I64(index));
            machine.run(&[Step::Op(Opcode::LdcI8(3)), Step::Op(Opcode::CltUn)]).unwrap();
            machine.take_result().unwrap().to_value(Repr::Bool).unwrap()
        };
        assert_eq!(in_table(0), DynValue::Bool(true));
        assert_eq!(in_table(2), DynValue::Bool(true));
        assert_eq!(in_table(3), DynValue::Bool(false));
        assert_eq!(in_table(-1), DynValue::Bool(false));
        assert_eq!(in_table(i64::MIN), DynValue::Bool(false));
    }

    #[test]
    fn test_by_address_matches_by_value() {
        for value in [DynValue::Long(3), DynValue::Double(-0.5), DynValue::string("12")] {
            let mut machine = Machine::default();
            let by_ref = machine
                .convert_by_address(Slot::Value(value.clone()), Repr::Value, TypeHint::ANY, Repr::Int64)
                .unwrap();
            assert_eq!(by_ref.to_value(Repr::Int64).unwrap(), DynValue::Long(value.to_long()));
        }
    }
}
