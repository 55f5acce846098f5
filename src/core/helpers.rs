// This module models the runtime helper library that generated code calls into: coercion
// helpers (ToBoolean, ToLong, ToDouble, ToString, ToNumber, ToClass, AsArray), boxing
// constructors, unchecked payload accessors used when a type hint is singular, and the
// operational helpers for strings, arrays, aliases and foreach enumerators. Each Helper
// knows its stack signature so the depth tracker can account for calls. HelperResolver is
// the resolution service the generator consumes; HelperRegistry is the process-wide
// implementation, a create-if-absent table guarded by a lock scoped to the registry so
// routines compiled on different worker threads resolve the same helper to the same id.

use std::fmt;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::coerce::Repr;

/// Coercion operations offered by the runtime for union representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coercion {
    ToBoolean,
    ToLong,
    ToDouble,
    ToString,
    /// Numeric view of a value; the runtime rejects non-numeric operands.
    ToNumber,
    ToClass,
    AsArray,
}

impl Coercion {
    pub fn name(self) -> &'static str {
        match self {
            Coercion::ToBoolean => "ToBoolean",
            Coercion::ToLong => "ToLong",
            Coercion::ToDouble => "ToDouble",
            Coercion::ToString => "ToString",
            Coercion::ToNumber => "ToNumber",
            Coercion::ToClass => "ToClass",
            Coercion::AsArray => "AsArray",
        }
    }
}

/// Arithmetic on [`Repr::Number`] operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

/// A runtime helper method referenced by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    /// Coerce a value of representation `from`. With `by_ref` the receiver is
    /// passed by address instead of by value.
    Convert { op: Coercion, from: Repr, by_ref: bool },
    /// Wrap a concrete representation into a generic value.
    Box(Repr),
    /// Generic value holding an arbitrary object reference.
    FromObject,
    /// Widen `Int64` or `Double` into a number.
    NumberFrom(Repr),
    /// Unchecked read of the `kind` payload of a union known to hold it.
    Payload { from: Repr, kind: Repr },
    NullValue,
    NewMutableString,
    MutableStringAppend,
    NewAlias,
    AliasValue,
    NewArray,
    ArrayAdd,
    Arith(ArithOp),
    Concat,
    LooseEquals,
    LooseLessThan,
    Echo,
    GetEnumerator,
    EnumeratorMoveNext,
    EnumeratorCurrentValue,
    EnumeratorCurrentKey,
}

impl Helper {
    pub fn convert(op: Coercion, from: Repr) -> Helper {
        Helper::Convert { op, from: from.erased(), by_ref: false }
    }

    pub fn convert_by_ref(op: Coercion, from: Repr) -> Helper {
        Helper::Convert { op, from: from.erased(), by_ref: true }
    }

    /// Whether the helper takes the ambient execution context as its last
    /// argument. String formatting of floating values is culture dependent.
    pub fn needs_context(&self) -> bool {
        match self {
            Helper::Convert { op: Coercion::ToString, from, .. } => {
                matches!(from, Repr::Double | Repr::Number | Repr::Value)
            }
            Helper::Echo | Helper::GetEnumerator => true,
            _ => false,
        }
    }

    /// `(arguments, returns a value)`.
    pub fn signature(&self) -> (i32, bool) {
        let ctx = self.needs_context() as i32;
        match self {
            Helper::Convert { .. } => (1 + ctx, true),
            Helper::Box(_)
            | Helper::FromObject
            | Helper::NumberFrom(_)
            | Helper::Payload { .. }
            | Helper::NewMutableString
            | Helper::NewAlias
            | Helper::AliasValue
            | Helper::EnumeratorMoveNext
            | Helper::EnumeratorCurrentValue
            | Helper::EnumeratorCurrentKey => (1, true),
            Helper::GetEnumerator => (1 + ctx, true),
            Helper::NullValue | Helper::NewArray => (0, true),
            Helper::MutableStringAppend | Helper::ArrayAdd => (2, false),
            Helper::Echo => (2, false),
            Helper::Arith(_) | Helper::Concat | Helper::LooseEquals | Helper::LooseLessThan => {
                (2, true)
            }
        }
    }
}

impl fmt::Display for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Helper::Convert { op, from, by_ref } => {
                let amp = if *by_ref { "&" } else { "" };
                let ctx = if self.needs_context() { ", Context" } else { "" };
                write!(f, "Convert.{}({}{}{})", op.name(), from, amp, ctx)
            }
            Helper::Box(repr) => write!(f, "Value.Create({})", repr),
            Helper::FromObject => f.write_str("Value.FromObject(object)"),
            Helper::NumberFrom(repr) => write!(f, "Number.Create({})", repr),
            Helper::Payload { from, kind } => write!(f, "{}.As{}", from, kind.name()),
            Helper::NullValue => f.write_str("Value.Null"),
            Helper::NewMutableString => f.write_str("MutableString.Create(string)"),
            Helper::MutableStringAppend => f.write_str("MutableString.Append(string)"),
            Helper::NewAlias => f.write_str("Alias.Create(value)"),
            Helper::AliasValue => f.write_str("Alias.Value"),
            Helper::NewArray => f.write_str("Array.Create()"),
            Helper::ArrayAdd => f.write_str("Array.Add(value)"),
            Helper::Arith(op) => write!(f, "Number.{:?}(number, number)", op),
            Helper::Concat => f.write_str("String.Concat(string, string)"),
            Helper::LooseEquals => f.write_str("Compare.LooseEquals(value, value)"),
            Helper::LooseLessThan => f.write_str("Compare.LessThan(value, value)"),
            Helper::Echo => f.write_str("Context.Echo(string)"),
            Helper::GetEnumerator => f.write_str("Operators.GetForeachEnumerator(value, Context)"),
            Helper::EnumeratorMoveNext => f.write_str("Enumerator.MoveNext()"),
            Helper::EnumeratorCurrentValue => f.write_str("Enumerator.CurrentValue"),
            Helper::EnumeratorCurrentKey => f.write_str("Enumerator.CurrentKey"),
        }
    }
}

/// A resolved helper: the symbol id handed out by the resolver plus the
/// helper it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HelperRef {
    pub id: u32,
    pub helper: Helper,
}

/// Resolution service for runtime helpers.
pub trait HelperResolver {
    fn resolve(&self, helper: Helper) -> HelperRef;
}

#[derive(Default)]
struct RegistryInner {
    ids: HashMap<Helper, u32>,
    helpers: Vec<Helper>,
}

/// Process-wide helper symbol cache shared by concurrently compiled routines.
#[derive(Default)]
pub struct HelperRegistry {
    inner: Mutex<RegistryInner>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct helpers resolved so far.
    pub fn len(&self) -> usize {
        self.inner.lock().helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Helpers in resolution order.
    pub fn helpers(&self) -> Vec<Helper> {
        self.inner.lock().helpers.clone()
    }

    pub fn get(&self, id: u32) -> Option<Helper> {
        self.inner.lock().helpers.get(id as usize).copied()
    }
}

impl HelperResolver for HelperRegistry {
    fn resolve(&self, helper: Helper) -> HelperRef {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.ids.get(&helper) {
            return HelperRef { id, helper };
        }
        let id = inner.helpers.len() as u32;
        inner.helpers.push(helper);
        inner.ids.insert(helper, id);
        log::trace!("helper #{} synthesized: {}", id, helper);
        HelperRef { id, helper }
    }
}
