//! Representation kinds and flow-analysis type hints.
//!
//! A [`Repr`] names the static encoding a value currently has on the evaluation
//! stack or in a storage location. A [`TypeHint`] is the bitmask of dynamic
//! kinds upstream flow analysis believes a value may hold at a given point.

use std::fmt;

/// Index of a class name in the owning routine's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Statically distinguishable storage encoding of a dynamic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repr {
    Bool,
    /// Opcode-level 32-bit integer (switch indices, narrowed counters).
    Int32,
    Int64,
    Double,
    String,
    /// Append-optimized string buffer.
    MutableString,
    /// Unboxed int-or-double union used for arithmetic.
    Number,
    Array,
    /// Reference to an object, optionally of a known class.
    Object(Option<ClassId>),
    /// Fully tagged union of every other kind plus null.
    Value,
    /// Mutable reference cell wrapping a [`Repr::Value`].
    Alias,
}

impl Repr {
    /// The same representation with any class information dropped.
    pub fn erased(self) -> Repr {
        match self {
            Repr::Object(_) => Repr::Object(None),
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Repr::Bool => "bool",
            Repr::Int32 => "int32",
            Repr::Int64 => "int64",
            Repr::Double => "double",
            Repr::String => "string",
            Repr::MutableString => "mstring",
            Repr::Number => "number",
            Repr::Array => "array",
            Repr::Object(_) => "object",
            Repr::Value => "value",
            Repr::Alias => "alias",
        }
    }

    /// Dynamic kinds a value held in this representation may have.
    pub fn hint(self) -> TypeHint {
        match self {
            Repr::Bool => TypeHint::BOOL,
            Repr::Int32 | Repr::Int64 => TypeHint::INT64,
            Repr::Double => TypeHint::DOUBLE,
            Repr::String | Repr::MutableString => TypeHint::STRING,
            Repr::Number => TypeHint::NUMBER,
            Repr::Array => TypeHint::ARRAY,
            Repr::Object(_) => TypeHint::OBJECT,
            Repr::Value | Repr::Alias => TypeHint::ANY,
        }
    }

    /// Whether the representation is one of the tagged unions that defer to
    /// runtime helpers for most conversions.
    pub fn is_union(self) -> bool {
        matches!(self, Repr::Number | Repr::Value | Repr::Alias)
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repr::Object(Some(class)) => write!(f, "object<{}>", class),
            other => f.write_str(other.name()),
        }
    }
}

/// One dynamic kind of the source language's value domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintKind {
    Null,
    Bool,
    Int64,
    Double,
    String,
    Array,
    Object,
}

impl HintKind {
    /// Concrete representation that holds exactly this kind, if any.
    pub fn repr(self) -> Option<Repr> {
        match self {
            HintKind::Null => None,
            HintKind::Bool => Some(Repr::Bool),
            HintKind::Int64 => Some(Repr::Int64),
            HintKind::Double => Some(Repr::Double),
            HintKind::String => Some(Repr::String),
            HintKind::Array => Some(Repr::Array),
            HintKind::Object => Some(Repr::Object(None)),
        }
    }
}

/// Bitmask over [`HintKind`]s produced by flow analysis.
///
/// Packed into a byte: `[object:1][array:1][string:1][double:1][int64:1][bool:1][null:1]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeHint {
    bits: u8,
}

impl TypeHint {
    pub const NONE: TypeHint = TypeHint { bits: 0 };
    pub const NULL: TypeHint = TypeHint { bits: 1 << 0 };
    pub const BOOL: TypeHint = TypeHint { bits: 1 << 1 };
    pub const INT64: TypeHint = TypeHint { bits: 1 << 2 };
    pub const DOUBLE: TypeHint = TypeHint { bits: 1 << 3 };
    pub const STRING: TypeHint = TypeHint { bits: 1 << 4 };
    pub const ARRAY: TypeHint = TypeHint { bits: 1 << 5 };
    pub const OBJECT: TypeHint = TypeHint { bits: 1 << 6 };
    pub const NUMBER: TypeHint = TypeHint { bits: (1 << 2) | (1 << 3) };
    pub const ANY: TypeHint = TypeHint { bits: 0x7F };

    const NAMES: [(&'static str, HintKind); 7] = [
        ("null", HintKind::Null),
        ("bool", HintKind::Bool),
        ("int64", HintKind::Int64),
        ("double", HintKind::Double),
        ("string", HintKind::String),
        ("array", HintKind::Array),
        ("object", HintKind::Object),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self { bits: bits & 0x7F }
    }

    pub const fn bits(self) -> u8 {
        self.bits
    }

    pub fn of(kind: HintKind) -> Self {
        let shift = match kind {
            HintKind::Null => 0,
            HintKind::Bool => 1,
            HintKind::Int64 => 2,
            HintKind::Double => 3,
            HintKind::String => 4,
            HintKind::Array => 5,
            HintKind::Object => 6,
        };
        Self { bits: 1 << shift }
    }

    pub const fn union(self, other: TypeHint) -> TypeHint {
        TypeHint { bits: self.bits | other.bits }
    }

    pub const fn contains(self, other: TypeHint) -> bool {
        self.bits & other.bits == other.bits
    }

    /// True when every kind in `self` is also in `other`.
    pub const fn is_subset_of(self, other: TypeHint) -> bool {
        self.bits & !other.bits == 0
    }

    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub const fn is_singular(self) -> bool {
        self.bits.count_ones() == 1
    }

    /// The single kind this hint allows, if exactly one bit is set.
    pub fn singular(self) -> Option<HintKind> {
        if !self.is_singular() {
            return None;
        }
        let shift = self.bits.trailing_zeros() as usize;
        Some(Self::NAMES[shift].1)
    }

    /// Parse `int64|double`, `any`, `number` and friends.
    pub fn parse(text: &str) -> Option<TypeHint> {
        let mut hint = TypeHint::NONE;
        for part in text.split('|') {
            let part = part.trim();
            let bits = match part {
                "any" => TypeHint::ANY,
                "number" => TypeHint::NUMBER,
                "none" => TypeHint::NONE,
                _ => {
                    let (_, kind) = Self::NAMES.iter().find(|(name, _)| *name == part)?;
                    TypeHint::of(*kind)
                }
            };
            hint = hint.union(bits);
        }
        Some(hint)
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == TypeHint::ANY {
            return f.write_str("any");
        }
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (bit, (name, _)) in Self::NAMES.iter().enumerate() {
            if self.bits & (1 << bit) != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHint({})", self)
    }
}
