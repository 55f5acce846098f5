//! Addressable storage locations.
//!
//! A [`Place`] knows how to load, store and take the address of one storage
//! location, and the representation the location holds. Places of
//! [`Repr::Alias`] are written through: storing assigns the cell's value
//! rather than rebinding the cell.

use std::sync::Arc;

use super::{Repr, TypeHint};
use crate::core::{InstructionSink, LocalId, Opcode};

/// Field of an alias cell holding its current value.
const ALIAS_VALUE_FIELD: &str = "Value";

#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local { local: LocalId, repr: Repr, hint: TypeHint },
    Param { index: u16, repr: Repr, hint: TypeHint },
    /// Field of the execution context. Context fields are properties of the
    /// runtime and have no stable address.
    Field { name: Arc<str>, repr: Repr, hint: TypeHint },
}

impl Place {
    pub fn repr(&self) -> Repr {
        match self {
            Place::Local { repr, .. } | Place::Param { repr, .. } | Place::Field { repr, .. } => *repr,
        }
    }

    pub fn hint(&self) -> TypeHint {
        match self {
            Place::Local { hint, .. } | Place::Param { hint, .. } | Place::Field { hint, .. } => *hint,
        }
    }

    /// Representation the value must have between
    /// [`emit_store_prepare`](Place::emit_store_prepare) and
    /// [`emit_store`](Place::emit_store).
    pub fn store_repr(&self) -> Repr {
        match self.repr() {
            Repr::Alias => Repr::Value,
            repr => repr,
        }
    }

    /// Whether [`Place::emit_store_prepare`] pushes anything, in which case a
    /// value already on the stack must be spilled before storing it.
    pub fn has_store_prefix(&self) -> bool {
        self.repr() == Repr::Alias || matches!(self, Place::Field { .. })
    }

    pub fn has_address(&self) -> bool {
        !matches!(self, Place::Field { .. })
    }

    /// Push the stored value, in [`Place::repr`].
    pub fn emit_load<S: InstructionSink + ?Sized>(&self, sink: &mut S) {
        match self {
            Place::Local { local, .. } => sink.load_local(*local),
            Place::Param { index, .. } => sink.emit_opcode(Opcode::LdArg(*index)),
            Place::Field { name, .. } => {
                sink.emit_opcode(Opcode::LdContext);
                sink.emit_opcode(Opcode::LdFld(name.clone()));
            }
        }
    }

    /// Push a managed reference to the storage. Only valid when
    /// [`Place::has_address`] holds.
    pub fn emit_load_address<S: InstructionSink + ?Sized>(&self, sink: &mut S) {
        match self {
            Place::Local { local, .. } => sink.load_local_address(*local),
            Place::Param { index, .. } => sink.emit_opcode(Opcode::LdArgA(*index)),
            Place::Field { name, .. } => {
                sink.emit_opcode(Opcode::LdContext);
                sink.emit_opcode(Opcode::LdFldA(name.clone()));
            }
        }
    }

    /// Push whatever the store needs below the value.
    pub fn emit_store_prepare<S: InstructionSink + ?Sized>(&self, sink: &mut S) {
        if self.repr() == Repr::Alias {
            self.emit_load(sink);
            return;
        }
        if let Place::Field { .. } = self {
            sink.emit_opcode(Opcode::LdContext);
        }
    }

    /// Pop the value (in [`Place::store_repr`]) into the storage.
    pub fn emit_store<S: InstructionSink + ?Sized>(&self, sink: &mut S) {
        if self.repr() == Repr::Alias {
            sink.emit_opcode(Opcode::StFld(Arc::from(ALIAS_VALUE_FIELD)));
            return;
        }
        match self {
            Place::Local { local, .. } => sink.store_local(*local),
            Place::Param { index, .. } => sink.emit_opcode(Opcode::StArg(*index)),
            Place::Field { name, .. } => sink.emit_opcode(Opcode::StFld(name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DepthTracker, Insn, Listing};

    #[test]
    fn test_local_store_balance() {
        let mut sink = DepthTracker::new(Listing::new());
        let local = sink.declare_local(Repr::Int64);
        let place = Place::Local { local, repr: Repr::Int64, hint: TypeHint::INT64 };
        place.emit_store_prepare(&mut sink);
        sink.emit_opcode(Opcode::LdcI8(4));
        place.emit_store(&mut sink);
        assert_eq!(sink.depth(), 0);
        assert_eq!(
            sink.into_inner().insns(),
            &[Insn::Op(Opcode::LdcI8(4)), Insn::StoreLocal(local)]
        );
    }

    #[test]
    fn test_alias_writes_through() {
        let mut sink = DepthTracker::new(Listing::new());
        let place = Place::Param { index: 1, repr: Repr::Alias, hint: TypeHint::ANY };
        assert_eq!(place.store_repr(), Repr::Value);
        place.emit_store_prepare(&mut sink);
        sink.emit_opcode(Opcode::LdNull);
        place.emit_store(&mut sink);
        assert_eq!(sink.depth(), 0);
        let listing = sink.into_inner();
        assert_eq!(listing.insns()[0], Insn::Op(Opcode::LdArg(1)));
        assert_eq!(listing.insns()[2], Insn::Op(Opcode::StFld(Arc::from("Value"))));
    }

    #[test]
    fn test_context_field() {
        let mut sink = DepthTracker::new(Listing::new());
        let place = Place::Field { name: Arc::from("counter"), repr: Repr::Value, hint: TypeHint::ANY };
        assert!(!place.has_address());
        place.emit_store_prepare(&mut sink);
        place.emit_load(&mut sink);
        place.emit_store(&mut sink);
        assert_eq!(sink.depth(), 0);
    }
}
