//! Conversion plans executed on the reference runtime agree with the
//! dynamic value semantics, whichever path the planner picks.

use proptest::prelude::*;

use dyncg::coerce::{self, HintKind};
use dyncg::runtime::{Context, DynValue, Machine, ObjectRef, Slot};
use dyncg::{ErrorKind, Repr, TypeHint};

const TARGETS: [Repr; 4] = [Repr::Bool, Repr::Int64, Repr::Double, Repr::String];

fn samples() -> Vec<DynValue> {
    vec![
        DynValue::Null,
        DynValue::Bool(true),
        DynValue::Bool(false),
        DynValue::Long(0),
        DynValue::Long(1),
        DynValue::Long(-1),
        DynValue::Long(i64::MAX),
        DynValue::Double(0.0),
        DynValue::Double(1.5),
        DynValue::Double(-1.7),
        DynValue::Double(f64::NAN),
        DynValue::Double(1e20),
        DynValue::string(""),
        DynValue::string("0"),
        DynValue::string("a"),
        DynValue::string("12abc"),
        DynValue::string(" 3.5"),
    ]
}

fn containers() -> Vec<DynValue> {
    vec![
        DynValue::Array(vec![]),
        DynValue::Array(vec![DynValue::Long(1), DynValue::string("x")]),
        DynValue::Object(ObjectRef { class: None }),
    ]
}

fn expected(value: &DynValue, to: Repr, ctx: &Context) -> DynValue {
    match to {
        Repr::Bool => DynValue::Bool(value.to_bool()),
        Repr::Int64 => DynValue::Long(value.to_long()),
        Repr::Double => DynValue::Double(value.to_double()),
        Repr::String => DynValue::string(&value.to_string_in(ctx)),
        other => panic!("no expectation for {}", other),
    }
}

fn same(a: &DynValue, b: &DynValue) -> bool {
    match (a, b) {
        (DynValue::Double(x), DynValue::Double(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

fn run(ctx: &Context, slot: Slot, from: Repr, hint: TypeHint, to: Repr) -> DynValue {
    let mut machine = Machine::new(ctx.clone());
    let result = machine
        .convert(slot, from, hint, to)
        .unwrap_or_else(|e| panic!("{} ({}) -> {}: {}", from, hint, to, e));
    result.to_value(to).unwrap()
}

#[test]
fn test_generic_value_path() {
    for ctx in [Context::default(), Context { decimal_separator: ',' }] {
        for value in samples() {
            for to in TARGETS {
                let got = run(&ctx, Slot::Value(value.clone()), Repr::Value, TypeHint::ANY, to);
                let want = expected(&value, to, &ctx);
                assert!(same(&got, &want), "{:?} -> {}: got {:?}, want {:?}", value, to, got, want);
            }
        }
    }
}

#[test]
fn test_singular_hint_path_matches_generic() {
    let ctx = Context::default();
    for value in samples() {
        let hint = TypeHint::of(value.kind());
        for to in TARGETS {
            let conversion = coerce::plan(Repr::Value, hint, to).unwrap();
            assert!(conversion.specialized, "{} with hint {} was not specialized", to, hint);
            let got = run(&ctx, Slot::Value(value.clone()), Repr::Value, hint, to);
            assert!(same(&got, &expected(&value, to, &ctx)), "{:?} -> {}: got {:?}", value, to, got);
        }
    }
}

#[test]
fn test_container_hint_falls_back_to_generic() {
    let ctx = Context::default();
    for value in containers() {
        let hint = TypeHint::of(value.kind());
        for to in TARGETS {
            let conversion = coerce::plan(Repr::Value, hint, to).unwrap();
            assert!(!conversion.specialized, "{} with hint {} has no payload cell", to, hint);
            let want = expected(&value, to, &ctx);
            let hinted = run(&ctx, Slot::Value(value.clone()), Repr::Value, hint, to);
            let generic = run(&ctx, Slot::Value(value.clone()), Repr::Value, TypeHint::ANY, to);
            assert!(same(&hinted, &want), "{:?} -> {}: got {:?}, want {:?}", value, to, hinted, want);
            assert!(same(&generic, &want), "{:?} -> {}: got {:?}", value, to, generic);

            let mut machine = Machine::new(ctx.clone());
            let by_address = machine
                .convert_by_address(Slot::Value(value.clone()), Repr::Value, hint, to)
                .unwrap()
                .to_value(to)
                .unwrap();
            assert!(same(&by_address, &want), "{:?} -> {} by address: got {:?}", value, to, by_address);
        }
    }
}

#[test]
fn test_concrete_sources() {
    let ctx = Context::default();
    for value in samples() {
        let Some(repr) = value.kind().repr() else { continue };
        for to in TARGETS {
            let slot = Slot::of(&value, repr).unwrap();
            let got = run(&ctx, slot, repr, repr.hint(), to);
            assert!(same(&got, &expected(&value, to, &ctx)), "{} {:?} -> {}: got {:?}", repr, value, to, got);
        }
    }
}

#[test]
fn test_address_path_matches_value_path() {
    let ctx = Context::default();
    for value in samples() {
        for to in TARGETS {
            let mut machine = Machine::new(ctx.clone());
            let got = machine
                .convert_by_address(Slot::Value(value.clone()), Repr::Value, TypeHint::ANY, to)
                .unwrap()
                .to_value(to)
                .unwrap();
            assert!(same(&got, &expected(&value, to, &ctx)));
        }
    }
}

#[test]
fn test_alias_and_mutable_string() {
    let ctx = Context::default();
    let alias = run(&ctx, Slot::Value(DynValue::Long(7)), Repr::Value, TypeHint::ANY, Repr::Alias);
    assert_eq!(alias, DynValue::Long(7));

    let mut machine = Machine::new(ctx.clone());
    let cell = machine
        .convert(Slot::Value(DynValue::Double(2.5)), Repr::Value, TypeHint::ANY, Repr::Alias)
        .unwrap();
    let back = machine.convert(cell, Repr::Alias, TypeHint::ANY, Repr::String).unwrap();
    assert_eq!(back.to_value(Repr::String).unwrap(), DynValue::string("2.5"));

    let buffer = run(&ctx, Slot::I64(12), Repr::Int64, TypeHint::INT64, Repr::MutableString);
    assert_eq!(buffer, DynValue::string("12"));
}

#[test]
fn test_boxing_keeps_truthiness_and_truncation() {
    let ctx = Context::default();
    for value in samples() {
        let Some(repr) = value.kind().repr() else { continue };
        let direct = run(&ctx, Slot::of(&value, repr).unwrap(), repr, repr.hint(), Repr::Bool);
        let boxed = run(&ctx, Slot::of(&value, repr).unwrap(), repr, repr.hint(), Repr::Value);
        let via_value = run(&ctx, Slot::Value(boxed), Repr::Value, TypeHint::ANY, Repr::Bool);
        assert_eq!(direct, via_value, "{:?}", value);
    }

    let long = run(&ctx, Slot::F64(-1.7), Repr::Double, TypeHint::DOUBLE, Repr::Int64);
    let DynValue::Long(n) = long else { panic!("expected a long, got {:?}", long) };
    let double = run(&ctx, Slot::I64(n), Repr::Int64, TypeHint::INT64, Repr::Double);
    let DynValue::Double(d) = double else { panic!("expected a double, got {:?}", double) };
    let again = run(&ctx, Slot::F64(d), Repr::Double, TypeHint::DOUBLE, Repr::Int64);
    assert_eq!(again, DynValue::Long(-1));
}

#[test]
fn test_unsupported_cells_are_rejected() {
    let mut machine = Machine::default();
    let err = machine
        .convert(Slot::Array(vec![]), Repr::Array, TypeHint::ARRAY, Repr::Bool)
        .unwrap_err();
    assert_eq!(
        err,
        dyncg::runtime::RuntimeError::Plan(ErrorKind::UnsupportedConversion {
            from: Repr::Array,
            hint: TypeHint::ARRAY,
            to: Repr::Bool,
        })
    );

    let object = DynValue::Object(ObjectRef { class: None });
    assert_eq!(object.kind(), HintKind::Object);
    assert!(coerce::plan(Repr::Object(None), TypeHint::OBJECT, Repr::Int64).is_err());
}

proptest! {
    #[test]
    fn prop_long_double_long(x in any::<f64>()) {
        let ctx = Context::default();
        let long = run(&ctx, Slot::F64(x), Repr::Double, TypeHint::DOUBLE, Repr::Int64);
        let DynValue::Long(n) = long else { panic!("expected a long") };
        let double = run(&ctx, Slot::I64(n), Repr::Int64, TypeHint::INT64, Repr::Double);
        let DynValue::Double(d) = double else { panic!("expected a double") };
        let again = run(&ctx, Slot::F64(d), Repr::Double, TypeHint::DOUBLE, Repr::Int64);
        // Integers beyond 2^53 lose bits through the double.
        if n.unsigned_abs() <= 1 << 53 {
            prop_assert_eq!(again, DynValue::Long(n));
        }
    }

    #[test]
    fn prop_hinted_and_generic_agree(n in any::<i64>(), to in 0usize..4) {
        let ctx = Context::default();
        let to = TARGETS[to];
        let value = DynValue::Long(n);
        let generic = run(&ctx, Slot::Value(value.clone()), Repr::Value, TypeHint::ANY, to);
        let hinted = run(&ctx, Slot::Value(value), Repr::Value, TypeHint::INT64, to);
        prop_assert!(same(&generic, &hinted));
    }
}
