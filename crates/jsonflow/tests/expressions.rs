use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::types::{Arity, ItemType};
use jsonflow::{
    AtomicType, BuiltinCatalogue, EngineConfig, EngineContext, ErrorCode, Expr, Item, Module, Query, SequenceType,
};
use rstest::rstest;

fn engine() -> EngineContext {
    EngineContext::in_memory(EngineConfig::default()).unwrap()
}

fn eval(main: Expr) -> jsonflow::Result<Vec<Item>> {
    let query = Query::new(Module::new(main), BuiltinCatalogue)?;
    Ok(query.evaluate(&engine())?.items().to_vec())
}

fn text(main: Expr) -> String {
    match &eval(call("string", vec![main])).unwrap()[..] {
        [Item::Atomic(a)] => a.string_value(),
        other => panic!("expected one string, got {other:?}"),
    }
}

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::from).collect()
}

fn parsed(json: &str) -> Expr {
    call("json-parse", vec![lit(json)])
}

#[rstest]
fn json_parse_builds_items() {
    let out = eval(lookup(parsed(r#"{"a": [1, 2], "b": "x"}"#), "b")).unwrap();
    assert_eq!(out, [Item::from("x")]);
    assert_eq!(eval(parsed("[]")).unwrap(), [Item::array(vec![])]);
}

#[rstest]
fn json_parse_of_nothing_is_nothing() {
    assert!(eval(call("json-parse", vec![empty()])).unwrap().is_empty());
}

#[rstest]
fn json_parse_reports_malformed_input() {
    let err = eval(parsed(r#"{"a": "#)).unwrap_err();
    assert_eq!(err.code, ErrorCode::JsonParse);
    let err = eval(call("json-parse", vec![lit(1_i64)])).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
#[case(lit(true), "true")]
#[case(lit(42_i64), "42")]
#[case(lit(Item::Atomic(jsonflow::AtomicValue::Null)), "null")]
#[case(empty(), "")]
#[case(arith(ArithmeticOp::Div, lit(7_i64), lit(2_i64)), "3.5")]
#[case(concat(lit("a"), lit(1_i64)), "a1")]
#[case(concat(empty(), lit("b")), "b")]
fn string_values(#[case] expr: Expr, #[case] expected: &str) {
    assert_eq!(text(expr), expected);
}

#[rstest]
fn string_of_a_sequence_is_a_type_error() {
    let err = eval(call("string", vec![range(lit(1_i64), lit(2_i64))])).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
#[case::first_operand(concat(seq(vec![lit("b"), lit("c")]), lit("a")))]
#[case::second_operand(concat(lit("a"), seq(vec![lit("b"), lit("c")])))]
#[case::object(concat(lit("a"), parsed("{}")))]
fn concat_rejects_operands_that_are_not_one_atomic_value(#[case] expr: Expr) {
    let err = eval(expr).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

fn letters() -> Expr {
    seq(vec![lit("a"), lit("b"), lit("c"), lit("d")])
}

#[rstest]
#[case::second(2, &["a", "c", "d"])]
#[case::first(1, &["b", "c", "d"])]
#[case::last(4, &["a", "b", "c"])]
#[case::past_the_end(10, &["a", "b", "c", "d"])]
#[case::zero(0, &["a", "b", "c", "d"])]
#[case::negative(-1, &["a", "b", "c", "d"])]
fn remove_skips_one_local_position(#[case] position: i64, #[case] expected: &[&str]) {
    let out = eval(call("remove", vec![letters(), lit(position)])).unwrap();
    assert_eq!(out, expected.iter().copied().map(Item::from).collect::<Vec<_>>());
}

#[rstest]
fn remove_requires_an_integer_position() {
    let err = eval(call("remove", vec![letters(), lit("2")])).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
fn cast_and_castable() {
    assert_eq!(eval(cast(lit("12"), AtomicType::Integer)).unwrap(), ints(&[12]));
    assert_eq!(eval(castable(lit("12x"), AtomicType::Integer)).unwrap(), [Item::from(false)]);
    assert_eq!(eval(castable(lit("12"), AtomicType::Double)).unwrap(), [Item::from(true)]);
    let err = eval(cast(lit("12x"), AtomicType::Integer)).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCast);
}

fn integers() -> SequenceType {
    SequenceType::new(ItemType::Atomic(AtomicType::Integer), Arity::OneOrMore)
}

#[rstest]
#[case(range(lit(1_i64), lit(3_i64)), integers(), true)]
#[case(range(lit(1_i64), lit(3_i64)), SequenceType::one(ItemType::Atomic(AtomicType::Integer)), false)]
#[case(lit(1_i64), SequenceType::one(ItemType::Atomic(AtomicType::Decimal)), true)]
#[case(empty(), SequenceType::empty(), true)]
#[case(parsed("[1]"), SequenceType::one(ItemType::Json), true)]
#[case(parsed("[1]"), SequenceType::one(ItemType::Object), false)]
fn instance_of_checks_item_type_and_arity(#[case] operand: Expr, #[case] ty: SequenceType, #[case] expected: bool) {
    assert_eq!(eval(instance_of(operand, ty)).unwrap(), [Item::from(expected)]);
}

fn describe(operand: Expr) -> Expr {
    typeswitch(
        operand,
        vec![
            (
                Some("o"),
                vec![SequenceType::one(ItemType::Object)],
                lookup(var("o"), "kind"),
            ),
            (
                Some("a"),
                vec![SequenceType::one(ItemType::Array)],
                call("count", vec![unbox(var("a"))]),
            ),
        ],
        (None, lit("other")),
    )
}

#[rstest]
fn typeswitch_binds_the_matching_case_variable() {
    assert_eq!(eval(describe(parsed(r#"{"kind": "point"}"#))).unwrap(), [Item::from("point")]);
    assert_eq!(eval(describe(parsed("[1, 2, 3]"))).unwrap(), ints(&[3]));
    assert_eq!(eval(describe(lit(1_i64))).unwrap(), [Item::from("other")]);
}

#[rstest]
fn positional_and_boolean_predicates() {
    let numbers = seq(vec![lit(10_i64), lit(20_i64), lit(30_i64)]);
    assert_eq!(eval(predicate(numbers, lit(2_i64))).unwrap(), ints(&[20]));
    let large = predicate(range(lit(1_i64), lit(10_i64)), cmp(ComparisonOp::Gt, context_item(), lit(7_i64)));
    assert_eq!(eval(large).unwrap(), ints(&[8, 9, 10]));
}

#[rstest]
fn array_lookup_and_unboxing() {
    assert_eq!(eval(array_lookup(parsed(r#"["a", "b"]"#), lit(2_i64))).unwrap(), [Item::from("b")]);
    assert!(eval(array_lookup(parsed(r#"["a", "b"]"#), lit(3_i64))).unwrap().is_empty());
    assert_eq!(eval(unbox(parsed("[1, [2], 3]"))).unwrap().len(), 3);
    assert!(eval(lookup(lit(1_i64), "a")).unwrap().is_empty());
}

#[rstest]
fn date_time_arithmetic() {
    let month = arith(
        ArithmeticOp::Add,
        cast(lit("2024-01-31T10:00:00Z"), AtomicType::DateTime),
        cast(lit("P1M"), AtomicType::YearMonthDuration),
    );
    assert_eq!(text(month), "2024-02-29T10:00:00Z");

    let elapsed = arith(
        ArithmeticOp::Sub,
        cast(lit("2024-01-02T00:00:00Z"), AtomicType::DateTime),
        cast(lit("2024-01-01T12:00:00Z"), AtomicType::DateTime),
    );
    assert_eq!(text(elapsed), "PT12H");
}

#[rstest]
fn integer_division_by_zero() {
    let err = eval(arith(ArithmeticOp::IDiv, lit(1_i64), lit(0_i64))).unwrap_err();
    assert_eq!(err.code, ErrorCode::DivisionByZero);
    let err = eval(arith(ArithmeticOp::Mod, lit(1_i64), lit(0_i64))).unwrap_err();
    assert_eq!(err.code, ErrorCode::DivisionByZero);
}

fn local_numbers() -> Expr {
    range(lit(1_i64), lit(12_i64))
}

fn distributed_numbers() -> Expr {
    call("parallelize", vec![local_numbers(), lit(3_i64)])
}

fn nth(src: Expr) -> Expr {
    predicate(src, lit(5_i64))
}

fn odd(src: Expr) -> Expr {
    predicate(
        src,
        cmp(ComparisonOp::Eq, arith(ArithmeticOp::Mod, context_item(), lit(2_i64)), lit(1_i64)),
    )
}

fn pairs(src: Expr) -> Expr {
    let wrapped = flwor()
        .for_("x", src)
        .return_(array(Some(seq(vec![var("x"), arith(ArithmeticOp::Mul, var("x"), lit(10_i64))]))));
    unbox(wrapped)
}

fn second_members(src: Expr) -> Expr {
    let wrapped = flwor()
        .for_("x", src)
        .return_(array(Some(seq(vec![var("x"), lit("second")]))));
    array_lookup(wrapped, lit(2_i64))
}

#[rstest]
#[case::nth(nth)]
#[case::odd(odd)]
#[case::pairs(pairs)]
#[case::second_members(second_members)]
fn postfix_over_collections_matches_local_results(#[case] pipeline: fn(Expr) -> Expr) {
    let local = eval(pipeline(local_numbers())).unwrap();
    let distributed = eval(pipeline(distributed_numbers())).unwrap();
    assert!(!local.is_empty());
    assert_eq!(local, distributed);
}
