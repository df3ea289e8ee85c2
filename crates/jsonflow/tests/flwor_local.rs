use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::{BuiltinCatalogue, EngineConfig, EngineContext, ErrorCode, Expr, Item, Module, Query};
use rstest::rstest;

fn engine() -> EngineContext {
    EngineContext::in_memory(EngineConfig::default()).unwrap()
}

fn eval(main: Expr) -> Vec<Item> {
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    query.evaluate(&engine()).unwrap().items().to_vec()
}

fn eval_err(main: Expr) -> ErrorCode {
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    query.evaluate(&engine()).unwrap_err().code
}

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::from).collect()
}

fn nums(values: &[i64]) -> Expr {
    seq(values.iter().map(|v| lit(*v)).collect())
}

#[rstest]
fn for_return_maps_each_item() {
    let out = eval(
        flwor()
            .for_("x", range(lit(1_i64), lit(4_i64)))
            .return_(arith(ArithmeticOp::Mul, var("x"), lit(10_i64))),
    );
    assert_eq!(out, ints(&[10, 20, 30, 40]));
}

#[rstest]
fn positional_variable_is_one_based() {
    let out = eval(
        flwor()
            .for_at("x", "i", seq(vec![lit("a"), lit("b"), lit("c")]))
            .return_(var("i")),
    );
    assert_eq!(out, ints(&[1, 2, 3]));
}

#[rstest]
fn allowing_empty_binds_the_empty_sequence_once() {
    let out = eval(
        flwor()
            .for_allowing_empty("x", empty())
            .return_(call("count", vec![var("x")])),
    );
    assert_eq!(out, ints(&[0]));
}

#[rstest]
fn for_without_allowing_empty_produces_no_tuples() {
    let out = eval(flwor().for_("x", empty()).return_(lit(1_i64)));
    assert!(out.is_empty());
}

#[rstest]
fn nested_for_is_a_cartesian_product() {
    let out = eval(
        flwor()
            .for_("x", nums(&[1, 2]))
            .for_("y", nums(&[10, 20]))
            .return_(arith(ArithmeticOp::Add, var("x"), var("y"))),
    );
    assert_eq!(out, ints(&[11, 21, 12, 22]));
}

#[rstest]
fn let_binds_whole_sequences() {
    let out = eval(
        flwor()
            .let_("xs", range(lit(1_i64), lit(5_i64)))
            .return_(call("count", vec![var("xs")])),
    );
    assert_eq!(out, ints(&[5]));
}

#[rstest]
fn where_filters_on_effective_boolean_value() {
    let out = eval(
        flwor()
            .for_("x", range(lit(1_i64), lit(10_i64)))
            .where_(cmp(
                ComparisonOp::Eq,
                arith(ArithmeticOp::Mod, var("x"), lit(3_i64)),
                lit(0_i64),
            ))
            .return_(var("x")),
    );
    assert_eq!(out, ints(&[3, 6, 9]));
}

#[rstest]
fn group_by_collects_non_key_variables() {
    let out = eval(
        flwor()
            .for_("x", range(lit(1_i64), lit(6_i64)))
            .group_by(vec![("k", Some(arith(ArithmeticOp::Mod, var("x"), lit(2_i64))))])
            .return_(object(vec![
                (lit("k"), var("k")),
                (lit("n"), call("count", vec![var("x")])),
                (lit("xs"), var("x")),
            ])),
    );
    assert_eq!(
        out,
        vec![
            Item::object([
                ("k", Item::from(1_i64)),
                ("n", Item::from(3_i64)),
                ("xs", Item::array(ints(&[1, 3, 5]))),
            ]),
            Item::object([
                ("k", Item::from(0_i64)),
                ("n", Item::from(3_i64)),
                ("xs", Item::array(ints(&[2, 4, 6]))),
            ]),
        ]
    );
}

#[rstest]
fn group_by_treats_equal_numbers_of_different_kinds_as_one_key() {
    let out = eval(
        flwor()
            .for_("x", seq(vec![lit(1_i64), lit(1.0_f64), lit(2_i64)]))
            .group_by(vec![("x", None)])
            .return_(var("x")),
    );
    assert_eq!(out.len(), 2);
}

#[rstest]
fn group_by_empty_key_forms_its_own_group() {
    let out = eval(
        flwor()
            .for_("o", seq(vec![
                object(vec![(lit("a"), lit(1_i64))]),
                object(vec![(lit("b"), lit(2_i64))]),
                object(vec![(lit("b"), lit(3_i64))]),
            ]))
            .group_by(vec![("k", Some(lookup(var("o"), "a")))])
            .return_(call("count", vec![var("o")])),
    );
    assert_eq!(out, ints(&[1, 2]));
}

#[rstest]
fn order_by_is_stable_and_honours_direction() {
    let out = eval(
        flwor()
            .for_("x", nums(&[3, 1, 2]))
            .order_by(vec![(var("x"), true)])
            .return_(var("x")),
    );
    assert_eq!(out, ints(&[3, 2, 1]));

    let out = eval(
        flwor()
            .for_at("x", "i", nums(&[2, 1, 2, 1]))
            .order_by(vec![(var("x"), false)])
            .return_(var("i")),
    );
    assert_eq!(out, ints(&[2, 4, 1, 3]));
}

#[rstest]
fn order_by_puts_empty_keys_first() {
    let out = eval(
        flwor()
            .for_("o", seq(vec![
                object(vec![(lit("a"), lit(2_i64))]),
                object(vec![]),
                object(vec![(lit("a"), lit(1_i64))]),
            ]))
            .order_by(vec![(lookup(var("o"), "a"), false)])
            .return_(call("count", vec![lookup(var("o"), "a")])),
    );
    assert_eq!(out, ints(&[0, 1, 1]));
}

#[rstest]
fn order_by_rejects_mixed_key_kinds() {
    let code = eval_err(
        flwor()
            .for_("x", seq(vec![lit(1_i64), lit("one")]))
            .order_by(vec![(var("x"), false)])
            .return_(var("x")),
    );
    assert_eq!(code, ErrorCode::Type);
}

#[rstest]
fn count_clause_numbers_tuples_after_filtering() {
    let out = eval(
        flwor()
            .for_("x", range(lit(1_i64), lit(6_i64)))
            .where_(cmp(ComparisonOp::Gt, var("x"), lit(3_i64)))
            .count("c")
            .return_(array(Some(seq(vec![var("c"), var("x")])))),
    );
    assert_eq!(
        out,
        vec![
            Item::array(ints(&[1, 4])),
            Item::array(ints(&[2, 5])),
            Item::array(ints(&[3, 6])),
        ]
    );
}

#[rstest]
fn nested_flwor_sees_outer_variables() {
    let inner = flwor()
        .for_("y", range(lit(1_i64), var("x")))
        .return_(var("y"));
    let out = eval(
        flwor()
            .for_("x", nums(&[1, 2, 3]))
            .return_(call("count", vec![inner])),
    );
    assert_eq!(out, ints(&[1, 2, 3]));
}

#[rstest]
fn predicates_bind_the_context_item() {
    let out = eval(predicate(
        range(lit(1_i64), lit(6_i64)),
        cmp(ComparisonOp::Gt, context_item(), lit(4_i64)),
    ));
    assert_eq!(out, ints(&[5, 6]));
}

#[rstest]
fn object_constructor_wraps_multiple_values_and_nulls_empty_ones() {
    let out = eval(object(vec![(lit("many"), nums(&[1, 2])), (lit("none"), empty())]));
    assert_eq!(
        out,
        vec![Item::object([
            ("many", Item::array(ints(&[1, 2]))),
            ("none", Item::null()),
        ])]
    );
}

#[rstest]
fn duplicate_object_keys_are_rejected() {
    let code = eval_err(object(vec![(lit("a"), lit(1_i64)), (lit("a"), lit(2_i64))]));
    assert_eq!(code, ErrorCode::DuplicateObjectKey);
}

#[rstest]
fn where_on_a_multi_item_atomic_sequence_is_a_type_error() {
    let code = eval_err(
        flwor()
            .for_("x", nums(&[1]))
            .where_(nums(&[1, 2]))
            .return_(var("x")),
    );
    assert_eq!(code, ErrorCode::Type);
}
