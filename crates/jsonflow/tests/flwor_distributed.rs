use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::{
    BuiltinCatalogue, DistributedItems, EngineConfig, EngineContext, ErrorCode, Expr, Item, Module, Query,
};
use rstest::rstest;

fn engine() -> EngineContext {
    EngineContext::in_memory(EngineConfig::default()).unwrap()
}

fn eval_with(engine: &EngineContext, main: Expr) -> jsonflow::Result<Vec<Item>> {
    let query = Query::new(Module::new(main), BuiltinCatalogue)?;
    Ok(query.evaluate(engine)?.items().to_vec())
}

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::from).collect()
}

fn local_source() -> Expr {
    range(lit(1_i64), lit(20_i64))
}

fn distributed_source() -> Expr {
    call("parallelize", vec![range(lit(1_i64), lit(20_i64)), lit(3_i64)])
}

/// Runs `pipeline` over a local and a parallelized input and expects identical results.
fn assert_same_result(pipeline: impl Fn(Expr) -> Expr) {
    let engine = engine();
    let local = eval_with(&engine, pipeline(local_source())).unwrap();
    let distributed = eval_with(&engine, pipeline(distributed_source())).unwrap();
    assert!(!local.is_empty());
    assert_eq!(local, distributed);
}

fn doubled(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .return_(arith(ArithmeticOp::Mul, var("x"), lit(2_i64)))
}

fn positions(src: Expr) -> Expr {
    flwor()
        .for_at("x", "i", src)
        .return_(array(Some(seq(vec![var("i"), var("x")]))))
}

fn filtered(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .let_("sq", arith(ArithmeticOp::Mul, var("x"), var("x")))
        .where_(cmp(
            ComparisonOp::Eq,
            arith(ArithmeticOp::Mod, var("sq"), lit(2_i64)),
            lit(0_i64),
        ))
        .return_(var("sq"))
}

fn grouped(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .group_by(vec![("k", Some(arith(ArithmeticOp::Mod, var("x"), lit(3_i64))))])
        .order_by(vec![(var("k"), false)])
        .return_(object(vec![
            (lit("k"), var("k")),
            (lit("n"), call("count", vec![var("x")])),
            (lit("xs"), var("x")),
        ]))
}

fn sorted_descending(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .order_by(vec![(arith(ArithmeticOp::Mod, var("x"), lit(7_i64)), true), (var("x"), false)])
        .return_(var("x"))
}

fn counted(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .where_(cmp(ComparisonOp::Gt, var("x"), lit(15_i64)))
        .count("c")
        .return_(array(Some(seq(vec![var("c"), var("x")]))))
}

fn exploded(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .where_(cmp(ComparisonOp::Le, var("x"), lit(4_i64)))
        .for_at("y", "j", range(lit(1_i64), var("x")))
        .return_(arith(ArithmeticOp::Add, arith(ArithmeticOp::Mul, var("x"), lit(10_i64)), var("j")))
}

fn count_only_let(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .let_("pair", seq(vec![var("x"), var("x")]))
        .group_by(vec![("k", Some(arith(ArithmeticOp::Mod, var("x"), lit(2_i64))))])
        .return_(call("count", vec![var("pair")]))
}

fn aggregated(src: Expr) -> Expr {
    call(
        "count",
        vec![flwor().for_("x", src).where_(cmp(ComparisonOp::Ge, var("x"), lit(5_i64))).return_(var("x"))],
    )
}

#[rstest]
#[case::doubled(doubled)]
#[case::positions(positions)]
#[case::filtered(filtered)]
#[case::grouped(grouped)]
#[case::sorted_descending(sorted_descending)]
#[case::counted(counted)]
#[case::exploded(exploded)]
#[case::count_only_let(count_only_let)]
#[case::aggregated(aggregated)]
fn strategies_agree(#[case] pipeline: fn(Expr) -> Expr) {
    assert_same_result(pipeline);
}

#[rstest]
fn distributed_flwor_stays_on_the_engine() {
    let query = Query::new(Module::new(doubled(distributed_source())), BuiltinCatalogue).unwrap();
    let engine = engine();
    let items = query.evaluate_distributed(&engine).unwrap().unwrap();
    assert_eq!(items.count(&engine).unwrap(), 20);
    assert_eq!(items.collect(&engine, Some(3)).unwrap(), ints(&[2, 4, 6]));
}

#[rstest]
fn allowing_empty_over_an_empty_collection_yields_one_tuple() {
    let empty_input = call("parallelize", vec![empty()]);
    let main = flwor()
        .for_allowing_empty("x", empty_input)
        .return_(call("count", vec![var("x")]));
    assert_eq!(eval_with(&engine(), main).unwrap(), ints(&[0]));
}

#[rstest]
fn distributed_return_expression_is_a_nested_job() {
    let main = flwor()
        .for_("x", distributed_source())
        .return_(call("parallelize", vec![range(lit(1_i64), var("x"))]));
    let err = eval_with(&engine(), main).unwrap_err();
    assert_eq!(err.code, ErrorCode::NestedDistributedJob);
}

#[rstest]
fn engine_calls_inside_row_evaluation_are_nested_jobs() {
    let main = flwor()
        .for_("x", distributed_source())
        .where_(cmp(
            ComparisonOp::Ge,
            call("count", vec![call("parallelize", vec![range(lit(1_i64), var("x"))])]),
            lit(2_i64),
        ))
        .return_(var("x"));
    let err = eval_with(&engine(), main).unwrap_err();
    assert_eq!(err.code, ErrorCode::NestedDistributedJob);
}

#[rstest]
fn local_iteration_over_a_large_collection_hits_the_cap() {
    let engine = EngineContext::in_memory(EngineConfig::builder().with_materialization_cap(5).build()).unwrap();
    let main = flwor()
        .let_("xs", distributed_source())
        .for_("x", var("xs"))
        .return_(var("x"));
    let err = eval_with(&engine, main).unwrap_err();
    assert_eq!(err.code, ErrorCode::MaterializationCap);
}

#[rstest]
fn counting_a_distributed_let_does_not_materialize() {
    let engine = EngineContext::in_memory(EngineConfig::builder().with_materialization_cap(5).build()).unwrap();
    let main = flwor()
        .let_("xs", distributed_source())
        .return_(call("count", vec![var("xs")]));
    assert_eq!(eval_with(&engine, main).unwrap(), ints(&[20]));
}

#[rstest]
fn let_after_a_local_clause_keeps_its_collection_distributed() {
    let engine = EngineContext::in_memory(EngineConfig::builder().with_materialization_cap(5).build()).unwrap();
    let main = flwor()
        .for_("x", seq(vec![lit(1_i64), lit(2_i64)]))
        .let_("d", call("parallelize", vec![range(lit(1_i64), lit(500_i64))]))
        .return_(call("count", vec![var("d")]));
    assert_eq!(eval_with(&engine, main).unwrap(), ints(&[500, 500]));
}

#[rstest]
fn remove_drops_one_position_on_the_engine() {
    let main = call("remove", vec![distributed_source(), lit(1_i64)]);
    let out = eval_with(&engine(), main).unwrap();
    assert_eq!(out, (2..=20).map(Item::from).collect::<Vec<_>>());
}

#[rstest]
fn head_and_exists_take_a_single_row() {
    let engine = engine();
    assert_eq!(eval_with(&engine, call("head", vec![distributed_source()])).unwrap(), ints(&[1]));
    assert_eq!(
        eval_with(&engine, call("exists", vec![distributed_source()])).unwrap(),
        vec![Item::from(true)]
    );
    assert_eq!(
        eval_with(&engine, call("empty", vec![call("parallelize", vec![empty()])])).unwrap(),
        vec![Item::from(true)]
    );
}

#[rstest]
fn comma_of_collections_is_a_union() {
    let main = seq(vec![distributed_source(), distributed_source()]);
    let out = eval_with(&engine(), call("count", vec![main])).unwrap();
    assert_eq!(out, ints(&[40]));
}

#[rstest]
fn distributed_external_variables_can_be_iterated() {
    let engine = engine();
    let data = DistributedItems::from_items(&engine, &ints(&[1, 2, 3]), Some(2)).unwrap();
    let module = Module::new(
        flwor()
            .for_("x", var("data"))
            .return_(arith(ArithmeticOp::Add, var("x"), lit(1_i64))),
    )
    .with_variable(declare_external("data"));
    let query = Query::new(module, BuiltinCatalogue)
        .unwrap()
        .with_distributed_external("data", data);
    assert_eq!(query.evaluate(&engine).unwrap().items(), ints(&[2, 3, 4]).as_slice());
}

#[rstest]
fn missing_external_variable_is_reported() {
    let module = Module::new(var("data")).with_variable(declare_external("data"));
    let query = Query::new(module, BuiltinCatalogue).unwrap();
    let err = query.evaluate(&engine()).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnboundVariable);
}

#[rstest]
fn parallelize_rejects_a_non_positive_partition_count() {
    let main = call("count", vec![call("parallelize", vec![range(lit(1_i64), lit(3_i64)), lit(0_i64)])]);
    assert!(eval_with(&engine(), main).is_err());
}
