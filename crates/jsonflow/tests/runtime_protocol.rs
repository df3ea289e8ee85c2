use std::sync::Arc;

use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::runtime::materialize;
use jsonflow::types::ItemType;
use jsonflow::{
    BuiltinCatalogue, DynamicContext, EngineConfig, EngineContext, ErrorCode, ExecutionModeAnalyzer, Expr, Item,
    Module, PullIterator, Query, RuntimeBuilder, RuntimeIterator, SequenceType,
};
use rstest::rstest;

fn engine() -> EngineContext {
    EngineContext::in_memory(EngineConfig::default()).unwrap()
}

fn build(main: Expr) -> (RuntimeIterator, DynamicContext) {
    build_module(Module::new(main))
}

fn build_module(mut module: Module) -> (RuntimeIterator, DynamicContext) {
    ExecutionModeAnalyzer::new(&BuiltinCatalogue).analyze(&mut module).unwrap();
    let builder = RuntimeBuilder::new(&module, Arc::new(BuiltinCatalogue));
    let iter = builder.build(&module.main).unwrap();
    (iter, DynamicContext::new(engine()))
}

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::from).collect()
}

#[rstest]
fn open_twice_is_a_protocol_error() {
    let (mut iter, ctx) = build(range(lit(1_i64), lit(3_i64)));
    iter.open(&ctx).unwrap();
    let err = iter.open(&ctx).unwrap_err();
    assert_eq!(err.code, ErrorCode::IteratorProtocol);
}

#[rstest]
fn next_past_the_end_is_a_protocol_error() {
    let (mut iter, ctx) = build(seq(vec![lit(1_i64), lit(2_i64)]));
    iter.open(&ctx).unwrap();
    assert_eq!(iter.next().unwrap(), Item::from(1_i64));
    assert_eq!(iter.next().unwrap(), Item::from(2_i64));
    assert!(!iter.has_next());
    let err = iter.next().unwrap_err();
    assert_eq!(err.code, ErrorCode::IteratorProtocol);
}

#[rstest]
fn next_before_open_is_a_protocol_error() {
    let (mut iter, _ctx) = build(lit(1_i64));
    let err = iter.next().unwrap_err();
    assert_eq!(err.code, ErrorCode::IteratorProtocol);
}

#[rstest]
fn close_is_idempotent_and_allows_reopening() {
    let (mut iter, ctx) = build(range(lit(1_i64), lit(3_i64)));
    iter.close();
    iter.open(&ctx).unwrap();
    assert!(iter.is_open());
    iter.close();
    iter.close();
    assert!(!iter.is_open());
    assert_eq!(materialize(&mut iter, &ctx).unwrap().items(), ints(&[1, 2, 3]).as_slice());
}

/// `countdown($n)` yields `$n, $n - 1, ..., 1` through one recursive call per item.
fn countdown(from: i64) -> Module {
    let body = if_then_else(
        cmp(ComparisonOp::Le, var("n"), lit(0_i64)),
        empty(),
        seq(vec![
            var("n"),
            call("countdown", vec![arith(ArithmeticOp::Sub, var("n"), lit(1_i64))]),
        ]),
    );
    Module::new(call("countdown", vec![lit(from)])).with_function(function(
        "countdown",
        vec![("n", SequenceType::one(ItemType::Item))],
        body,
    ))
}

#[rstest]
fn recursive_calls_can_be_closed_after_one_item() {
    let (mut iter, ctx) = build_module(countdown(50));
    iter.open(&ctx).unwrap();
    assert_eq!(iter.next().unwrap(), Item::from(50_i64));
    assert!(iter.has_next());
    iter.close();
    assert!(!iter.is_open());
    iter.close();
    assert!(!iter.is_open());
    let all = materialize(&mut iter, &ctx).unwrap();
    assert_eq!(all.len(), 50);
    assert_eq!(all.items().first(), Some(&Item::from(50_i64)));
}

#[rstest]
fn recursive_calls_that_never_opened_close_cleanly() {
    let (mut iter, ctx) = build_module(countdown(3));
    iter.close();
    iter.close();
    assert!(!iter.is_open());
    assert_eq!(materialize(&mut iter, &ctx).unwrap().items(), ints(&[3, 2, 1]).as_slice());
}

#[rstest]
fn reset_rewinds_to_the_first_item() {
    let (mut iter, ctx) = build(range(lit(1_i64), lit(3_i64)));
    iter.open(&ctx).unwrap();
    iter.next().unwrap();
    iter.next().unwrap();
    iter.reset(&ctx).unwrap();
    assert_eq!(iter.next().unwrap(), Item::from(1_i64));
}

#[rstest]
fn reset_re_evaluates_under_the_new_context() {
    let (mut iter, ctx) = build(flwor().let_("x", lit(1_i64)).return_(var("x")));
    iter.open(&ctx).unwrap();
    assert_eq!(iter.next().unwrap(), Item::from(1_i64));
    iter.reset(&ctx).unwrap();
    assert!(iter.has_next());
    assert_eq!(iter.next().unwrap(), Item::from(1_i64));
    assert!(!iter.has_next());
}

#[rstest]
fn empty_range_yields_nothing() {
    let (mut iter, ctx) = build(range(lit(5_i64), lit(1_i64)));
    iter.open(&ctx).unwrap();
    assert!(!iter.has_next());
}

#[rstest]
fn local_iterator_refuses_to_hand_over_a_collection() {
    let (mut iter, ctx) = build(lit(1_i64));
    assert!(!iter.is_distributed());
    let err = iter.as_distributed(&ctx).unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalInvariant);
}

#[rstest]
fn query_iterator_stops_after_the_first_error() {
    let main = seq(vec![
        lit(1_i64),
        arith(ArithmeticOp::IDiv, lit(1_i64), lit(0_i64)),
        lit(3_i64),
    ]);
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    let results: Vec<_> = query.iterator(&engine()).unwrap().collect();
    let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::DivisionByZero);
    assert!(results.last().unwrap().is_err());
}

#[rstest]
fn query_iterator_streams_distributed_results() {
    let main = call("parallelize", vec![range(lit(1_i64), lit(5_i64))]);
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    let iter = query.iterator(&engine()).unwrap();
    assert!(iter.is_distributed());
    let items: Vec<Item> = iter.map(Result::unwrap).collect();
    assert_eq!(items, ints(&[1, 2, 3, 4, 5]));
}

#[rstest]
fn materialization_cap_applies_to_local_pulls() {
    let config = EngineConfig::builder().with_materialization_cap(3).build();
    let engine = EngineContext::in_memory(config).unwrap();
    let main = call("parallelize", vec![range(lit(1_i64), lit(10_i64))]);
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    let err = query.iterator(&engine).err().unwrap();
    assert_eq!(err.code, ErrorCode::MaterializationCap);
    assert_eq!(query.evaluate(&engine).unwrap().len(), 10);
}
