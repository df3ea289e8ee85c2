use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::types::ItemType;
use jsonflow::{
    AtomicType, BuiltinCatalogue, EngineConfig, EngineContext, ErrorCode, Expr, Item, Module, Query, SequenceType,
};
use rstest::rstest;

fn engine() -> EngineContext {
    EngineContext::in_memory(EngineConfig::default()).unwrap()
}

fn run(module: Module) -> jsonflow::Result<Vec<Item>> {
    let query = Query::new(module, BuiltinCatalogue)?;
    Ok(query.evaluate(&engine())?.items().to_vec())
}

fn integer() -> SequenceType {
    SequenceType::one(ItemType::Atomic(AtomicType::Integer))
}

fn factorial() -> jsonflow::expr::FunctionDecl {
    function(
        "fact",
        vec![("n", integer())],
        if_then_else(
            cmp(ComparisonOp::Le, var("n"), lit(1_i64)),
            lit(1_i64),
            arith(
                ArithmeticOp::Mul,
                var("n"),
                call("fact", vec![arith(ArithmeticOp::Sub, var("n"), lit(1_i64))]),
            ),
        ),
    )
}

fn add() -> jsonflow::expr::FunctionDecl {
    function(
        "add",
        vec![("a", integer()), ("b", integer())],
        arith(ArithmeticOp::Add, var("a"), var("b")),
    )
}

fn increment() -> Expr {
    inline_function(vec![("x", integer())], arith(ArithmeticOp::Add, var("x"), lit(1_i64)))
}

#[rstest]
fn recursive_function() {
    let out = run(Module::new(call("fact", vec![lit(10_i64)])).with_function(factorial())).unwrap();
    assert_eq!(out, [Item::from(3_628_800_i64)]);
}

#[rstest]
fn argument_types_are_checked() {
    let err = run(Module::new(call("fact", vec![lit("ten")])).with_function(factorial())).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
fn inline_function_through_dynamic_call() {
    let main = flwor()
        .let_("f", increment())
        .return_(dynamic_call(var("f"), vec![Some(lit(41_i64))]));
    assert_eq!(run(Module::new(main)).unwrap(), [Item::from(42_i64)]);
}

#[rstest]
fn inline_functions_capture_their_environment() {
    let scaled = inline_function(vec![("x", integer())], arith(ArithmeticOp::Mul, var("x"), var("k")));
    let main = flwor()
        .for_("k", seq(vec![lit(2_i64), lit(3_i64)]))
        .let_("f", scaled)
        .return_(dynamic_call(var("f"), vec![Some(lit(5_i64))]));
    assert_eq!(run(Module::new(main)).unwrap(), [Item::from(10_i64), Item::from(15_i64)]);
}

#[rstest]
fn partial_application_of_a_declared_function() {
    let main = flwor()
        .let_("add10", partial("add", vec![Some(lit(10_i64)), None]))
        .return_(dynamic_call(var("add10"), vec![Some(lit(5_i64))]));
    let out = run(Module::new(main).with_function(add())).unwrap();
    assert_eq!(out, [Item::from(15_i64)]);
}

#[rstest]
fn partial_application_of_a_builtin() {
    let main = flwor()
        .let_("size", partial("count", vec![None]))
        .return_(dynamic_call(var("size"), vec![Some(range(lit(1_i64), lit(7_i64)))]));
    assert_eq!(run(Module::new(main)).unwrap(), [Item::from(7_i64)]);
}

#[rstest]
fn dynamic_partial_application_returns_a_function() {
    let main = flwor()
        .let_("add", partial("add", vec![None, None]))
        .let_("add1", dynamic_call(var("add"), vec![None, Some(lit(1_i64))]))
        .return_(dynamic_call(var("add1"), vec![Some(lit(2_i64))]));
    let out = run(Module::new(main).with_function(add())).unwrap();
    assert_eq!(out, [Item::from(3_i64)]);
}

#[rstest]
fn dynamic_call_with_wrong_arity_fails() {
    let main = flwor()
        .let_("f", increment())
        .return_(dynamic_call(var("f"), vec![Some(lit(1_i64)), Some(lit(2_i64))]));
    let err = run(Module::new(main)).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
fn dynamic_call_on_a_non_function_fails() {
    let main = dynamic_call(lit(1_i64), vec![Some(lit(2_i64))]);
    let err = run(Module::new(main)).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
fn distributed_arguments_reach_the_body_without_materializing() {
    let config = EngineConfig::builder().with_materialization_cap(2).build();
    let engine = EngineContext::in_memory(config).unwrap();
    let module = Module::new(call(
        "total",
        vec![call("parallelize", vec![range(lit(1_i64), lit(50_i64))])],
    ))
    .with_function(function("total", vec![("xs", SequenceType::ITEM_STAR)], call("count", vec![var("xs")])));
    let query = Query::new(module, BuiltinCatalogue).unwrap();
    assert_eq!(query.evaluate(&engine).unwrap().items(), [Item::from(50_i64)]);
}

#[rstest]
fn functions_can_return_distributed_sequences() {
    let module = Module::new(call("count", vec![call("evens", vec![])])).with_function(function(
        "evens",
        vec![],
        flwor()
            .for_("x", call("parallelize", vec![range(lit(1_i64), lit(10_i64))]))
            .where_(cmp(
                ComparisonOp::Eq,
                arith(ArithmeticOp::Mod, var("x"), lit(2_i64)),
                lit(0_i64),
            ))
            .return_(var("x")),
    ));
    assert_eq!(run(module).unwrap(), [Item::from(5_i64)]);
}

#[rstest]
fn declared_variables_are_visible_to_functions() {
    let module = Module::new(call("scale", vec![lit(4_i64)]))
        .with_variable(declare_variable("factor", lit(3_i64)))
        .with_function(function(
            "scale",
            vec![("x", integer())],
            arith(ArithmeticOp::Mul, var("x"), var("factor")),
        ));
    assert_eq!(run(module).unwrap(), [Item::from(12_i64)]);
}

#[rstest]
fn external_variables_are_bound_by_the_caller() {
    let module = Module::new(arith(ArithmeticOp::Add, var("base"), lit(1_i64)))
        .with_variable(declare_external("base"));
    let query = Query::new(module, BuiltinCatalogue)
        .unwrap()
        .with_external_variable("base", jsonflow::Sequence::single(41_i64));
    assert_eq!(query.evaluate(&engine()).unwrap().items(), [Item::from(42_i64)]);
}

#[rstest]
fn function_items_display_their_name_and_arity() {
    let main = partial("add", vec![Some(lit(1_i64)), None]);
    let out = run(Module::new(main).with_function(add())).unwrap();
    match &out[..] {
        [Item::Function(f)] => {
            assert_eq!(f.arity(), 1);
            assert_eq!(f.to_string(), "function add#1");
        }
        other => panic!("expected one function item, got {other:?}"),
    }
}
