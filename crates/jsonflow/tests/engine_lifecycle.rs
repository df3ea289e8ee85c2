use std::sync::Arc;

use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::types::ItemType;
use jsonflow::{
    AtomicType, BuiltinCatalogue, DistributedEngine, EngineConfig, EngineContext, Expr, Item, MemoryEngine, Module,
    Query, SequenceType,
};
use rstest::{fixture, rstest};

struct Engine {
    memory: Arc<MemoryEngine>,
    ctx: EngineContext,
}

impl Engine {
    fn resources(&self) -> (usize, usize) {
        (self.memory.collection_count(), self.memory.udf_count())
    }
}

#[fixture]
fn engine() -> Engine {
    let config = EngineConfig::default();
    let memory = Arc::new(MemoryEngine::new(&config).unwrap());
    let ctx = EngineContext::new(memory.clone(), config);
    Engine { memory, ctx }
}

fn evens() -> Expr {
    flwor()
        .for_("x", call("parallelize", vec![range(lit(1_i64), lit(10_i64)), lit(3_i64)]))
        .where_(cmp(
            ComparisonOp::Eq,
            arith(ArithmeticOp::Mod, var("x"), lit(2_i64)),
            lit(0_i64),
        ))
        .return_(arith(ArithmeticOp::Mul, var("x"), lit(10_i64)))
}

/// Row bodies call a function item bound in the prolog, so the registered
/// callables capture a context holding the engine.
fn incremented() -> Module {
    let increment = inline_function(
        vec![("x", SequenceType::one(ItemType::Atomic(AtomicType::Integer)))],
        arith(ArithmeticOp::Add, var("x"), lit(1_i64)),
    );
    Module::new(
        flwor()
            .for_("x", call("parallelize", vec![range(lit(1_i64), lit(5_i64))]))
            .return_(dynamic_call(var("inc"), vec![Some(var("x"))])),
    )
    .with_variable(declare_variable("inc", increment))
}

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::from).collect()
}

#[rstest]
fn repeated_evaluation_returns_to_the_baseline(engine: Engine) {
    let query = Query::new(Module::new(evens()), BuiltinCatalogue).unwrap();
    let baseline = engine.resources();
    for _ in 0..5 {
        let out = query.evaluate(&engine.ctx).unwrap();
        assert_eq!(out.items(), ints(&[20, 40, 60, 80, 100]).as_slice());
        assert_eq!(engine.resources(), baseline);
    }
}

#[rstest]
fn failed_evaluation_releases_what_it_created(engine: Engine) {
    let main = flwor()
        .for_("x", call("parallelize", vec![range(lit(1_i64), lit(10_i64))]))
        .return_(arith(ArithmeticOp::IDiv, lit(1_i64), arith(ArithmeticOp::Sub, var("x"), lit(4_i64))));
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    let baseline = engine.resources();
    assert!(query.evaluate(&engine.ctx).is_err());
    assert_eq!(engine.resources(), baseline);
}

#[rstest]
fn streaming_keeps_collections_until_the_iterator_drops(engine: Engine) {
    let query = Query::new(Module::new(evens()), BuiltinCatalogue).unwrap();
    let baseline = engine.resources();
    let mut iter = query.iterator(&engine.ctx).unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), Item::from(20_i64));
    assert!(engine.memory.collection_count() > baseline.0);
    drop(iter);
    assert_eq!(engine.resources(), baseline);
}

#[rstest]
fn distributed_result_is_handed_to_the_caller(engine: Engine) {
    let query = Query::new(Module::new(evens()), BuiltinCatalogue).unwrap();
    let (collections, udfs) = engine.resources();
    let items = query.evaluate_distributed(&engine.ctx).unwrap().unwrap();
    assert_eq!(engine.resources(), (collections + 1, udfs));
    assert_eq!(items.count(&engine.ctx).unwrap(), 5);
    engine.memory.drop_collection(items.handle).unwrap();
    assert_eq!(engine.resources(), (collections, udfs));
}

#[rstest]
fn captured_function_items_are_released(engine: Engine) {
    let query = Query::new(incremented(), BuiltinCatalogue).unwrap();
    let baseline = engine.resources();
    assert_eq!(query.evaluate(&engine.ctx).unwrap().items(), ints(&[2, 3, 4, 5, 6]).as_slice());
    assert_eq!(engine.resources(), baseline);
}

#[rstest]
fn dropping_the_context_frees_the_engine(engine: Engine) {
    let Engine { memory, ctx } = engine;
    let weak = Arc::downgrade(&memory);
    drop(memory);
    for module in [Module::new(evens()), incremented()] {
        let query = Query::new(module, BuiltinCatalogue).unwrap();
        query.evaluate(&ctx).unwrap();
        let mut iter = query.iterator(&ctx).unwrap();
        iter.next().unwrap().unwrap();
    }
    assert!(weak.upgrade().is_some());
    drop(ctx);
    assert!(weak.upgrade().is_none());
}

#[rstest]
fn unregistering_an_unknown_function_is_ignored(engine: Engine) {
    let before = engine.resources();
    engine.memory.unregister_udf("nothing#0").unwrap();
    engine.memory.drop_collection(jsonflow::distributed::CollectionHandle(u64::MAX)).unwrap();
    assert_eq!(engine.resources(), before);
}
