use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::item::codec::{decode_sequence, encode_sequence};
use jsonflow::{BuiltinCatalogue, EngineConfig, EngineContext, Expr, Item, Module, Query};
use std::hint::black_box;

fn source(size: i64, distributed: bool) -> Expr {
    let items = range(lit(1_i64), lit(size));
    if distributed {
        call("parallelize", vec![items])
    } else {
        items
    }
}

fn filter_group_order(src: Expr) -> Expr {
    flwor()
        .for_("x", src)
        .where_(cmp(
            ComparisonOp::Ne,
            arith(ArithmeticOp::Mod, var("x"), lit(5_i64)),
            lit(0_i64),
        ))
        .group_by(vec![("k", Some(arith(ArithmeticOp::Mod, var("x"), lit(16_i64))))])
        .order_by(vec![(var("k"), true)])
        .return_(object(vec![
            (lit("key"), var("k")),
            (lit("size"), call("count", vec![var("x")])),
        ]))
}

fn benchmark_pipelines(c: &mut Criterion) {
    let engine = EngineContext::in_memory(EngineConfig::default()).unwrap();
    let mut group = c.benchmark_group("flwor_pipeline");

    for size in [1_000_i64, 10_000] {
        for (label, distributed) in [("local", false), ("distributed", true)] {
            let module = Module::new(filter_group_order(source(size, distributed)));
            let query = Query::new(module, BuiltinCatalogue).unwrap();
            group.bench_with_input(BenchmarkId::new(label, size), &query, |b, query| {
                b.iter(|| {
                    let result = query.evaluate(black_box(&engine)).unwrap();
                    black_box(result.len())
                });
            });
        }
    }

    group.finish();
}

fn benchmark_codec(c: &mut Criterion) {
    let items: Vec<Item> = (0..1_000_i64)
        .map(|i| {
            Item::object([
                ("id", Item::from(i)),
                ("name", Item::from(format!("item-{i}"))),
                ("tags", Item::array(vec![Item::from("a"), Item::from(i % 7 == 0)])),
            ])
        })
        .collect();

    let mut group = c.benchmark_group("checkpoint_codec");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(encode_sequence(black_box(&items)).unwrap()));
    });
    let bytes = encode_sequence(&items).unwrap();
    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_sequence(black_box(&bytes)).unwrap().len()));
    });
    group.finish();
}

criterion_group!(benches, benchmark_pipelines, benchmark_codec);
criterion_main!(benches);
