use jsonflow::distributed::schema::{convert_objects, infer_schema, is_applicable, parse_declared_schema, reconcile};
use jsonflow::distributed::{Cell, ColumnType};
use jsonflow::expr::build::*;
use jsonflow::expr::ComparisonOp;
use jsonflow::item::json::parse_json;
use jsonflow::{BuiltinCatalogue, EngineConfig, EngineContext, ErrorCode, ExecutionMode, Expr, Item, Module, Query};
use rstest::rstest;

fn engine() -> EngineContext {
    EngineContext::in_memory(EngineConfig::default()).unwrap()
}

fn json(text: &str) -> Item {
    parse_json(text).unwrap()
}

fn objects(text: &str) -> Vec<Item> {
    json(text).as_array().unwrap().to_vec()
}

fn people() -> Expr {
    seq(vec![
        lit(json(r#"{"name": "ada", "age": 36, "tags": ["math"]}"#)),
        lit(json(r#"{"name": "alan", "age": 41, "tags": []}"#)),
        lit(json(r#"{"name": "grace", "age": null, "tags": ["navy", "cobol"]}"#)),
    ])
}

fn people_schema() -> Expr {
    lit(json(r#"{"name": "string", "age": "long", "tags": ["string"]}"#))
}

#[rstest]
fn declared_schema_parses_nested_arrays() {
    let schema = parse_declared_schema(&json(r#"{"id": "integer", "tags": ["string"]}"#)).unwrap();
    assert_eq!(schema.len(), 2);
    assert_eq!(schema.columns[0].ty, ColumnType::Integer);
    assert_eq!(schema.columns[1].ty, ColumnType::Array(Box::new(ColumnType::String)));
}

#[rstest]
#[case(r#"{"id": "int"}"#)]
#[case(r#"{"id": []}"#)]
#[case(r#"{"id": ["string", "long"]}"#)]
#[case(r#"{"id": 3}"#)]
#[case(r#"["id"]"#)]
fn malformed_declarations_are_schema_errors(#[case] text: &str) {
    let err = parse_declared_schema(&json(text)).unwrap_err();
    assert_eq!(err.code, ErrorCode::Schema);
}

#[rstest]
#[case(ColumnType::Double, ColumnType::Short, true)]
#[case(ColumnType::Double, ColumnType::Float, true)]
#[case(ColumnType::Long, ColumnType::Integer, true)]
#[case(ColumnType::Integer, ColumnType::Long, false)]
#[case(ColumnType::String, ColumnType::Null, true)]
#[case(ColumnType::Boolean, ColumnType::String, false)]
#[case(
    ColumnType::Array(Box::new(ColumnType::Double)),
    ColumnType::Array(Box::new(ColumnType::Short)),
    true
)]
fn numeric_widening(#[case] declared: ColumnType, #[case] observed: ColumnType, #[case] expected: bool) {
    assert_eq!(is_applicable(&declared, &observed), expected);
}

#[rstest]
fn inferred_schema_takes_the_widest_integer() {
    let schema = infer_schema(&objects(r#"[{"a": 1, "b": "x"}, {"a": 100000, "b": null}, {"c": true}]"#)).unwrap();
    let names: Vec<&str> = schema.columns.iter().map(|c| &*c.name).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert_eq!(schema.columns[0].ty, ColumnType::Integer);
    assert_eq!(schema.columns[1].ty, ColumnType::String);
    assert_eq!(schema.columns[2].ty, ColumnType::Boolean);
}

#[rstest]
fn inference_rejects_mixed_kinds() {
    let err = infer_schema(&objects(r#"[{"a": 1}, {"a": "one"}]"#)).unwrap_err();
    assert_eq!(err.code, ErrorCode::Schema);
    let err = infer_schema(&objects(r#"[{"a": {"nested": 1}}]"#)).unwrap_err();
    assert_eq!(err.code, ErrorCode::Schema);
}

#[rstest]
#[case(r#"{"a": "long"}"#, r#"[{"a": 1, "b": 2}]"#)]
#[case(r#"{"a": "long", "b": "long", "c": "string"}"#, r#"[{"a": 1, "b": 2}]"#)]
#[case(r#"{"a": "short", "b": "long"}"#, r#"[{"a": 100000, "b": 2}]"#)]
fn reconciliation_failures(#[case] declared: &str, #[case] data: &str) {
    let declared = parse_declared_schema(&json(declared)).unwrap();
    let observed = infer_schema(&objects(data)).unwrap();
    let err = reconcile(&declared, &observed).unwrap_err();
    assert_eq!(err.code, ErrorCode::Schema);
}

#[rstest]
fn conversion_lays_out_cells_by_declared_type() {
    let declared = parse_declared_schema(&json(r#"{"a": "double", "b": "string"}"#)).unwrap();
    let rows = convert_objects(&objects(r#"[{"b": "x", "a": 2}, {"a": 1.5}]"#), &declared).unwrap();
    assert_eq!(rows[0], vec![Cell::Double(2.0), Cell::String("x".to_string())]);
    assert_eq!(rows[1], vec![Cell::Double(1.5), Cell::Null]);
}

#[rstest]
fn annotate_produces_a_structured_collection() {
    let main = call("annotate", vec![call("parallelize", vec![people()]), people_schema()]);
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    assert_eq!(query.mode(), ExecutionMode::Structured);
    let engine = engine();
    let items = query.evaluate_distributed(&engine).unwrap().unwrap();
    assert!(items.is_structured());
    assert_eq!(items.count(&engine).unwrap(), 3);
    let rows = items.collect(&engine, None).unwrap();
    assert_eq!(rows[0], json(r#"{"name": "ada", "age": 36, "tags": ["math"]}"#));
    assert_eq!(rows[2], json(r#"{"name": "grace", "age": null, "tags": ["navy", "cobol"]}"#));
}

#[rstest]
fn annotate_of_local_objects_is_accepted() {
    let main = call("count", vec![call("annotate", vec![people(), people_schema()])]);
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    assert_eq!(query.evaluate(&engine()).unwrap().items(), [Item::from(3_i64)]);
}

#[rstest]
fn lookups_on_structured_collections_run_on_the_engine() {
    let annotated = call("annotate", vec![call("parallelize", vec![people()]), people_schema()]);
    let query = Query::new(Module::new(lookup(annotated, "name")), BuiltinCatalogue).unwrap();
    assert_eq!(query.mode(), ExecutionMode::Distributed);
    let out = query.evaluate(&engine()).unwrap();
    assert_eq!(out.items(), [Item::from("ada"), Item::from("alan"), Item::from("grace")]);
}

#[rstest]
fn flwor_over_structured_rows() {
    let annotated = call("annotate", vec![call("parallelize", vec![people()]), people_schema()]);
    let main = flwor()
        .for_("p", annotated)
        .where_(cmp(ComparisonOp::Gt, lookup(var("p"), "age"), lit(40_i64)))
        .return_(lookup(var("p"), "name"));
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    assert_eq!(query.evaluate(&engine()).unwrap().items(), [Item::from("alan")]);
}

#[rstest]
fn annotate_rejects_undeclared_columns() {
    let main = call(
        "annotate",
        vec![call("parallelize", vec![people()]), lit(json(r#"{"name": "string", "age": "long"}"#))],
    );
    let query = Query::new(Module::new(main), BuiltinCatalogue).unwrap();
    let err = query.evaluate(&engine()).unwrap_err();
    assert_eq!(err.code, ErrorCode::Schema);
}
