use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ClauseKind, ComparisonOp};
use jsonflow::types::{Arity, ItemType};
use jsonflow::{
    BuiltinCatalogue, ErrorCode, ExecutionMode, ExecutionModeAnalyzer, Expr, ExprKind, FunctionIdentifier, Item, Module,
    Query,
};
use rstest::rstest;

fn compile(module: Module) -> Query {
    Query::new(module, BuiltinCatalogue).unwrap()
}

fn mode_of(main: Expr) -> ExecutionMode {
    compile(Module::new(main)).mode()
}

fn numbers() -> Expr {
    call("parallelize", vec![range(lit(1_i64), lit(10_i64))])
}

fn clause_modes(query: &Query) -> Vec<ExecutionMode> {
    match &query.module().main.kind {
        ExprKind::Flwor(f) => f.clauses.iter().map(|c| c.mode).collect(),
        other => panic!("expected a FLWOR expression, found {other:?}"),
    }
}

#[rstest]
fn lattice_joins_to_the_maximum() {
    use ExecutionMode::*;
    assert_eq!(Unset.join(Local), Local);
    assert_eq!(Structured.join(Local), Structured);
    assert_eq!(Structured.join(Distributed), Distributed);
    assert_eq!(ExecutionMode::join_all(std::iter::empty()), Unset);
    assert!(Structured.is_distributed());
    assert!(!Local.is_distributed());
}

#[rstest]
fn literals_and_operators_are_local() {
    assert_eq!(mode_of(lit(1_i64)), ExecutionMode::Local);
    assert_eq!(
        mode_of(arith(ArithmeticOp::Add, lit(1_i64), lit(2_i64))),
        ExecutionMode::Local
    );
}

#[rstest]
fn parallelize_is_distributed_and_count_brings_it_back() {
    assert_eq!(mode_of(numbers()), ExecutionMode::Distributed);
    assert_eq!(mode_of(call("count", vec![numbers()])), ExecutionMode::Local);
}

#[rstest]
fn annotate_is_structured_until_reshaped() {
    let data = call("parallelize", vec![seq(vec![object(vec![(lit("a"), lit(1_i64))])])]);
    let schema = object(vec![(lit("a"), lit("integer"))]);
    let annotated = call("annotate", vec![data, schema]);
    assert_eq!(mode_of(annotated.clone()), ExecutionMode::Structured);
    assert_eq!(mode_of(lookup(annotated, "a")), ExecutionMode::Distributed);
}

#[rstest]
fn comma_is_distributed_only_if_every_operand_is() {
    assert_eq!(mode_of(seq(vec![numbers(), numbers()])), ExecutionMode::Distributed);
    assert_eq!(mode_of(seq(vec![numbers(), lit(1_i64)])), ExecutionMode::Local);
    assert_eq!(
        mode_of(if_then_else(lit(true), numbers(), empty())),
        ExecutionMode::Local
    );
}

#[rstest]
fn for_over_distributed_input_makes_the_flwor_distributed() {
    let q = compile(Module::new(
        flwor()
            .for_("x", numbers())
            .where_(cmp(ComparisonOp::Gt, var("x"), lit(3_i64)))
            .return_(var("x")),
    ));
    assert_eq!(q.mode(), ExecutionMode::Distributed);
    assert_eq!(clause_modes(&q), [ExecutionMode::Distributed, ExecutionMode::Distributed]);
}

#[rstest]
fn leading_let_is_local_but_keeps_a_distributed_variable() {
    let q = compile(Module::new(
        flwor()
            .let_("xs", numbers())
            .for_("x", var("xs"))
            .return_(var("x")),
    ));
    assert_eq!(clause_modes(&q), [ExecutionMode::Local, ExecutionMode::Local]);
    assert_eq!(q.mode(), ExecutionMode::Local);
    match &q.module().main.kind {
        ExprKind::Flwor(f) => match &f.clauses[1].kind {
            ClauseKind::For { expr, .. } => assert_eq!(expr.mode, ExecutionMode::Distributed),
            other => panic!("unexpected clause {other:?}"),
        },
        _ => unreachable!(),
    }
}

#[rstest]
fn let_after_a_local_for_keeps_a_distributed_variable() {
    let q = compile(Module::new(
        flwor()
            .for_("x", seq(vec![lit(1_i64), lit(2_i64)]))
            .let_("d", numbers())
            .return_(call("count", vec![var("d")])),
    ));
    assert_eq!(clause_modes(&q), [ExecutionMode::Local, ExecutionMode::Local]);
    match &q.module().main.kind {
        ExprKind::Flwor(f) => match &f.return_expr.kind {
            ExprKind::FunctionCall { args, .. } => {
                assert_eq!(args[0].as_ref().map(|a| a.mode), Some(ExecutionMode::Distributed));
            }
            other => panic!("unexpected return expression {other:?}"),
        },
        _ => unreachable!(),
    }
}

#[rstest]
fn function_return_modes_are_recorded() {
    let module = Module::new(call("numbers", vec![]))
        .with_function(function("numbers", vec![], numbers()))
        .with_function(function(
            "first",
            vec![("xs", jsonflow::SequenceType::new(ItemType::Item, Arity::ZeroOrMore))],
            call("head", vec![var("xs")]),
        ));
    let q = compile(module);
    assert_eq!(q.mode(), ExecutionMode::Distributed);
    assert_eq!(
        q.registry().return_mode(&FunctionIdentifier::new("numbers", 0)),
        ExecutionMode::Distributed
    );
    let first = FunctionIdentifier::new("first", 1);
    assert_eq!(q.registry().return_mode(&first), ExecutionMode::Local);
}

#[rstest]
fn parameter_modes_follow_call_sites() {
    let module = Module::new(call("total", vec![numbers()])).with_function(function(
        "total",
        vec![("xs", jsonflow::SequenceType::ITEM_STAR)],
        call("count", vec![var("xs")]),
    ));
    let q = compile(module);
    let id = FunctionIdentifier::new("total", 1);
    assert_eq!(q.registry().param_mode(&id, 0), ExecutionMode::Distributed);
    let decl = q.module().functions.iter().find(|f| f.id == id).unwrap();
    assert_eq!(decl.param_modes, [ExecutionMode::Distributed]);
}

#[rstest]
fn single_item_parameters_stay_local() {
    let module = Module::new(call("twice", vec![call("head", vec![numbers()])])).with_function(function(
        "twice",
        vec![("x", jsonflow::SequenceType::one(ItemType::Item))],
        arith(ArithmeticOp::Mul, var("x"), lit(2_i64)),
    ));
    let q = compile(module);
    let decl = &q.module().functions[0];
    assert_eq!(decl.param_modes, [ExecutionMode::Local]);
}

#[rstest]
fn recursive_functions_converge() {
    let body = if_then_else(
        cmp(ComparisonOp::Le, var("n"), lit(0_i64)),
        numbers(),
        call("down", vec![arith(ArithmeticOp::Sub, var("n"), lit(1_i64))]),
    );
    let module = Module::new(call("down", vec![lit(3_i64)])).with_function(function(
        "down",
        vec![("n", jsonflow::SequenceType::one(ItemType::Item))],
        body,
    ));
    let q = compile(module);
    assert!(!q.registry().return_mode(&FunctionIdentifier::new("down", 1)).is_unset());
}

#[rstest]
fn analysis_of_an_annotated_module_changes_nothing() {
    let body = if_then_else(
        cmp(ComparisonOp::Le, var("n"), lit(0_i64)),
        numbers(),
        call("down", vec![arith(ArithmeticOp::Sub, var("n"), lit(1_i64))]),
    );
    let main = flwor()
        .for_("x", call("down", vec![lit(3_i64)]))
        .let_("d", numbers())
        .return_(call("count", vec![var("d")]));
    let mut module = Module::new(main).with_function(function(
        "down",
        vec![("n", jsonflow::SequenceType::one(ItemType::Item))],
        body,
    ));
    let analyzer = ExecutionModeAnalyzer::new(&BuiltinCatalogue);
    let first = analyzer.analyze(&mut module).unwrap();
    let annotated = format!("{module:?}");
    let main_mode = module.main.mode;

    let second = analyzer.analyze(&mut module).unwrap();
    assert_eq!(first, second);
    assert_eq!(module.main.mode, main_mode);
    assert_eq!(format!("{module:?}"), annotated);

    let third = analyzer.analyze(&mut module).unwrap();
    assert_eq!(second, third);
    assert_eq!(format!("{module:?}"), annotated);
}

#[rstest]
fn unknown_function_is_rejected() {
    let err = Query::new(Module::new(call("nope", vec![lit(Item::null())])), BuiltinCatalogue)
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::UnknownFunction);
}

#[rstest]
fn unbound_variable_is_rejected() {
    let err = Query::new(Module::new(var("missing")), BuiltinCatalogue).err().unwrap();
    assert_eq!(err.code, ErrorCode::UnboundVariable);
}

#[rstest]
fn declared_variables_carry_their_mode() {
    let module = Module::new(call("count", vec![var("all")])).with_variable(declare_variable("all", numbers()));
    let q = compile(module);
    assert_eq!(q.module().variables[0].mode, ExecutionMode::Distributed);
}
