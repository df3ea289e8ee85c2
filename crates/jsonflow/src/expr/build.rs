//! Terse constructors for assembling expression trees by hand, used by tests,
//! benches and the playground in place of a parser.

use std::sync::Arc;

use super::{
    ArithmeticOp, Clause, ClauseKind, ComparisonOp, Expr, ExprKind, Flwor, FunctionDecl, FunctionIdentifier,
    GroupKey, InlineFunction, OrderKey, Param, PostfixOp, TypeSwitch, TypeSwitchCase, TypeSwitchDefault,
    VariableDecl,
};
use crate::error::SourceLocation;
use crate::item::Item;
use crate::mode::ExecutionMode;
use crate::types::{AtomicType, SequenceType};

pub fn lit(item: impl Into<Item>) -> Expr {
    Expr::new(ExprKind::Literal(item.into()))
}

pub fn empty() -> Expr {
    Expr::new(ExprKind::Sequence(Vec::new()))
}

pub fn var(name: &str) -> Expr {
    Expr::new(ExprKind::VarRef(Arc::from(name)))
}

pub fn context_item() -> Expr {
    Expr::new(ExprKind::ContextItem)
}

pub fn seq(items: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Sequence(items))
}

pub fn range(from: Expr, to: Expr) -> Expr {
    Expr::new(ExprKind::Range {
        from: Box::new(from),
        to: Box::new(to),
    })
}

pub fn array(content: Option<Expr>) -> Expr {
    Expr::new(ExprKind::ArrayConstructor(content.map(Box::new)))
}

pub fn object(pairs: Vec<(Expr, Expr)>) -> Expr {
    Expr::new(ExprKind::ObjectConstructor(pairs))
}

pub fn arith(op: ArithmeticOp, left: Expr, right: Expr) -> Expr {
    Expr::new(ExprKind::Arithmetic {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn cmp(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
    Expr::new(ExprKind::Comparison {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::new(ExprKind::And(Box::new(left), Box::new(right)))
}

pub fn or(left: Expr, right: Expr) -> Expr {
    Expr::new(ExprKind::Or(Box::new(left), Box::new(right)))
}

pub fn not(operand: Expr) -> Expr {
    Expr::new(ExprKind::Not(Box::new(operand)))
}

pub fn concat(left: Expr, right: Expr) -> Expr {
    Expr::new(ExprKind::StringConcat(Box::new(left), Box::new(right)))
}

pub fn if_then_else(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    Expr::new(ExprKind::If {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
    })
}

pub fn cast(operand: Expr, target: AtomicType) -> Expr {
    Expr::new(ExprKind::Cast {
        operand: Box::new(operand),
        target,
        allow_empty: true,
    })
}

pub fn castable(operand: Expr, target: AtomicType) -> Expr {
    Expr::new(ExprKind::Castable {
        operand: Box::new(operand),
        target,
        allow_empty: true,
    })
}

pub fn instance_of(operand: Expr, ty: SequenceType) -> Expr {
    Expr::new(ExprKind::InstanceOf {
        operand: Box::new(operand),
        ty,
    })
}

pub fn typeswitch(
    operand: Expr,
    cases: Vec<(Option<&str>, Vec<SequenceType>, Expr)>,
    default: (Option<&str>, Expr),
) -> Expr {
    let cases = cases
        .into_iter()
        .map(|(variable, types, body)| TypeSwitchCase {
            variable: variable.map(Arc::from),
            types,
            body,
        })
        .collect();
    Expr::new(ExprKind::TypeSwitch(Box::new(TypeSwitch {
        operand,
        cases,
        default: TypeSwitchDefault {
            variable: default.0.map(Arc::from),
            body: default.1,
        },
    })))
}

fn postfix(base: Expr, op: PostfixOp) -> Expr {
    match base.kind {
        ExprKind::Postfix { base, mut ops } => {
            ops.push(op);
            Expr::new(ExprKind::Postfix { base, ops })
        }
        kind => {
            let base = Expr {
                kind,
                location: base.location,
                mode: base.mode,
            };
            Expr::new(ExprKind::Postfix {
                base: Box::new(base),
                ops: vec![op],
            })
        }
    }
}

pub fn predicate(base: Expr, condition: Expr) -> Expr {
    postfix(base, PostfixOp::Predicate(condition))
}

pub fn lookup(base: Expr, key: &str) -> Expr {
    postfix(base, PostfixOp::ObjectLookup(lit(key)))
}

pub fn array_lookup(base: Expr, position: Expr) -> Expr {
    postfix(base, PostfixOp::ArrayLookup(position))
}

pub fn unbox(base: Expr) -> Expr {
    postfix(base, PostfixOp::Unbox)
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::FunctionCall {
        function: FunctionIdentifier::new(name, args.len()),
        args: args.into_iter().map(Some).collect(),
    })
}

/// Call with `?` placeholders where `args` holds `None`.
pub fn partial(name: &str, args: Vec<Option<Expr>>) -> Expr {
    Expr::new(ExprKind::FunctionCall {
        function: FunctionIdentifier::new(name, args.len()),
        args,
    })
}

pub fn dynamic_call(callee: Expr, args: Vec<Option<Expr>>) -> Expr {
    Expr::new(ExprKind::DynamicCall {
        callee: Box::new(callee),
        args,
    })
}

pub fn inline_function(params: Vec<(&str, SequenceType)>, body: Expr) -> Expr {
    Expr::new(ExprKind::InlineFunction(Arc::new(InlineFunction {
        params: params.into_iter().map(|(n, t)| Param::new(n, t)).collect(),
        return_type: SequenceType::ITEM_STAR,
        body,
    })))
}

pub fn function(name: &str, params: Vec<(&str, SequenceType)>, body: Expr) -> FunctionDecl {
    FunctionDecl {
        id: FunctionIdentifier::new(name, params.len()),
        params: params.into_iter().map(|(n, t)| Param::new(n, t)).collect(),
        return_type: SequenceType::ITEM_STAR,
        body,
        location: SourceLocation::default(),
        param_modes: Vec::new(),
        mode: ExecutionMode::Unset,
    }
}

pub fn declare_variable(name: &str, value: Expr) -> VariableDecl {
    VariableDecl {
        name: Arc::from(name),
        value: Some(value),
        location: SourceLocation::default(),
        mode: ExecutionMode::Unset,
    }
}

pub fn declare_external(name: &str) -> VariableDecl {
    VariableDecl {
        name: Arc::from(name),
        value: None,
        location: SourceLocation::default(),
        mode: ExecutionMode::Unset,
    }
}

/// Clause-by-clause FLWOR construction; finish with [`FlworBuilder::return_`].
#[derive(Debug, Default)]
pub struct FlworBuilder {
    clauses: Vec<Clause>,
}

pub fn flwor() -> FlworBuilder {
    FlworBuilder::default()
}

impl FlworBuilder {
    fn push(mut self, kind: ClauseKind) -> Self {
        let line = u32::try_from(self.clauses.len() + 1).unwrap_or(u32::MAX);
        self.clauses.push(Clause {
            kind,
            location: SourceLocation::new(line, 1),
            mode: ExecutionMode::Unset,
        });
        self
    }

    pub fn for_(self, variable: &str, expr: Expr) -> Self {
        self.push(ClauseKind::For {
            variable: Arc::from(variable),
            position: None,
            allowing_empty: false,
            expr,
        })
    }

    pub fn for_at(self, variable: &str, position: &str, expr: Expr) -> Self {
        self.push(ClauseKind::For {
            variable: Arc::from(variable),
            position: Some(Arc::from(position)),
            allowing_empty: false,
            expr,
        })
    }

    pub fn for_allowing_empty(self, variable: &str, expr: Expr) -> Self {
        self.push(ClauseKind::For {
            variable: Arc::from(variable),
            position: None,
            allowing_empty: true,
            expr,
        })
    }

    pub fn let_(self, variable: &str, expr: Expr) -> Self {
        self.push(ClauseKind::Let {
            variable: Arc::from(variable),
            expr,
        })
    }

    pub fn where_(self, condition: Expr) -> Self {
        self.push(ClauseKind::Where(condition))
    }

    pub fn group_by(self, keys: Vec<(&str, Option<Expr>)>) -> Self {
        self.push(ClauseKind::GroupBy(
            keys.into_iter()
                .map(|(v, expr)| GroupKey {
                    variable: Arc::from(v),
                    expr,
                })
                .collect(),
        ))
    }

    pub fn order_by(self, keys: Vec<(Expr, bool)>) -> Self {
        self.push(ClauseKind::OrderBy(
            keys.into_iter()
                .map(|(expr, descending)| OrderKey { expr, descending })
                .collect(),
        ))
    }

    pub fn count(self, variable: &str) -> Self {
        self.push(ClauseKind::Count(Arc::from(variable)))
    }

    pub fn return_(self, return_expr: Expr) -> Expr {
        Expr::new(ExprKind::Flwor(Box::new(Flwor {
            clauses: self.clauses,
            return_expr,
        })))
    }
}
