//! Static variable-usage analysis feeding tuple projection.

use std::collections::BTreeMap;

use crate::expr::{ClauseKind, Expr, ExprKind, PostfixOp, VarName, CONTEXT_ITEM};

/// How much of a variable's value a consumer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// The whole sequence.
    Full,
    /// Only its length, through `count($v)`.
    Count,
    /// Only whether it is empty, through `exists($v)` / `empty($v)`.
    Exists,
}

impl DependencyKind {
    /// True when the value can be carried as a count instead of the sequence.
    pub fn is_count_only(self) -> bool {
        matches!(self, DependencyKind::Count | DependencyKind::Exists)
    }
}

pub type Dependencies = BTreeMap<VarName, DependencyKind>;

/// Add one requirement; two different kinds for the same variable collapse to `Full`.
pub fn require(deps: &mut Dependencies, name: VarName, kind: DependencyKind) {
    deps.entry(name)
        .and_modify(|existing| {
            if *existing != kind {
                *existing = DependencyKind::Full;
            }
        })
        .or_insert(kind);
}

pub fn merge(into: &mut Dependencies, from: &Dependencies) {
    for (name, kind) in from {
        require(into, name.clone(), *kind);
    }
}

fn remove_all<'a>(deps: &mut Dependencies, names: impl IntoIterator<Item = &'a VarName>) {
    for name in names {
        deps.remove(name);
    }
}

/// Free variables of `expr` with the usage kind each one needs.
pub fn expr_dependencies(expr: &Expr) -> Dependencies {
    let mut deps = Dependencies::new();
    collect(expr, &mut deps);
    deps
}

fn collect(expr: &Expr, deps: &mut Dependencies) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::ContextItem => {}
        ExprKind::VarRef(name) => require(deps, name.clone(), DependencyKind::Full),
        ExprKind::Sequence(items) => items.iter().for_each(|e| collect(e, deps)),
        ExprKind::Range { from, to } => {
            collect(from, deps);
            collect(to, deps);
        }
        ExprKind::ArrayConstructor(content) => {
            if let Some(c) = content {
                collect(c, deps);
            }
        }
        ExprKind::ObjectConstructor(pairs) => {
            for (k, v) in pairs {
                collect(k, deps);
                collect(v, deps);
            }
        }
        ExprKind::Arithmetic { left, right, .. }
        | ExprKind::Comparison { left, right, .. }
        | ExprKind::And(left, right)
        | ExprKind::Or(left, right)
        | ExprKind::StringConcat(left, right) => {
            collect(left, deps);
            collect(right, deps);
        }
        ExprKind::Not(operand)
        | ExprKind::Cast { operand, .. }
        | ExprKind::Castable { operand, .. }
        | ExprKind::InstanceOf { operand, .. } => collect(operand, deps),
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect(condition, deps);
            collect(then_branch, deps);
            collect(else_branch, deps);
        }
        ExprKind::TypeSwitch(ts) => {
            collect(&ts.operand, deps);
            for case in &ts.cases {
                let mut inner = expr_dependencies(&case.body);
                remove_all(&mut inner, case.variable.iter());
                merge(deps, &inner);
            }
            let mut inner = expr_dependencies(&ts.default.body);
            remove_all(&mut inner, ts.default.variable.iter());
            merge(deps, &inner);
        }
        ExprKind::Postfix { base, ops } => {
            collect(base, deps);
            for op in ops {
                match op {
                    PostfixOp::Predicate(e) | PostfixOp::ObjectLookup(e) | PostfixOp::ArrayLookup(e) => {
                        let mut inner = expr_dependencies(e);
                        inner.remove(CONTEXT_ITEM);
                        merge(deps, &inner);
                    }
                    PostfixOp::Unbox => {}
                }
            }
        }
        ExprKind::FunctionCall { function, args } => {
            let derived = match (&*function.name, args.as_slice()) {
                ("count", [Some(arg)]) => Some((arg, DependencyKind::Count)),
                ("exists" | "empty", [Some(arg)]) => Some((arg, DependencyKind::Exists)),
                _ => None,
            };
            if let Some((arg, kind)) = derived
                && let ExprKind::VarRef(name) = &arg.kind
            {
                require(deps, name.clone(), kind);
                return;
            }
            args.iter().flatten().for_each(|a| collect(a, deps));
        }
        ExprKind::InlineFunction(f) => {
            let mut inner = expr_dependencies(&f.body);
            remove_all(&mut inner, f.params.iter().map(|p| &p.name));
            merge(deps, &inner);
        }
        ExprKind::DynamicCall { callee, args } => {
            collect(callee, deps);
            args.iter().flatten().for_each(|a| collect(a, deps));
        }
        ExprKind::Flwor(flwor) => {
            // walk backwards so variables bound by earlier clauses hide later uses
            let mut inner = expr_dependencies(&flwor.return_expr);
            for clause in flwor.clauses.iter().rev() {
                remove_all(&mut inner, clause.kind.bound_variables().iter());
                merge(&mut inner, &clause_dependencies(&clause.kind));
            }
            merge(deps, &inner);
        }
    }
}

/// Variables read by the clause's own expressions (not by the rest of the pipeline).
pub fn clause_dependencies(kind: &ClauseKind) -> Dependencies {
    let mut deps = Dependencies::new();
    match kind {
        ClauseKind::For { expr, .. } | ClauseKind::Let { expr, .. } | ClauseKind::Where(expr) => {
            collect(expr, &mut deps);
        }
        ClauseKind::GroupBy(keys) => {
            for key in keys {
                match &key.expr {
                    Some(e) => collect(e, &mut deps),
                    None => require(&mut deps, key.variable.clone(), DependencyKind::Full),
                }
            }
        }
        ClauseKind::OrderBy(keys) => keys.iter().for_each(|k| collect(&k.expr, &mut deps)),
        ClauseKind::Count(_) => {}
    }
    deps
}
