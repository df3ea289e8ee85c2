//! Translation of annotated expressions into runtime iterators.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::function::{DynamicCall, FunctionBody, FunctionCallSource, InlineFunctionSource, PartialApplication};
use super::operational::{
    Arithmetic, Cast, Castable, Comparison, Connective, IfSource, InstanceOf, Logical, Not, StringConcat,
    TypeSwitchCase, TypeSwitchSource,
};
use super::postfix::{PostfixSource, PostfixStep};
use super::primary::{ArrayConstructor, CommaSource, ContextItem, ObjectConstructor, RangeSource, VariableSource};
use super::{Buffered, Compute, Computed, Hybrid, RuntimeIterator, SequenceSource, builtins};
use crate::catalogue::FunctionCatalogue;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::expr::{Expr, ExprKind, FunctionDecl, FunctionIdentifier, Module, PostfixOp};
use crate::sequence::Sequence;

fn computed<C: Compute + 'static>(inner: C, location: SourceLocation) -> RuntimeIterator {
    RuntimeIterator::local(Computed::iterator(inner, location))
}

/// Builds runtime iterators for a module's expressions.
///
/// Cheap to clone; row functions carry a copy so engine workers can build
/// fresh iterators for every row they evaluate.
#[derive(Clone)]
pub struct RuntimeBuilder {
    functions: Arc<BTreeMap<FunctionIdentifier, Arc<FunctionDecl>>>,
    catalogue: Arc<dyn FunctionCatalogue>,
}

impl RuntimeBuilder {
    pub fn new(module: &Module, catalogue: Arc<dyn FunctionCatalogue>) -> Self {
        let functions = module
            .functions
            .iter()
            .map(|decl| (decl.id.clone(), Arc::new(decl.clone())))
            .collect();
        Self {
            functions: Arc::new(functions),
            catalogue,
        }
    }

    pub fn function(&self, id: &FunctionIdentifier) -> Option<&Arc<FunctionDecl>> {
        self.functions.get(id)
    }

    fn build_all(&self, exprs: &[Expr]) -> Result<Vec<RuntimeIterator>> {
        exprs.iter().map(|e| self.build(e)).collect()
    }

    fn build_optional(&self, args: &[Option<Expr>]) -> Result<Vec<Option<RuntimeIterator>>> {
        args.iter().map(|arg| arg.as_ref().map(|e| self.build(e)).transpose()).collect()
    }

    pub fn build(&self, expr: &Expr) -> Result<RuntimeIterator> {
        let location = expr.location.clone();
        let mode = expr.mode;
        match &expr.kind {
            ExprKind::Literal(item) => Ok(RuntimeIterator::local(SequenceSource::iterator(
                Sequence::single(item.clone()),
                location,
            ))),
            ExprKind::VarRef(name) => Ok(RuntimeIterator::hybrid(Hybrid::new(
                VariableSource::new(name.clone(), location.clone()),
                mode,
                location,
            ))),
            ExprKind::ContextItem => Ok(computed(ContextItem, location)),
            ExprKind::Sequence(children) if children.is_empty() => Ok(RuntimeIterator::local(
                SequenceSource::iterator(Sequence::empty(), location),
            )),
            ExprKind::Sequence(children) => Ok(RuntimeIterator::hybrid(Hybrid::new(
                CommaSource::new(self.build_all(children)?),
                mode,
                location,
            ))),
            ExprKind::Range { from, to } => Ok(RuntimeIterator::local(Buffered::new(
                RangeSource::new(self.build(from)?, self.build(to)?),
                location,
            ))),
            ExprKind::ArrayConstructor(content) => {
                let content = content.as_deref().map(|e| self.build(e)).transpose()?;
                Ok(computed(ArrayConstructor::new(content), location))
            }
            ExprKind::ObjectConstructor(pairs) => {
                let pairs = pairs
                    .iter()
                    .map(|(k, v)| Ok((self.build(k)?, self.build(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(computed(ObjectConstructor::new(pairs), location))
            }
            ExprKind::Arithmetic { op, left, right } => {
                Ok(computed(Arithmetic::new(*op, self.build(left)?, self.build(right)?), location))
            }
            ExprKind::Comparison { op, left, right } => Ok(computed(
                Comparison::new(*op, self.build(left)?, self.build(right)?),
                location,
            )),
            ExprKind::And(left, right) => Ok(computed(
                Logical::new(Connective::And, self.build(left)?, self.build(right)?),
                location,
            )),
            ExprKind::Or(left, right) => Ok(computed(
                Logical::new(Connective::Or, self.build(left)?, self.build(right)?),
                location,
            )),
            ExprKind::Not(operand) => Ok(computed(Not::new(self.build(operand)?), location)),
            ExprKind::StringConcat(left, right) => Ok(computed(
                StringConcat::new(self.build(left)?, self.build(right)?),
                location,
            )),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => Ok(RuntimeIterator::hybrid(Hybrid::new(
                IfSource::new(self.build(condition)?, self.build(then_branch)?, self.build(else_branch)?),
                mode,
                location,
            ))),
            ExprKind::Cast {
                operand,
                target,
                allow_empty,
            } => Ok(computed(Cast::new(self.build(operand)?, *target, *allow_empty), location)),
            ExprKind::Castable {
                operand,
                target,
                allow_empty,
            } => Ok(computed(Castable::new(self.build(operand)?, *target, *allow_empty), location)),
            ExprKind::InstanceOf { operand, ty } => Ok(computed(
                InstanceOf::new(self.build(operand)?, ty.clone()),
                location,
            )),
            ExprKind::TypeSwitch(ts) => {
                let cases = ts
                    .cases
                    .iter()
                    .map(|case| {
                        Ok(TypeSwitchCase {
                            variable: case.variable.clone(),
                            types: case.types.clone(),
                            body: self.build(&case.body)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RuntimeIterator::hybrid(Hybrid::new(
                    TypeSwitchSource::new(
                        self.build(&ts.operand)?,
                        cases,
                        ts.default.variable.clone(),
                        self.build(&ts.default.body)?,
                    ),
                    mode,
                    location,
                )))
            }
            ExprKind::Postfix { base, ops } => {
                let steps = ops
                    .iter()
                    .map(|op| {
                        Ok(match op {
                            PostfixOp::Predicate(e) => PostfixStep::Predicate {
                                expr: Arc::new(e.clone()),
                                iter: self.build(e)?,
                            },
                            PostfixOp::ObjectLookup(e) => PostfixStep::ObjectLookup(self.build(e)?),
                            PostfixOp::ArrayLookup(e) => PostfixStep::ArrayLookup(self.build(e)?),
                            PostfixOp::Unbox => PostfixStep::Unbox,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RuntimeIterator::hybrid(Hybrid::new(
                    PostfixSource::new(self.build(base)?, steps, self.clone()),
                    mode,
                    location,
                )))
            }
            ExprKind::FunctionCall { function, args } => self.build_call(expr, function, args),
            ExprKind::InlineFunction(f) => Ok(computed(InlineFunctionSource::new(f.clone(), self.clone()), location)),
            ExprKind::DynamicCall { callee, args } => {
                Ok(computed(DynamicCall::new(self.build(callee)?, self.build_optional(args)?), location))
            }
            ExprKind::Flwor(flwor) => crate::flwor::build(self, flwor, mode, location),
        }
    }

    /// Built-in functions shadow declared functions with the same identifier.
    fn build_call(&self, expr: &Expr, id: &FunctionIdentifier, args: &[Option<Expr>]) -> Result<RuntimeIterator> {
        let location = expr.location.clone();
        let body = if let Some(builtin) = self.catalogue.builtin(id) {
            FunctionBody::Builtin(builtin, id.clone())
        } else if let Some(decl) = self.functions.get(id) {
            FunctionBody::Declared(decl.clone())
        } else {
            return Err(Error::new(ErrorCode::UnknownFunction, format!("unknown function {id}")).at(&location));
        };

        if expr.is_partial_application() {
            return Ok(computed(PartialApplication::new(body, self.build_optional(args)?, self.clone()), location));
        }
        let iters: Vec<RuntimeIterator> = args
            .iter()
            .flatten()
            .map(|e| self.build(e))
            .collect::<Result<_>>()?;
        match body {
            FunctionBody::Builtin(builtin, _) => {
                let variable = match args.first() {
                    Some(Some(Expr {
                        kind: ExprKind::VarRef(name),
                        ..
                    })) => Some(name.clone()),
                    _ => None,
                };
                builtins::build(builtin, iters, variable, expr.mode, location)
            }
            FunctionBody::Declared(decl) => Ok(RuntimeIterator::hybrid(Hybrid::new(
                FunctionCallSource::new(decl, iters, self.clone()),
                expr.mode,
                location,
            ))),
            FunctionBody::Inline(_) => Err(Error::internal("static call resolved to an inline function")),
        }
    }
}
