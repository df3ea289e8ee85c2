//! Execution-mode analysis.
//!
//! The analyzer walks a [`Module`] and annotates every expression, clause,
//! function declaration and variable declaration with an [`ExecutionMode`].
//! Recursive and mutually recursive functions are resolved by a fixed-point
//! loop: each pass reads parameter and return modes from an immutable
//! registry snapshot and records what it observes into a fresh registry.
//! The loop ends once a pass under the converging configuration produces a
//! registry equal to its input snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::catalogue::FunctionCatalogue;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::{ClauseKind, Expr, ExprKind, Flwor, FunctionDecl, FunctionIdentifier, Module, PostfixOp, VarName};
use crate::mode::ExecutionMode;

pub mod dependencies;
pub mod registry;
pub mod scope;

pub use dependencies::{DependencyKind, Dependencies};
pub use registry::FunctionModeRegistry;
pub use scope::{ScopeId, StaticContext};

pub const DEFAULT_MAX_PASSES: usize = 64;

/// Controls how unresolved modes are treated during one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitorConfig {
    /// Resolve `Unset` to `Local` when a node's mode is still unknown.
    pub unset_to_local: bool,
}

impl VisitorConfig {
    /// First passes: leave unknown modes unset so call-site evidence can accumulate.
    pub const DISCOVERY: VisitorConfig = VisitorConfig { unset_to_local: false };
    /// Final passes: anything still unknown is local.
    pub const CONVERGENCE: VisitorConfig = VisitorConfig { unset_to_local: true };
}

/// Result of a single pass over a module.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub registry: FunctionModeRegistry,
    /// Caller -> callees observed during the pass.
    pub calls: BTreeMap<FunctionIdentifier, BTreeSet<FunctionIdentifier>>,
}

pub struct ExecutionModeAnalyzer<'c> {
    catalogue: &'c dyn FunctionCatalogue,
    max_passes: usize,
}

impl<'c> ExecutionModeAnalyzer<'c> {
    pub fn new(catalogue: &'c dyn FunctionCatalogue) -> Self {
        Self {
            catalogue,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    #[must_use]
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Annotate `module` until the function registry reaches a fixed point.
    pub fn analyze(&self, module: &mut Module) -> Result<FunctionModeRegistry> {
        let mut snapshot = FunctionModeRegistry::new();
        let mut config = VisitorConfig::DISCOVERY;
        let mut worklist: Option<BTreeSet<FunctionIdentifier>> = None;
        let mut callers: BTreeMap<FunctionIdentifier, BTreeSet<FunctionIdentifier>> = BTreeMap::new();

        for pass in 1..=self.max_passes {
            let outcome = self.run_pass(module, &snapshot, config, worklist.as_ref())?;
            for (caller, callees) in &outcome.calls {
                for callee in callees {
                    callers.entry(callee.clone()).or_default().insert(caller.clone());
                }
            }
            let changed = outcome.registry.changed_since(&snapshot);
            tracing::debug!(
                pass,
                unset_to_local = config.unset_to_local,
                changed = changed.len(),
                "execution-mode analysis pass finished"
            );
            if changed.is_empty() {
                if config.unset_to_local {
                    return Ok(outcome.registry);
                }
                config = VisitorConfig::CONVERGENCE;
                worklist = None;
                continue;
            }
            let mut next: BTreeSet<FunctionIdentifier> = BTreeSet::new();
            for id in changed {
                if let Some(c) = callers.get(&id) {
                    next.extend(c.iter().cloned());
                }
                tracing::trace!(function = %id, "function modes changed");
                next.insert(id);
            }
            worklist = Some(next);
            snapshot = outcome.registry;
        }
        Err(Error::internal(format!(
            "execution-mode analysis did not converge within {} passes",
            self.max_passes
        )))
    }

    /// Run one pass. Functions outside `only` (when given) keep their
    /// annotations from earlier passes; variable declarations and the main
    /// expression are always visited.
    pub fn run_pass(
        &self,
        module: &mut Module,
        snapshot: &FunctionModeRegistry,
        config: VisitorConfig,
        only: Option<&BTreeSet<FunctionIdentifier>>,
    ) -> Result<PassOutcome> {
        let declared: BTreeSet<FunctionIdentifier> = module.functions.iter().map(|f| f.id.clone()).collect();
        let mut pass = Pass {
            catalogue: self.catalogue,
            declared: &declared,
            snapshot,
            next: snapshot.clone(),
            config,
            scopes: StaticContext::new(),
            current_function: None,
            calls: BTreeMap::new(),
        };
        let root = pass.scopes.root();
        for decl in &mut module.variables {
            let mode = match &mut decl.value {
                Some(value) => pass.visit(value, root)?,
                None => ExecutionMode::Local,
            };
            decl.mode = decl.mode.join(mode.or_local(config.unset_to_local));
            pass.scopes.bind(root, decl.name.clone(), decl.mode);
        }
        for decl in &mut module.functions {
            if only.is_none_or(|set| set.contains(&decl.id)) {
                pass.visit_function(decl, root)?;
            }
        }
        pass.visit(&mut module.main, root)?;
        Ok(PassOutcome {
            registry: pass.next,
            calls: pass.calls,
        })
    }
}

struct Pass<'a> {
    catalogue: &'a dyn FunctionCatalogue,
    declared: &'a BTreeSet<FunctionIdentifier>,
    snapshot: &'a FunctionModeRegistry,
    next: FunctionModeRegistry,
    config: VisitorConfig,
    scopes: StaticContext,
    current_function: Option<FunctionIdentifier>,
    calls: BTreeMap<FunctionIdentifier, BTreeSet<FunctionIdentifier>>,
}

impl Pass<'_> {
    fn resolve(&self, mode: ExecutionMode) -> ExecutionMode {
        mode.or_local(self.config.unset_to_local)
    }

    fn visit_function(&mut self, decl: &mut FunctionDecl, root: ScopeId) -> Result<()> {
        let scope = self.scopes.child(root);
        let mut modes = Vec::with_capacity(decl.params.len());
        for (index, param) in decl.params.iter().enumerate() {
            let mode = if param.ty.is_local_only() {
                ExecutionMode::Local
            } else {
                self.resolve(self.snapshot.param_mode(&decl.id, index))
            };
            self.scopes.bind(scope, param.name.clone(), mode);
            modes.push(mode);
        }
        self.current_function = Some(decl.id.clone());
        let body = self.visit(&mut decl.body, scope);
        self.current_function = None;
        let body = body?;

        let mode = if decl.return_type.is_local_only() {
            ExecutionMode::Local
        } else {
            body
        };
        decl.mode = decl.mode.join(self.resolve(mode));
        decl.param_modes.resize(modes.len(), ExecutionMode::Unset);
        for (slot, mode) in decl.param_modes.iter_mut().zip(modes) {
            *slot = slot.join(mode);
        }
        self.next.record_return(&decl.id, decl.mode);
        Ok(())
    }

    fn visit(&mut self, expr: &mut Expr, scope: ScopeId) -> Result<ExecutionMode> {
        let mode = self.compute(expr, scope)?;
        expr.mode = expr.mode.join(self.resolve(mode));
        Ok(expr.mode)
    }

    fn visit_all<'e>(
        &mut self,
        exprs: impl IntoIterator<Item = &'e mut Expr>,
        scope: ScopeId,
    ) -> Result<Vec<ExecutionMode>> {
        exprs.into_iter().map(|e| self.visit(e, scope)).collect()
    }

    /// Mode of a branching construct: distributed only if every branch is.
    fn branches(modes: &[ExecutionMode]) -> ExecutionMode {
        if !modes.is_empty() && modes.iter().all(|m| m.is_distributed()) {
            ExecutionMode::join_all(modes.iter().copied())
        } else {
            ExecutionMode::Local
        }
    }

    fn compute(&mut self, expr: &mut Expr, scope: ScopeId) -> Result<ExecutionMode> {
        let location = expr.location.clone();
        let mode = match &mut expr.kind {
            ExprKind::Literal(_) | ExprKind::ContextItem => ExecutionMode::Local,
            ExprKind::VarRef(name) => self.scopes.lookup(scope, name).ok_or_else(|| {
                Error::new(ErrorCode::UnboundVariable, format!("variable ${name} is not bound")).at(&location)
            })?,
            ExprKind::Sequence(items) => {
                let modes = self.visit_all(items.iter_mut(), scope)?;
                Self::branches(&modes)
            }
            ExprKind::Range { from: left, to: right }
            | ExprKind::Arithmetic { left, right, .. }
            | ExprKind::Comparison { left, right, .. }
            | ExprKind::And(left, right)
            | ExprKind::Or(left, right)
            | ExprKind::StringConcat(left, right) => {
                self.visit(left, scope)?;
                self.visit(right, scope)?;
                ExecutionMode::Local
            }
            ExprKind::Not(operand)
            | ExprKind::Cast { operand, .. }
            | ExprKind::Castable { operand, .. }
            | ExprKind::InstanceOf { operand, .. } => {
                self.visit(operand, scope)?;
                ExecutionMode::Local
            }
            ExprKind::ArrayConstructor(content) => {
                if let Some(c) = content {
                    self.visit(c, scope)?;
                }
                ExecutionMode::Local
            }
            ExprKind::ObjectConstructor(pairs) => {
                for (k, v) in pairs {
                    self.visit(k, scope)?;
                    self.visit(v, scope)?;
                }
                ExecutionMode::Local
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.visit(condition, scope)?;
                let t = self.visit(then_branch, scope)?;
                let e = self.visit(else_branch, scope)?;
                Self::branches(&[t, e])
            }
            ExprKind::TypeSwitch(ts) => {
                self.visit(&mut ts.operand, scope)?;
                let mut modes = Vec::with_capacity(ts.cases.len() + 1);
                for case in &mut ts.cases {
                    let case_scope = self.scopes.child(scope);
                    if let Some(v) = &case.variable {
                        self.scopes.bind(case_scope, v.clone(), ExecutionMode::Local);
                    }
                    modes.push(self.visit(&mut case.body, case_scope)?);
                }
                let default_scope = self.scopes.child(scope);
                if let Some(v) = &ts.default.variable {
                    self.scopes.bind(default_scope, v.clone(), ExecutionMode::Local);
                }
                modes.push(self.visit(&mut ts.default.body, default_scope)?);
                Self::branches(&modes)
            }
            ExprKind::Postfix { base, ops } => {
                let base_mode = self.visit(base, scope)?;
                let mut reshapes = false;
                for op in ops.iter_mut() {
                    let inner = match op {
                        PostfixOp::Predicate(e) => e,
                        PostfixOp::ObjectLookup(e) | PostfixOp::ArrayLookup(e) => {
                            reshapes = true;
                            e
                        }
                        PostfixOp::Unbox => {
                            reshapes = true;
                            continue;
                        }
                    };
                    let item_scope = self.scopes.child(scope);
                    self.scopes
                        .bind(item_scope, VarName::from(crate::expr::CONTEXT_ITEM), ExecutionMode::Local);
                    self.visit(inner, item_scope)?;
                }
                if reshapes && base_mode == ExecutionMode::Structured {
                    ExecutionMode::Distributed
                } else {
                    base_mode
                }
            }
            ExprKind::FunctionCall { function, args } => {
                let partial = args.iter().any(Option::is_none);
                let mut modes = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    modes.push(match arg {
                        Some(a) => self.visit(a, scope)?,
                        None => ExecutionMode::Local,
                    });
                }
                let function = function.clone();
                self.call_mode(&function, &modes, partial, &location)?
            }
            ExprKind::InlineFunction(f) => {
                let f = Arc::make_mut(f);
                let body_scope = self.scopes.child(scope);
                for p in &f.params {
                    self.scopes.bind(body_scope, p.name.clone(), ExecutionMode::Local);
                }
                self.visit(&mut f.body, body_scope)?;
                ExecutionMode::Local
            }
            ExprKind::DynamicCall { callee, args } => {
                self.visit(callee, scope)?;
                for a in args.iter_mut().flatten() {
                    self.visit(a, scope)?;
                }
                ExecutionMode::Local
            }
            ExprKind::Flwor(flwor) => self.visit_flwor(flwor, scope)?,
        };
        Ok(mode)
    }

    fn call_mode(
        &mut self,
        function: &FunctionIdentifier,
        arg_modes: &[ExecutionMode],
        partial: bool,
        location: &crate::error::SourceLocation,
    ) -> Result<ExecutionMode> {
        if let Some(builtin) = self.catalogue.builtin(function) {
            if partial {
                return Ok(ExecutionMode::Local);
            }
            return Ok(builtin.return_mode(arg_modes));
        }
        if !self.declared.contains(function) {
            return Err(
                Error::new(ErrorCode::UnknownFunction, format!("unknown function {function}")).at(location)
            );
        }
        if let Some(caller) = &self.current_function {
            self.calls.entry(caller.clone()).or_default().insert(function.clone());
        }
        if partial {
            // the resulting function item is called with materialized values
            self.next
                .record_call(function, &vec![ExecutionMode::Local; arg_modes.len()]);
            return Ok(ExecutionMode::Local);
        }
        self.next.record_call(function, arg_modes);
        Ok(self.snapshot.return_mode(function))
    }

    fn visit_flwor(&mut self, flwor: &mut Flwor, scope: ScopeId) -> Result<ExecutionMode> {
        let mut current = self.scopes.child(scope);
        let mut previous: Option<ExecutionMode> = None;
        let mut bound: Vec<VarName> = Vec::new();

        for clause in &mut flwor.clauses {
            let mode = match &mut clause.kind {
                ClauseKind::For {
                    variable,
                    position,
                    expr,
                    ..
                } => {
                    let expr_mode = self.visit(expr, current)?;
                    let mode = match previous {
                        None if expr_mode.is_distributed() => ExecutionMode::Distributed,
                        None => ExecutionMode::Local,
                        Some(prev) => {
                            if !prev.is_distributed() && expr_mode.is_distributed() {
                                tracing::trace!(
                                    variable = %variable,
                                    "distributed for clause follows a local clause, evaluating locally"
                                );
                            }
                            prev
                        }
                    };
                    let child = self.scopes.child(current);
                    self.scopes.bind(child, variable.clone(), ExecutionMode::Local);
                    bound.push(variable.clone());
                    if let Some(p) = position {
                        self.scopes.bind(child, p.clone(), ExecutionMode::Local);
                        bound.push(p.clone());
                    }
                    current = child;
                    mode
                }
                ClauseKind::Let { variable, expr } => {
                    let expr_mode = self.visit(expr, current)?;
                    // Inside a distributed chain the expression runs once per row.
                    let variable_mode = match previous {
                        Some(prev) if prev.is_distributed() => ExecutionMode::Local,
                        _ => expr_mode,
                    };
                    self.scopes.bind(current, variable.clone(), self.resolve(variable_mode));
                    bound.push(variable.clone());
                    previous.unwrap_or(ExecutionMode::Local)
                }
                ClauseKind::Where(expr) => {
                    self.visit(expr, current)?;
                    previous.unwrap_or(ExecutionMode::Local)
                }
                ClauseKind::GroupBy(keys) => {
                    for key in keys.iter_mut() {
                        if let Some(e) = &mut key.expr {
                            self.visit(e, current)?;
                        }
                    }
                    let child = self.scopes.child(current);
                    for name in &bound {
                        self.scopes.bind(child, name.clone(), ExecutionMode::Local);
                    }
                    for key in keys.iter() {
                        self.scopes.bind(child, key.variable.clone(), ExecutionMode::Local);
                        if !bound.contains(&key.variable) {
                            bound.push(key.variable.clone());
                        }
                    }
                    current = child;
                    previous.unwrap_or(ExecutionMode::Local)
                }
                ClauseKind::OrderBy(keys) => {
                    for key in keys.iter_mut() {
                        self.visit(&mut key.expr, current)?;
                    }
                    previous.unwrap_or(ExecutionMode::Local)
                }
                ClauseKind::Count(variable) => {
                    self.scopes.bind(current, variable.clone(), ExecutionMode::Local);
                    bound.push(variable.clone());
                    previous.unwrap_or(ExecutionMode::Local)
                }
            };
            clause.mode = clause.mode.join(self.resolve(mode));
            previous = Some(clause.mode);
        }

        self.visit(&mut flwor.return_expr, current)?;
        Ok(match previous {
            Some(last) if last.is_distributed() => ExecutionMode::Distributed,
            _ => ExecutionMode::Local,
        })
    }
}
