//! Function items, user-defined function calls and dynamic calls.

use core::fmt;
use std::sync::Arc;

use super::{
    Compute, HybridSource, PullIterator, RuntimeBuilder, RuntimeIterator, SequenceSource, Source, builtins,
    into_distributed, materialize,
};
use crate::catalogue::Builtin;
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::DistributedItems;
use crate::error::{Error, Result, SourceLocation};
use crate::expr::{FunctionDecl, FunctionIdentifier, InlineFunction, Param};
use crate::item::Item;
use crate::mode::ExecutionMode;
use crate::sequence::Sequence;

#[derive(Clone)]
pub enum FunctionBody {
    Declared(Arc<FunctionDecl>),
    Inline(Arc<InlineFunction>),
    Builtin(Builtin, FunctionIdentifier),
}

/// A function value. Partial application fills some argument slots in
/// `bound`; the remaining `None` slots make up the item's arity.
#[derive(Clone)]
pub struct FunctionItem {
    body: FunctionBody,
    closure: Option<DynamicContext>,
    bound: Vec<Option<Sequence>>,
    builder: RuntimeBuilder,
}

impl FunctionItem {
    pub fn new(body: FunctionBody, closure: Option<DynamicContext>, builder: RuntimeBuilder) -> Self {
        let arity = match &body {
            FunctionBody::Declared(decl) => decl.params.len(),
            FunctionBody::Inline(f) => f.params.len(),
            FunctionBody::Builtin(_, id) => id.arity,
        };
        Self {
            body,
            closure,
            bound: vec![None; arity],
            builder,
        }
    }

    pub fn name(&self) -> Option<&FunctionIdentifier> {
        match &self.body {
            FunctionBody::Declared(decl) => Some(&decl.id),
            FunctionBody::Builtin(_, id) => Some(id),
            FunctionBody::Inline(_) => None,
        }
    }

    /// Number of arguments still expected.
    pub fn arity(&self) -> usize {
        self.bound.iter().filter(|slot| slot.is_none()).count()
    }

    fn params(&self) -> Option<&[Param]> {
        match &self.body {
            FunctionBody::Declared(decl) => Some(&decl.params),
            FunctionBody::Inline(f) => Some(&f.params),
            FunctionBody::Builtin(..) => None,
        }
    }

    /// Fill the open slots in order; `None` arguments stay open.
    pub fn partially_apply(&self, args: Vec<Option<Sequence>>) -> Result<FunctionItem> {
        if args.len() != self.arity() {
            return Err(self.arity_error(args.len()));
        }
        let mut args = args.into_iter();
        let bound = self
            .bound
            .iter()
            .map(|slot| match slot {
                Some(value) => Some(value.clone()),
                None => args.next().flatten(),
            })
            .collect();
        Ok(FunctionItem {
            bound,
            ..self.clone()
        })
    }

    fn arity_error(&self, given: usize) -> Error {
        Error::type_error(format!("{self} expects {} arguments, got {given}", self.arity()))
    }

    pub fn invoke(&self, args: Vec<Sequence>, ctx: &DynamicContext) -> Result<Sequence> {
        if args.len() != self.arity() {
            return Err(self.arity_error(args.len()));
        }
        let mut args = args.into_iter();
        let full: Vec<Sequence> = self
            .bound
            .iter()
            .map(|slot| slot.clone().or_else(|| args.next()).unwrap_or_default())
            .collect();
        tracing::trace!(function = %self, "invoking function item");

        if let FunctionBody::Builtin(builtin, id) = &self.body {
            let location = SourceLocation::default();
            let iters = full
                .into_iter()
                .map(|seq| RuntimeIterator::local(SequenceSource::iterator(seq, location.clone())))
                .collect();
            let mut iter = builtins::build(*builtin, iters, None, ExecutionMode::Local, location)
                .map_err(|e| Error::type_error(format!("cannot invoke {id}: {e}")))?;
            return materialize(&mut iter, ctx);
        }

        let params = self.params().unwrap_or_default();
        check_arguments(self, params, &full)?;
        let frame = self
            .closure
            .as_ref()
            .unwrap_or(ctx)
            .bind_all(params.iter().zip(full).map(|(p, seq)| (p.name.clone(), VariableValue::Local(seq))));
        let body = match &self.body {
            FunctionBody::Declared(decl) => &decl.body,
            FunctionBody::Inline(f) => &f.body,
            FunctionBody::Builtin(..) => return Err(Error::internal("builtin handled above")),
        };
        let mut iter = self.builder.build(body)?;
        materialize(&mut iter, &frame)
    }
}

fn check_arguments(function: &dyn fmt::Display, params: &[Param], args: &[Sequence]) -> Result<()> {
    for (param, arg) in params.iter().zip(args) {
        if !param.ty.matches(arg.items()) {
            return Err(Error::type_error(format!(
                "argument ${} of {function} must be {}, found {arg}",
                param.name, param.ty
            )));
        }
    }
    Ok(())
}

impl fmt::Display for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(id) => write!(f, "function {}#{}", id.name, self.arity()),
            None => write!(f, "inline function#{}", self.arity()),
        }
    }
}

impl fmt::Debug for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionItem")
            .field("name", &self.name())
            .field("arity", &self.arity())
            .field("bound", &self.bound.iter().filter(|s| s.is_some()).count())
            .finish_non_exhaustive()
    }
}

/// Call of a declared function.
///
/// Arguments are evaluated in the caller's context. A parameter whose
/// analyzed mode is distributed receives a distributed argument as is;
/// everything else is materialized and checked against the declared type.
/// The body is compiled on first use so recursive functions build lazily.
pub struct FunctionCallSource {
    decl: Arc<FunctionDecl>,
    args: Vec<RuntimeIterator>,
    builder: RuntimeBuilder,
    body: Option<RuntimeIterator>,
}

impl FunctionCallSource {
    pub fn new(decl: Arc<FunctionDecl>, args: Vec<RuntimeIterator>, builder: RuntimeBuilder) -> Self {
        Self {
            decl,
            args,
            builder,
            body: None,
        }
    }

    fn frame(&mut self, ctx: &DynamicContext) -> Result<DynamicContext> {
        let mut bindings = Vec::with_capacity(self.args.len());
        for (index, (param, arg)) in self.decl.params.iter().zip(&mut self.args).enumerate() {
            let param_mode = self.decl.param_modes.get(index).copied().unwrap_or_default();
            let value = if param_mode.is_distributed() && arg.is_distributed() {
                VariableValue::Distributed(arg.as_distributed(ctx)?)
            } else {
                let value = materialize(arg, ctx)?;
                if !param.ty.matches(value.items()) {
                    return Err(Error::type_error(format!(
                        "argument ${} of {} must be {}, found {value}",
                        param.name, self.decl.id, param.ty
                    )));
                }
                VariableValue::Local(value)
            };
            bindings.push((param.name.clone(), value));
        }
        Ok(ctx.bind_all(bindings))
    }

    fn body(&mut self) -> Result<&mut RuntimeIterator> {
        if self.body.is_none() {
            tracing::trace!(function = %self.decl.id, "compiling function body");
            self.body = Some(self.builder.build(&self.decl.body)?);
        }
        self.body
            .as_mut()
            .ok_or_else(|| Error::internal("function body missing after compilation"))
    }
}

impl Source for FunctionCallSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        let frame = self.frame(ctx)?;
        let body = self.body()?;
        if body.is_open() {
            body.close();
        }
        body.open(&frame)
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        match &mut self.body {
            Some(body) if body.has_next() => body.next().map(Some),
            _ => Ok(None),
        }
    }

    fn release(&mut self) {
        if let Some(body) = &mut self.body {
            body.close();
        }
        for arg in &mut self.args {
            arg.close();
        }
    }
}

impl HybridSource for FunctionCallSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let frame = self.frame(ctx)?;
        into_distributed(self.body()?, &frame)
    }
}

/// `function ($x, ...) { ... }`: captures the current context.
pub struct InlineFunctionSource {
    function: Arc<InlineFunction>,
    builder: RuntimeBuilder,
}

impl InlineFunctionSource {
    pub fn new(function: Arc<InlineFunction>, builder: RuntimeBuilder) -> Self {
        Self { function, builder }
    }
}

impl Compute for InlineFunctionSource {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let item = FunctionItem::new(
            FunctionBody::Inline(self.function.clone()),
            Some(ctx.clone()),
            self.builder.clone(),
        );
        Ok(Sequence::single(Item::Function(Arc::new(item))))
    }
}

/// `f(1, ?)` on a named function: produces a function item.
pub struct PartialApplication {
    body: FunctionBody,
    args: Vec<Option<RuntimeIterator>>,
    builder: RuntimeBuilder,
}

impl PartialApplication {
    pub fn new(body: FunctionBody, args: Vec<Option<RuntimeIterator>>, builder: RuntimeBuilder) -> Self {
        Self { body, args, builder }
    }
}

fn evaluate_arguments(args: &mut [Option<RuntimeIterator>], ctx: &DynamicContext) -> Result<Vec<Option<Sequence>>> {
    args.iter_mut()
        .map(|arg| arg.as_mut().map(|iter| materialize(iter, ctx)).transpose())
        .collect()
}

impl Compute for PartialApplication {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let args = evaluate_arguments(&mut self.args, ctx)?;
        let item = FunctionItem::new(self.body.clone(), None, self.builder.clone()).partially_apply(args)?;
        Ok(Sequence::single(Item::Function(Arc::new(item))))
    }
}

/// `$f(args)`: the callee must evaluate to exactly one function item.
pub struct DynamicCall {
    callee: RuntimeIterator,
    args: Vec<Option<RuntimeIterator>>,
}

impl DynamicCall {
    pub fn new(callee: RuntimeIterator, args: Vec<Option<RuntimeIterator>>) -> Self {
        Self { callee, args }
    }
}

impl Compute for DynamicCall {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let callee = materialize(&mut self.callee, ctx)?;
        let function = match callee.items() {
            [Item::Function(f)] => f.clone(),
            _ => {
                return Err(Error::type_error(format!(
                    "dynamic call target must be a single function item, found {callee}"
                )));
            }
        };
        let args = evaluate_arguments(&mut self.args, ctx)?;
        if args.iter().any(Option::is_none) {
            let applied = function.partially_apply(args)?;
            return Ok(Sequence::single(Item::Function(Arc::new(applied))));
        }
        function.invoke(args.into_iter().flatten().collect(), ctx)
    }
}
