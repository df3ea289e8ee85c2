//! Compiled expression tree handed over by the front end.
//!
//! Every [`Expr`] and [`Clause`] carries a mutable `mode` slot that the
//! execution-mode analyzer fills in; runtime construction reads it back.

use core::fmt;
use std::sync::Arc;

use crate::error::{Error, Result, SourceLocation};
use crate::item::Item;
use crate::mode::ExecutionMode;
use crate::types::{AtomicType, SequenceType};

pub mod build;

/// Variable name without the leading `$`.
pub type VarName = Arc<str>;

/// Name of the variable holding the context item inside predicates.
pub const CONTEXT_ITEM: &str = "$";

/// Function identity: name plus arity, so overloads by arity are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionIdentifier {
    pub name: Arc<str>,
    pub arity: usize,
}

impl FunctionIdentifier {
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name: Arc::from(name),
            arity,
        }
    }
}

impl fmt::Display for FunctionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.arity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn holds(self, ord: core::cmp::Ordering) -> bool {
        use core::cmp::Ordering::{Equal, Greater, Less};
        match self {
            ComparisonOp::Eq => ord == Equal,
            ComparisonOp::Ne => ord != Equal,
            ComparisonOp::Lt => ord == Less,
            ComparisonOp::Le => ord != Greater,
            ComparisonOp::Gt => ord == Greater,
            ComparisonOp::Ge => ord != Less,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: SourceLocation,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Item),
    VarRef(VarName),
    /// `$$` inside a predicate.
    ContextItem,
    /// Comma expression.
    Sequence(Vec<Expr>),
    Range {
        from: Box<Expr>,
        to: Box<Expr>,
    },
    ArrayConstructor(Option<Box<Expr>>),
    ObjectConstructor(Vec<(Expr, Expr)>),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// `||`
    StringConcat(Box<Expr>, Box<Expr>),
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Cast {
        operand: Box<Expr>,
        target: AtomicType,
        allow_empty: bool,
    },
    Castable {
        operand: Box<Expr>,
        target: AtomicType,
        allow_empty: bool,
    },
    InstanceOf {
        operand: Box<Expr>,
        ty: SequenceType,
    },
    TypeSwitch(Box<TypeSwitch>),
    Postfix {
        base: Box<Expr>,
        ops: Vec<PostfixOp>,
    },
    /// Static call; a `None` argument is a `?` placeholder (partial application).
    FunctionCall {
        function: FunctionIdentifier,
        args: Vec<Option<Expr>>,
    },
    InlineFunction(Arc<InlineFunction>),
    DynamicCall {
        callee: Box<Expr>,
        args: Vec<Option<Expr>>,
    },
    Flwor(Box<Flwor>),
}

#[derive(Debug, Clone)]
pub enum PostfixOp {
    Predicate(Expr),
    ObjectLookup(Expr),
    ArrayLookup(Expr),
    /// `[]`
    Unbox,
}

#[derive(Debug, Clone)]
pub struct TypeSwitch {
    pub operand: Expr,
    pub cases: Vec<TypeSwitchCase>,
    pub default: TypeSwitchDefault,
}

#[derive(Debug, Clone)]
pub struct TypeSwitchCase {
    pub variable: Option<VarName>,
    pub types: Vec<SequenceType>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct TypeSwitchDefault {
    pub variable: Option<VarName>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: VarName,
    pub ty: SequenceType,
}

impl Param {
    pub fn new(name: &str, ty: SequenceType) -> Self {
        Self {
            name: Arc::from(name),
            ty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlineFunction {
    pub params: Vec<Param>,
    pub return_type: SequenceType,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct Flwor {
    pub clauses: Vec<Clause>,
    pub return_expr: Expr,
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub kind: ClauseKind,
    pub location: SourceLocation,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone)]
pub enum ClauseKind {
    For {
        variable: VarName,
        position: Option<VarName>,
        allowing_empty: bool,
        expr: Expr,
    },
    Let {
        variable: VarName,
        expr: Expr,
    },
    Where(Expr),
    GroupBy(Vec<GroupKey>),
    OrderBy(Vec<OrderKey>),
    Count(VarName),
}

impl ClauseKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClauseKind::For { .. } => "for",
            ClauseKind::Let { .. } => "let",
            ClauseKind::Where(_) => "where",
            ClauseKind::GroupBy(_) => "group by",
            ClauseKind::OrderBy(_) => "order by",
            ClauseKind::Count(_) => "count",
        }
    }

    /// Variables this clause introduces into the tuple stream.
    pub fn bound_variables(&self) -> Vec<VarName> {
        match self {
            ClauseKind::For { variable, position, .. } => {
                let mut vars = vec![variable.clone()];
                vars.extend(position.iter().cloned());
                vars
            }
            ClauseKind::Let { variable, .. } | ClauseKind::Count(variable) => vec![variable.clone()],
            ClauseKind::GroupBy(keys) => keys.iter().map(|k| k.variable.clone()).collect(),
            ClauseKind::Where(_) | ClauseKind::OrderBy(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupKey {
    pub variable: VarName,
    /// `None` groups by an already bound variable of the same name.
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub id: FunctionIdentifier,
    pub params: Vec<Param>,
    pub return_type: SequenceType,
    pub body: Expr,
    pub location: SourceLocation,
    /// Parameter modes retained from analysis.
    pub param_modes: Vec<ExecutionMode>,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: VarName,
    /// `None` declares an external variable.
    pub value: Option<Expr>,
    pub location: SourceLocation,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub functions: Vec<FunctionDecl>,
    pub variables: Vec<VariableDecl>,
    pub main: Expr,
}

impl Module {
    pub fn new(main: Expr) -> Self {
        Self {
            functions: Vec::new(),
            variables: Vec::new(),
            main,
        }
    }

    pub fn with_function(mut self, decl: FunctionDecl) -> Self {
        self.functions.push(decl);
        self
    }

    pub fn with_variable(mut self, decl: VariableDecl) -> Self {
        self.variables.push(decl);
        self
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            location: SourceLocation::default(),
            mode: ExecutionMode::Unset,
        }
    }

    #[must_use]
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = SourceLocation::new(line, column);
        self
    }

    /// Build a postfix expression. The front end hands over `None` when it
    /// failed to attach a primary expression, which is a builder defect.
    pub fn postfix(base: Option<Expr>, ops: Vec<PostfixOp>, location: SourceLocation) -> Result<Expr> {
        let base = base.ok_or_else(|| {
            Error::internal("postfix expression constructed without a base expression").at(&location)
        })?;
        Ok(Expr {
            kind: ExprKind::Postfix {
                base: Box::new(base),
                ops,
            },
            location,
            mode: ExecutionMode::Unset,
        })
    }

    pub fn is_partial_application(&self) -> bool {
        match &self.kind {
            ExprKind::FunctionCall { args, .. } | ExprKind::DynamicCall { args, .. } => {
                args.iter().any(Option::is_none)
            }
            _ => false,
        }
    }
}
