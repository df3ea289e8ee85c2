//! Arithmetic, comparisons, logic, string concatenation, conditionals and
//! type expressions.

use core::cmp::Ordering;
use rust_decimal::Decimal;

use super::{
    Compute, HybridSource, PullIterator, RuntimeIterator, Source, into_distributed, materialize, zero_or_one_atomic,
};
use crate::context::DynamicContext;
use crate::distributed::DistributedItems;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::{ArithmeticOp, ComparisonOp, VarName};
use crate::item::casting::{cast_as, is_castable_as};
use crate::item::temporal::{add_duration, subtract_date_times};
use crate::item::{AtomicValue, DurationValue, Item, atomics_equal, compare_atomics, effective_boolean_value};
use crate::sequence::Sequence;
use crate::types::{AtomicType, SequenceType};

pub struct Arithmetic {
    op: ArithmeticOp,
    left: RuntimeIterator,
    right: RuntimeIterator,
}

impl Arithmetic {
    pub fn new(op: ArithmeticOp, left: RuntimeIterator, right: RuntimeIterator) -> Self {
        Self { op, left, right }
    }
}

impl Compute for Arithmetic {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let left = zero_or_one_atomic(&materialize(&mut self.left, ctx)?, "arithmetic operand")?;
        let right = zero_or_one_atomic(&materialize(&mut self.right, ctx)?, "arithmetic operand")?;
        match (left, right) {
            (Some(l), Some(r)) => Ok(Sequence::single(arithmetic(self.op, &l, &r)?)),
            _ => Ok(Sequence::empty()),
        }
    }
}

fn op_symbol(op: ArithmeticOp) -> &'static str {
    match op {
        ArithmeticOp::Add => "+",
        ArithmeticOp::Sub => "-",
        ArithmeticOp::Mul => "*",
        ArithmeticOp::Div => "div",
        ArithmeticOp::IDiv => "idiv",
        ArithmeticOp::Mod => "mod",
    }
}

fn unsupported(op: ArithmeticOp, l: &AtomicValue, r: &AtomicValue) -> Error {
    Error::type_error(format!(
        "operator {} is not defined for \"{}\" and \"{}\"",
        op_symbol(op),
        l.type_name(),
        r.type_name()
    ))
}

fn division_by_zero() -> Error {
    Error::new(ErrorCode::DivisionByZero, "division by zero")
}

pub fn arithmetic(op: ArithmeticOp, l: &AtomicValue, r: &AtomicValue) -> Result<AtomicValue> {
    use AtomicValue as A;
    match (l, r) {
        (A::Null, _) | (_, A::Null) => Ok(A::Null),
        (A::Integer(a), A::Integer(b)) => integer_arithmetic(op, *a, *b),
        (A::Double(_), _) | (_, A::Double(_)) if l.is_numeric() && r.is_numeric() => {
            let (a, b) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            double_arithmetic(op, a, b)
        }
        _ if l.is_numeric() && r.is_numeric() => match (l.as_decimal(), r.as_decimal()) {
            (Some(a), Some(b)) => decimal_arithmetic(op, a, b),
            _ => Err(unsupported(op, l, r)),
        },
        _ => temporal_arithmetic(op, l, r),
    }
}

fn integer_arithmetic(op: ArithmeticOp, a: i64, b: i64) -> Result<AtomicValue> {
    let checked = match op {
        ArithmeticOp::Add => a.checked_add(b),
        ArithmeticOp::Sub => a.checked_sub(b),
        ArithmeticOp::Mul => a.checked_mul(b),
        ArithmeticOp::Div => return decimal_arithmetic(op, Decimal::from(a), Decimal::from(b)),
        ArithmeticOp::IDiv => {
            if b == 0 {
                return Err(division_by_zero());
            }
            a.checked_div(b)
        }
        ArithmeticOp::Mod => {
            if b == 0 {
                return Err(division_by_zero());
            }
            a.checked_rem(b)
        }
    };
    match checked {
        Some(v) => Ok(AtomicValue::Integer(v)),
        None => decimal_arithmetic(op, Decimal::from(a), Decimal::from(b)),
    }
}

fn decimal_arithmetic(op: ArithmeticOp, a: Decimal, b: Decimal) -> Result<AtomicValue> {
    let overflow = || Error::type_error(format!("decimal overflow in {a} {} {b}", op_symbol(op)));
    let value = match op {
        ArithmeticOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        ArithmeticOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        ArithmeticOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        ArithmeticOp::Div => {
            if b.is_zero() {
                return Err(division_by_zero());
            }
            a.checked_div(b).ok_or_else(overflow)?
        }
        ArithmeticOp::IDiv => {
            if b.is_zero() {
                return Err(division_by_zero());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?.trunc();
            return rust_decimal::prelude::ToPrimitive::to_i64(&q)
                .map(AtomicValue::Integer)
                .ok_or_else(overflow);
        }
        ArithmeticOp::Mod => {
            if b.is_zero() {
                return Err(division_by_zero());
            }
            a.checked_rem(b).ok_or_else(overflow)?
        }
    };
    Ok(AtomicValue::Decimal(value.normalize()))
}

fn double_arithmetic(op: ArithmeticOp, a: f64, b: f64) -> Result<AtomicValue> {
    Ok(AtomicValue::Double(match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div => a / b,
        ArithmeticOp::IDiv => {
            if b == 0.0 {
                return Err(division_by_zero());
            }
            #[allow(clippy::cast_possible_truncation)]
            return Ok(AtomicValue::Integer((a / b).trunc() as i64));
        }
        ArithmeticOp::Mod => a % b,
    }))
}

fn duration_of(value: &AtomicValue) -> Option<DurationValue> {
    match value {
        AtomicValue::Duration(d) => Some(*d),
        AtomicValue::YearMonthDuration(m) => Some(DurationValue { months: *m, millis: 0 }),
        AtomicValue::DayTimeDuration(ms) => Some(DurationValue { months: 0, millis: *ms }),
        _ => None,
    }
}

fn temporal_arithmetic(op: ArithmeticOp, l: &AtomicValue, r: &AtomicValue) -> Result<AtomicValue> {
    use AtomicValue as A;
    match (op, l, r) {
        (ArithmeticOp::Add, A::DateTime(dt), d) | (ArithmeticOp::Add, d, A::DateTime(dt))
            if duration_of(d).is_some() =>
        {
            let d = duration_of(d).ok_or_else(|| unsupported(op, l, r))?;
            Ok(A::DateTime(add_duration(dt, d)?))
        }
        (ArithmeticOp::Sub, A::DateTime(dt), d) if duration_of(d).is_some() => {
            let d = duration_of(d).ok_or_else(|| unsupported(op, l, r))?;
            let negated = DurationValue {
                months: -d.months,
                millis: -d.millis,
            };
            Ok(A::DateTime(add_duration(dt, negated)?))
        }
        (ArithmeticOp::Sub, A::DateTime(a), A::DateTime(b)) => Ok(A::DayTimeDuration(subtract_date_times(a, b))),
        (ArithmeticOp::Add | ArithmeticOp::Sub, A::YearMonthDuration(a), A::YearMonthDuration(b)) => {
            let v = if op == ArithmeticOp::Add { a.checked_add(*b) } else { a.checked_sub(*b) };
            v.map(A::YearMonthDuration).ok_or_else(|| unsupported(op, l, r))
        }
        (ArithmeticOp::Add | ArithmeticOp::Sub, A::DayTimeDuration(a), A::DayTimeDuration(b)) => {
            let v = if op == ArithmeticOp::Add { a.checked_add(*b) } else { a.checked_sub(*b) };
            v.map(A::DayTimeDuration).ok_or_else(|| unsupported(op, l, r))
        }
        _ => Err(unsupported(op, l, r)),
    }
}

pub struct Comparison {
    op: ComparisonOp,
    left: RuntimeIterator,
    right: RuntimeIterator,
}

impl Comparison {
    pub fn new(op: ComparisonOp, left: RuntimeIterator, right: RuntimeIterator) -> Self {
        Self { op, left, right }
    }
}

impl Compute for Comparison {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let left = zero_or_one_atomic(&materialize(&mut self.left, ctx)?, "comparison operand")?;
        let right = zero_or_one_atomic(&materialize(&mut self.right, ctx)?, "comparison operand")?;
        let (Some(l), Some(r)) = (left, right) else {
            return Ok(Sequence::empty());
        };
        let holds = match self.op {
            ComparisonOp::Eq => atomics_equal(&l, &r)?,
            ComparisonOp::Ne => !atomics_equal(&l, &r)?,
            op => op.holds(compare_atomics(&l, &r)?),
        };
        Ok(Sequence::single(holds))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

pub struct Logical {
    connective: Connective,
    left: RuntimeIterator,
    right: RuntimeIterator,
}

impl Logical {
    pub fn new(connective: Connective, left: RuntimeIterator, right: RuntimeIterator) -> Self {
        Self {
            connective,
            left,
            right,
        }
    }
}

impl Compute for Logical {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let left = effective_boolean_value(materialize(&mut self.left, ctx)?.items())?;
        let result = match (self.connective, left) {
            (Connective::And, false) => false,
            (Connective::Or, true) => true,
            _ => effective_boolean_value(materialize(&mut self.right, ctx)?.items())?,
        };
        Ok(Sequence::single(result))
    }
}

pub struct Not {
    operand: RuntimeIterator,
}

impl Not {
    pub fn new(operand: RuntimeIterator) -> Self {
        Self { operand }
    }
}

impl Compute for Not {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let value = effective_boolean_value(materialize(&mut self.operand, ctx)?.items())?;
        Ok(Sequence::single(!value))
    }
}

/// `||`. An empty operand counts as the empty string; anything else must be
/// a single atomic value.
pub struct StringConcat {
    left: RuntimeIterator,
    right: RuntimeIterator,
}

impl StringConcat {
    pub fn new(left: RuntimeIterator, right: RuntimeIterator) -> Self {
        Self { left, right }
    }
}

pub fn concat_operand(sequence: &Sequence) -> Result<String> {
    match sequence.items() {
        [] => Ok(String::new()),
        [Item::Atomic(a)] => Ok(a.string_value()),
        [other] => Err(Error::type_error(format!(
            "string concatenation operands must be atomic, found {}",
            other.type_name()
        ))),
        items => Err(Error::type_error(format!(
            "string concatenation operands must be single atomic values, found a sequence of {} items",
            items.len()
        ))),
    }
}

impl Compute for StringConcat {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let mut out = concat_operand(&materialize(&mut self.left, ctx)?)?;
        out.push_str(&concat_operand(&materialize(&mut self.right, ctx)?)?);
        Ok(Sequence::single(out))
    }
}

/// if-then-else: only the selected branch is opened.
pub struct IfSource {
    condition: RuntimeIterator,
    then_branch: RuntimeIterator,
    else_branch: RuntimeIterator,
    selected: Option<bool>,
}

impl IfSource {
    pub fn new(condition: RuntimeIterator, then_branch: RuntimeIterator, else_branch: RuntimeIterator) -> Self {
        Self {
            condition,
            then_branch,
            else_branch,
            selected: None,
        }
    }

    fn choose(&mut self, ctx: &DynamicContext) -> Result<&mut RuntimeIterator> {
        let condition = effective_boolean_value(materialize(&mut self.condition, ctx)?.items())?;
        self.selected = Some(condition);
        Ok(if condition {
            &mut self.then_branch
        } else {
            &mut self.else_branch
        })
    }

    fn branch(&mut self) -> Option<&mut RuntimeIterator> {
        match self.selected {
            Some(true) => Some(&mut self.then_branch),
            Some(false) => Some(&mut self.else_branch),
            None => None,
        }
    }
}

impl Source for IfSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.choose(ctx)?.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        match self.branch() {
            Some(branch) if branch.has_next() => branch.next().map(Some),
            _ => Ok(None),
        }
    }

    fn release(&mut self) {
        if let Some(branch) = self.branch() {
            branch.close();
        }
        self.selected = None;
    }
}

impl HybridSource for IfSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let branch = self.choose(ctx)?;
        let result = into_distributed(branch, ctx);
        self.selected = None;
        result
    }
}

pub struct Cast {
    operand: RuntimeIterator,
    target: AtomicType,
    allow_empty: bool,
}

impl Cast {
    pub fn new(operand: RuntimeIterator, target: AtomicType, allow_empty: bool) -> Self {
        Self {
            operand,
            target,
            allow_empty,
        }
    }
}

impl Compute for Cast {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let operand = materialize(&mut self.operand, ctx)?;
        match zero_or_one_atomic(&operand, "cast operand")? {
            Some(value) => Ok(Sequence::single(cast_as(&value, self.target)?)),
            None if self.allow_empty => Ok(Sequence::empty()),
            None => Err(Error::type_error(format!(
                "empty sequence cannot be cast to {}",
                self.target
            ))),
        }
    }
}

pub struct Castable {
    operand: RuntimeIterator,
    target: AtomicType,
    allow_empty: bool,
}

impl Castable {
    pub fn new(operand: RuntimeIterator, target: AtomicType, allow_empty: bool) -> Self {
        Self {
            operand,
            target,
            allow_empty,
        }
    }
}

impl Compute for Castable {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let operand = materialize(&mut self.operand, ctx)?;
        let castable = match operand.items() {
            [] => self.allow_empty,
            [Item::Atomic(a)] => is_castable_as(a, self.target),
            _ => false,
        };
        Ok(Sequence::single(castable))
    }
}

pub struct InstanceOf {
    operand: RuntimeIterator,
    ty: SequenceType,
}

impl InstanceOf {
    pub fn new(operand: RuntimeIterator, ty: SequenceType) -> Self {
        Self { operand, ty }
    }
}

impl Compute for InstanceOf {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let operand = materialize(&mut self.operand, ctx)?;
        Ok(Sequence::single(self.ty.matches(operand.items())))
    }
}

pub struct TypeSwitchCase {
    pub variable: Option<VarName>,
    pub types: Vec<SequenceType>,
    pub body: RuntimeIterator,
}

/// Evaluates the operand once, then streams the body of the first matching
/// case with the case variable bound in a child context.
pub struct TypeSwitchSource {
    operand: RuntimeIterator,
    cases: Vec<TypeSwitchCase>,
    default_variable: Option<VarName>,
    default_body: RuntimeIterator,
    selected: Option<usize>,
}

impl TypeSwitchSource {
    pub fn new(
        operand: RuntimeIterator,
        cases: Vec<TypeSwitchCase>,
        default_variable: Option<VarName>,
        default_body: RuntimeIterator,
    ) -> Self {
        Self {
            operand,
            cases,
            default_variable,
            default_body,
            selected: None,
        }
    }

    /// Select the branch and return the context its body runs in.
    fn select(&mut self, ctx: &DynamicContext) -> Result<DynamicContext> {
        let value = materialize(&mut self.operand, ctx)?;
        let index = self
            .cases
            .iter()
            .position(|case| case.types.iter().any(|t| t.matches(value.items())))
            .unwrap_or(self.cases.len());
        self.selected = Some(index);
        let variable = match self.cases.get(index) {
            Some(case) => case.variable.clone(),
            None => self.default_variable.clone(),
        };
        Ok(match variable {
            Some(name) => ctx.bind(name, value),
            None => ctx.clone(),
        })
    }

    fn body(&mut self) -> Option<&mut RuntimeIterator> {
        let index = self.selected?;
        Some(match self.cases.get_mut(index) {
            Some(case) => &mut case.body,
            None => &mut self.default_body,
        })
    }
}

impl Source for TypeSwitchSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        let inner = self.select(ctx)?;
        match self.body() {
            Some(body) => body.open(&inner),
            None => Ok(()),
        }
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        match self.body() {
            Some(body) if body.has_next() => body.next().map(Some),
            _ => Ok(None),
        }
    }

    fn release(&mut self) {
        if let Some(body) = self.body() {
            body.close();
        }
        self.selected = None;
    }
}

impl HybridSource for TypeSwitchSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let inner = self.select(ctx)?;
        let result = match self.body() {
            Some(body) => into_distributed(body, &inner),
            None => Err(Error::internal("typeswitch selected no branch")),
        };
        self.selected = None;
        result
    }
}

/// Order used by `order by` keys: empty sorts before any value.
pub fn compare_keys(a: Option<&AtomicValue>, b: Option<&AtomicValue>) -> Result<Ordering> {
    match (a, b) {
        (None, None) => Ok(Ordering::Equal),
        (None, Some(_)) => Ok(Ordering::Less),
        (Some(_), None) => Ok(Ordering::Greater),
        (Some(x), Some(y)) => compare_atomics(x, y),
    }
}
