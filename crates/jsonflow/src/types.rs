use crate::item::{AtomicValue, Item};
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    String,
    Integer,
    Decimal,
    Double,
    Boolean,
    Null,
    DateTime,
    Date,
    Time,
    Duration,
    YearMonthDuration,
    DayTimeDuration,
}

impl AtomicType {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicType::AnyAtomic => "atomic",
            AtomicType::String => "string",
            AtomicType::Integer => "integer",
            AtomicType::Decimal => "decimal",
            AtomicType::Double => "double",
            AtomicType::Boolean => "boolean",
            AtomicType::Null => "null",
            AtomicType::DateTime => "dateTime",
            AtomicType::Date => "date",
            AtomicType::Time => "time",
            AtomicType::Duration => "duration",
            AtomicType::YearMonthDuration => "yearMonthDuration",
            AtomicType::DayTimeDuration => "dayTimeDuration",
        }
    }

    pub fn from_name(name: &str) -> Option<AtomicType> {
        Some(match name {
            "atomic" => AtomicType::AnyAtomic,
            "string" => AtomicType::String,
            "integer" => AtomicType::Integer,
            "decimal" => AtomicType::Decimal,
            "double" => AtomicType::Double,
            "boolean" => AtomicType::Boolean,
            "null" => AtomicType::Null,
            "dateTime" => AtomicType::DateTime,
            "date" => AtomicType::Date,
            "time" => AtomicType::Time,
            "duration" => AtomicType::Duration,
            "yearMonthDuration" => AtomicType::YearMonthDuration,
            "dayTimeDuration" => AtomicType::DayTimeDuration,
            _ => return None,
        })
    }

    /// Type test used by `instance of` and typeswitch. Integer is a subtype of
    /// decimal, and both duration subtypes are durations.
    pub fn matches(&self, value: &AtomicValue) -> bool {
        match (self, value) {
            (AtomicType::AnyAtomic, _) => true,
            (AtomicType::String, AtomicValue::String(_)) => true,
            (AtomicType::Integer, AtomicValue::Integer(_)) => true,
            (AtomicType::Decimal, AtomicValue::Integer(_) | AtomicValue::Decimal(_)) => true,
            (AtomicType::Double, AtomicValue::Double(_)) => true,
            (AtomicType::Boolean, AtomicValue::Boolean(_)) => true,
            (AtomicType::Null, AtomicValue::Null) => true,
            (AtomicType::DateTime, AtomicValue::DateTime(_)) => true,
            (AtomicType::Date, AtomicValue::Date { .. }) => true,
            (AtomicType::Time, AtomicValue::Time { .. }) => true,
            (
                AtomicType::Duration,
                AtomicValue::Duration(_) | AtomicValue::YearMonthDuration(_) | AtomicValue::DayTimeDuration(_),
            ) => true,
            (AtomicType::YearMonthDuration, AtomicValue::YearMonthDuration(_)) => true,
            (AtomicType::DayTimeDuration, AtomicValue::DayTimeDuration(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Item,
    Atomic(AtomicType),
    Array,
    Object,
    /// `json-item`: array or object.
    Json,
    Function,
}

impl ItemType {
    pub fn matches(&self, item: &Item) -> bool {
        match (self, item) {
            (ItemType::Item, _) => true,
            (ItemType::Atomic(t), Item::Atomic(a)) => t.matches(a),
            (ItemType::Array, Item::Array(_)) => true,
            (ItemType::Object, Item::Object(_)) => true,
            (ItemType::Json, Item::Array(_) | Item::Object(_)) => true,
            (ItemType::Function, Item::Function(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// `empty-sequence()`
    Zero,
    One,
    OneOrZero,
    OneOrMore,
    ZeroOrMore,
}

impl Arity {
    pub fn admits(&self, len: usize) -> bool {
        match self {
            Arity::Zero => len == 0,
            Arity::One => len == 1,
            Arity::OneOrZero => len <= 1,
            Arity::OneOrMore => len >= 1,
            Arity::ZeroOrMore => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceType {
    pub item: ItemType,
    pub arity: Arity,
}

impl SequenceType {
    pub const ITEM_STAR: SequenceType = SequenceType {
        item: ItemType::Item,
        arity: Arity::ZeroOrMore,
    };

    pub fn new(item: ItemType, arity: Arity) -> Self {
        Self { item, arity }
    }

    pub fn empty() -> Self {
        Self {
            item: ItemType::Item,
            arity: Arity::Zero,
        }
    }

    pub fn one(item: ItemType) -> Self {
        Self::new(item, Arity::One)
    }

    pub fn is_empty_sequence(&self) -> bool {
        self.arity == Arity::Zero
    }

    /// Values of this type can never be a distributed collection: at most one
    /// item (or none) is always held locally.
    pub fn is_local_only(&self) -> bool {
        matches!(self.arity, Arity::Zero | Arity::One | Arity::OneOrZero)
    }

    pub fn matches(&self, items: &[Item]) -> bool {
        self.arity.admits(items.len()) && items.iter().all(|it| self.item.matches(it))
    }
}

impl Default for SequenceType {
    fn default() -> Self {
        Self::ITEM_STAR
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty_sequence() {
            return f.write_str("()");
        }
        match self.item {
            ItemType::Item => f.write_str("item")?,
            ItemType::Atomic(t) => f.write_str(t.name())?,
            ItemType::Array => f.write_str("array")?,
            ItemType::Object => f.write_str("object")?,
            ItemType::Json => f.write_str("json-item")?,
            ItemType::Function => f.write_str("function")?,
        }
        f.write_str(match self.arity {
            Arity::Zero | Arity::One => "",
            Arity::OneOrZero => "?",
            Arity::OneOrMore => "+",
            Arity::ZeroOrMore => "*",
        })
    }
}
