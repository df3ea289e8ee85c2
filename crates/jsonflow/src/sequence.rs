use core::fmt;
use std::sync::Arc;

use crate::item::Item;

/// A materialized, immutable sequence of items. Cloning is cheap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence(Arc<[Item]>);

impl Sequence {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(item: impl Into<Item>) -> Self {
        Self(Arc::from(vec![item.into()]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.0
    }

    pub fn first(&self) -> Option<&Item> {
        self.0.first()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Item> {
        self.0.iter()
    }

    /// Replayable cursor over this sequence.
    pub fn cursor(&self) -> SequenceCursor {
        SequenceCursor {
            items: self.clone(),
            pos: 0,
        }
    }

    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Sequence>) -> Sequence {
        let items: Vec<Item> = parts.into_iter().flat_map(|s| s.iter().cloned()).collect();
        Sequence::from(items)
    }
}

impl From<Vec<Item>> for Sequence {
    fn from(items: Vec<Item>) -> Self {
        Self(Arc::from(items))
    }
}

impl FromIterator<Item> for Sequence {
    fn from_iter<T: IntoIterator<Item = Item>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Item;
    type IntoIter = core::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        f.write_str("(")?;
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        f.write_str(")")
    }
}

/// Position over a shared sequence; `reset` rewinds to the first item.
#[derive(Debug, Clone)]
pub struct SequenceCursor {
    items: Sequence,
    pos: usize,
}

impl SequenceCursor {
    pub fn reset(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for SequenceCursor {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        let item = self.items.items().get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.items.len() - self.pos;
        (rest, Some(rest))
    }
}
