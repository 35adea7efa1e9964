#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexKey {
    Int(i64),
    Str(String),
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered sequence of keys with lazily cached lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    keys: Vec<IndexKey>,
    #[serde(skip)]
    duplicate_cache: OnceCell<bool>,
    /// First position of every key; kept current by [`Index::push_unique`].
    #[serde(skip)]
    position_cache: OnceCell<HashMap<IndexKey, usize>>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl Eq for Index {}

fn first_positions(keys: &[IndexKey]) -> HashMap<IndexKey, usize> {
    let mut positions = HashMap::with_capacity(keys.len());
    for (idx, key) in keys.iter().enumerate() {
        positions.entry(key.clone()).or_insert(idx);
    }
    positions
}

impl Index {
    #[must_use]
    pub fn new(keys: Vec<IndexKey>) -> Self {
        Self {
            keys,
            duplicate_cache: OnceCell::new(),
            position_cache: OnceCell::new(),
        }
    }

    /// Integer keys `0..len`.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new(
            (0..len)
                .map(|i| IndexKey::Int(i64::try_from(i).unwrap_or(i64::MAX)))
                .collect(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[IndexKey] {
        &self.keys
    }

    #[must_use]
    pub fn into_keys(self) -> Vec<IndexKey> {
        self.keys
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        *self
            .duplicate_cache
            .get_or_init(|| first_positions(&self.keys).len() != self.keys.len())
    }

    /// Position of the first occurrence of `key`.
    #[must_use]
    pub fn position(&self, key: &IndexKey) -> Option<usize> {
        self.position_cache
            .get_or_init(|| first_positions(&self.keys))
            .get(key)
            .copied()
    }

    #[must_use]
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.position(key).is_some()
    }

    /// Append `key` unless it is already present.
    ///
    /// Returns the key's position and whether it was inserted.
    pub fn push_unique(&mut self, key: IndexKey) -> (usize, bool) {
        if let Some(position) = self.position(&key) {
            return (position, false);
        }

        let position = self.keys.len();
        if let Some(positions) = self.position_cache.get_mut() {
            positions.insert(key.clone(), position);
        }
        self.keys.push(key);
        (position, true)
    }
}
