//! Pool and lookup-table sizing policies.
//!
//! Master keys, streams and key contexts each live in a [`Pool`] whose growth
//! is governed by a [`PoolPolicy`]. Lookups (MKI → key, source → stream,
//! destination → stream) go through a [`LookupTable`] governed by a
//! [`HashPolicy`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{Result, SrtpError};

/// Allocation behaviour of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PoolKind {
    /// Capacity set up front, never grows.
    Fixed,
    /// Grows a page at a time, never shrinks.
    Expanding,
    /// Grows a page at a time and gives pages back when mostly free.
    Dynamic,
}

impl PoolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::Fixed => "FIXED",
            PoolKind::Expanding => "EXPANDING",
            PoolKind::Dynamic => "DYNAMIC",
        }
    }
}

impl FromStr for PoolKind {
    type Err = SrtpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIXED" => Ok(PoolKind::Fixed),
            "EXPANDING" => Ok(PoolKind::Expanding),
            "DYNAMIC" => Ok(PoolKind::Dynamic),
            other => Err(SrtpError::bad_param(format!("unknown pool type '{}'", other))),
        }
    }
}

impl TryFrom<String> for PoolKind {
    type Error = SrtpError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PoolKind> for String {
    fn from(kind: PoolKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Growth behaviour of a lookup table. Same vocabulary as [`PoolKind`].
pub type HashKind = PoolKind;

/// Sizing for one object pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolPolicy {
    pub kind: PoolKind,
    /// Items per page. When 0, derived from `page_size`.
    pub page_items: usize,
    /// Page size in bytes, used only when `page_items` is 0.
    pub page_size: usize,
    /// Upper bound on items (0 = unbounded for growing pools).
    pub max_items: usize,
    /// Items kept allocated at all times.
    pub min_items: usize,
    /// Free items tolerated before a dynamic pool gives a page back.
    pub free_level: usize,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            kind: PoolKind::Expanding,
            page_items: 10,
            page_size: 0,
            max_items: 0,
            min_items: 0,
            free_level: 0,
        }
    }
}

impl PoolPolicy {
    pub fn with_page_items(page_items: usize) -> Self {
        Self {
            page_items,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_items == 0 && self.page_size == 0 {
            return Err(SrtpError::bad_param("pool needs page_items or page_size"));
        }
        if self.max_items > 0 && self.min_items > self.max_items {
            return Err(SrtpError::bad_param(format!(
                "pool min_items {} exceeds max_items {}",
                self.min_items, self.max_items
            )));
        }
        Ok(())
    }
}

/// Sizing for one lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashPolicy {
    pub kind: HashKind,
    pub start_size: usize,
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self {
            kind: PoolKind::Expanding,
            start_size: 17,
        }
    }
}

impl HashPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.kind == PoolKind::Fixed && self.start_size == 0 {
            return Err(SrtpError::bad_param("fixed hash needs a nonzero start_size"));
        }
        Ok(())
    }
}

/// Handle to an item held in a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(usize);

/// Slot allocator whose capacity follows a [`PoolPolicy`].
#[derive(Debug)]
pub struct Pool<T> {
    name: &'static str,
    policy: PoolPolicy,
    per_page: usize,
    pages: usize,
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    in_use: usize,
}

impl<T> Pool<T> {
    pub fn new(name: &'static str, policy: PoolPolicy) -> Result<Self> {
        policy.validate()?;
        let per_page = if policy.page_items > 0 {
            policy.page_items
        } else {
            (policy.page_size / std::mem::size_of::<T>().max(1)).max(1)
        };
        let pages = match policy.kind {
            PoolKind::Fixed => 0,
            _ => policy.min_items.div_ceil(per_page),
        };
        Ok(Self {
            name,
            policy,
            per_page,
            pages,
            slots: Vec::new(),
            free: Vec::new(),
            in_use: 0,
        })
    }

    /// Number of items the pool can hold without growing.
    pub fn capacity(&self) -> usize {
        match self.policy.kind {
            PoolKind::Fixed => {
                if self.policy.max_items > 0 {
                    self.policy.max_items
                } else if self.policy.min_items > 0 {
                    self.policy.min_items
                } else {
                    self.per_page
                }
            }
            _ => self.pages * self.per_page,
        }
    }

    pub fn len(&self) -> usize {
        self.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    pub fn insert(&mut self, value: T) -> Result<PoolId> {
        if self.policy.max_items > 0 && self.in_use >= self.policy.max_items {
            return Err(SrtpError::OutOfResources(self.name));
        }
        if self.in_use >= self.capacity() {
            self.grow()?;
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };
        self.in_use += 1;
        Ok(PoolId(slot))
    }

    fn grow(&mut self) -> Result<()> {
        match self.policy.kind {
            PoolKind::Fixed => Err(SrtpError::OutOfResources(self.name)),
            PoolKind::Expanding | PoolKind::Dynamic => {
                self.pages += 1;
                tracing::trace!(pool = self.name, pages = self.pages, "pool grew");
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, id: PoolId) -> Option<T> {
        let value = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.in_use -= 1;
        if self.policy.kind == PoolKind::Dynamic {
            self.shrink();
        }
        Some(value)
    }

    fn shrink(&mut self) {
        let floor = self.in_use.max(self.policy.min_items);
        while self.pages > 0
            && self.capacity() - self.in_use > self.policy.free_level
            && (self.pages - 1) * self.per_page >= floor
        {
            self.pages -= 1;
            tracing::trace!(pool = self.name, pages = self.pages, "pool shrank");
        }
        if self.in_use == 0 {
            self.slots.clear();
            self.free.clear();
        }
    }

    pub fn get(&self, id: PoolId) -> Option<&T> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: PoolId) -> Option<&mut T> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PoolId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (PoolId(i), v)))
    }

    /// Drop every item. Expanding pools keep their pages.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.in_use = 0;
        if self.policy.kind == PoolKind::Dynamic {
            self.pages = self.policy.min_items.div_ceil(self.per_page);
        }
    }
}

/// Hash map whose growth follows a [`HashPolicy`].
#[derive(Debug)]
pub struct LookupTable<K, V> {
    name: &'static str,
    policy: HashPolicy,
    map: HashMap<K, V>,
}

impl<K: Eq + Hash, V> LookupTable<K, V> {
    pub fn new(name: &'static str, policy: HashPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            name,
            map: HashMap::with_capacity(policy.start_size),
            policy,
        })
    }

    /// Insert or replace. A fixed table refuses new keys once full.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if self.policy.kind == PoolKind::Fixed
            && !self.map.contains_key(&key)
            && self.map.len() >= self.policy.start_size
        {
            return Err(SrtpError::OutOfResources(self.name));
        }
        Ok(self.map.insert(key, value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.map.remove(key);
        if self.policy.kind == PoolKind::Dynamic
            && self.map.capacity() > self.policy.start_size
            && self.map.len() * 4 < self.map.capacity()
        {
            self.map
                .shrink_to((self.map.len() * 2).max(self.policy.start_size));
        }
        value
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.map.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_items: usize) -> PoolPolicy {
        PoolPolicy {
            kind: PoolKind::Fixed,
            max_items,
            ..PoolPolicy::default()
        }
    }

    #[test]
    fn test_pool_kind_parse() {
        assert_eq!("fixed".parse::<PoolKind>().unwrap(), PoolKind::Fixed);
        assert_eq!(" EXPANDING ".parse::<PoolKind>().unwrap(), PoolKind::Expanding);
        assert_eq!("Dynamic".parse::<PoolKind>().unwrap(), PoolKind::Dynamic);
        assert!(matches!(
            "elastic".parse::<PoolKind>(),
            Err(SrtpError::BadParam(_))
        ));
    }

    #[test]
    fn test_fixed_pool_exhausts() {
        let mut pool = Pool::new("keys", fixed(2)).unwrap();
        pool.insert(1u32).unwrap();
        pool.insert(2u32).unwrap();
        assert_eq!(pool.insert(3u32), Err(SrtpError::OutOfResources("keys")));
    }

    #[test]
    fn test_fixed_pool_reuses_released_slot() {
        let mut pool = Pool::new("keys", fixed(1)).unwrap();
        let id = pool.insert("a").unwrap();
        assert_eq!(pool.remove(id), Some("a"));
        let id2 = pool.insert("b").unwrap();
        assert_eq!(pool.get(id2), Some(&"b"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_expanding_pool_grows_by_page() {
        let mut pool = Pool::new("streams", PoolPolicy::with_page_items(4)).unwrap();
        assert_eq!(pool.capacity(), 0);
        pool.insert(0u8).unwrap();
        assert_eq!(pool.capacity(), 4);
        for i in 1..5u8 {
            pool.insert(i).unwrap();
        }
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn test_expanding_pool_respects_max_items() {
        let policy = PoolPolicy {
            page_items: 2,
            max_items: 3,
            ..PoolPolicy::default()
        };
        let mut pool = Pool::new("contexts", policy).unwrap();
        for i in 0..3u8 {
            pool.insert(i).unwrap();
        }
        assert_eq!(pool.insert(9), Err(SrtpError::OutOfResources("contexts")));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_max_items_applies_inside_allocated_page() {
        let policy = PoolPolicy {
            page_items: 4,
            max_items: 2,
            ..PoolPolicy::default()
        };
        let mut pool = Pool::new("streams", policy).unwrap();
        let first = pool.insert(1u8).unwrap();
        pool.insert(2u8).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.insert(3u8), Err(SrtpError::OutOfResources("streams")));
        pool.remove(first);
        assert!(pool.insert(3u8).is_ok());
    }

    #[test]
    fn test_dynamic_pool_gives_pages_back() {
        let policy = PoolPolicy {
            kind: PoolKind::Dynamic,
            page_items: 2,
            free_level: 1,
            ..PoolPolicy::default()
        };
        let mut pool = Pool::new("contexts", policy).unwrap();
        let ids: Vec<_> = (0..6u8).map(|i| pool.insert(i).unwrap()).collect();
        assert_eq!(pool.capacity(), 6);
        for id in &ids[..4] {
            pool.remove(*id);
        }
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_pool_page_size_derives_items() {
        let policy = PoolPolicy {
            page_items: 0,
            page_size: 64,
            kind: PoolKind::Fixed,
            ..PoolPolicy::default()
        };
        let pool: Pool<u64> = Pool::new("keys", policy).unwrap();
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn test_pool_policy_rejects_inverted_bounds() {
        let policy = PoolPolicy {
            min_items: 10,
            max_items: 2,
            ..PoolPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(SrtpError::BadParam(_))));
    }

    #[test]
    fn test_fixed_lookup_table_limit() {
        let policy = HashPolicy {
            kind: PoolKind::Fixed,
            start_size: 1,
        };
        let mut table = LookupTable::new("keys", policy).unwrap();
        table.insert(1, "a").unwrap();
        // replacing an existing key is always allowed
        assert_eq!(table.insert(1, "b").unwrap(), Some("a"));
        assert_eq!(table.insert(2, "c"), Err(SrtpError::OutOfResources("keys")));
    }

    #[test]
    fn test_dynamic_lookup_table_shrinks() {
        let policy = HashPolicy {
            kind: PoolKind::Dynamic,
            start_size: 4,
        };
        let mut table = LookupTable::new("sources", policy).unwrap();
        for i in 0..256 {
            table.insert(i, i).unwrap();
        }
        let grown = table.map.capacity();
        for i in 0..255 {
            table.remove(&i);
        }
        assert!(table.map.capacity() < grown);
        assert_eq!(table.len(), 1);
    }
}
