//! Per-stream key timeline.
//!
//! A timeline is a chronologically ordered list of key contexts, each in
//! effect from its starting index until the next one begins. Contexts behind
//! the highest processed index are kept for `history` indices so late packets
//! still find their key; contexts ahead of it are pending key changes.
//!
//! Ordering is by distance from the start of the history window, so the list
//! stays sorted across index wrap.

use super::crypto::SessionKeys;
use super::distance;
use super::error::{Result, SrtpError};
use super::key::Mki;
use super::pool::{Pool, PoolId};

/// What a context pool slot records about the context that owns it.
#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub mki: Option<Mki>,
}

/// One key assignment on a stream's timeline.
#[derive(Debug)]
pub struct KeyContext {
    pub from: u64,
    pub mki: Option<Mki>,
    pub trigger: bool,
    pub(crate) fired: bool,
    /// Key in effect just before a trigger context became active.
    pub(crate) takes_over: Option<Mki>,
    pub(crate) encrypt_count: u64,
    pub(crate) derived: Option<(u64, SessionKeys)>,
    slot: PoolId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new context was inserted.
    Added,
    /// An existing context at the same index took the new key.
    Replaced,
    /// The requested key was already in effect there.
    Unchanged,
}

#[derive(Debug)]
pub struct Timeline {
    wrap: u64,
    history: u64,
    max: u64,
    contexts: Vec<KeyContext>,
}

impl Timeline {
    /// Empty timeline whose first expected index is `first`.
    pub fn new(wrap: u64, history: u64, first: u64) -> Self {
        Self {
            wrap,
            history,
            max: first.wrapping_sub(1) & wrap,
            contexts: Vec::new(),
        }
    }

    pub fn wrap(&self) -> u64 {
        self.wrap
    }

    /// Highest index processed so far.
    pub fn max_index(&self) -> u64 {
        self.max
    }

    /// Index the next in-order packet will carry.
    pub fn next_index(&self) -> u64 {
        self.max.wrapping_add(1) & self.wrap
    }

    fn start(&self) -> u64 {
        self.max.wrapping_sub(self.history) & self.wrap
    }

    fn position(&self, index: u64) -> u64 {
        distance(self.start(), index, self.wrap)
    }

    /// Strictly behind the highest index but still inside the history window.
    pub fn is_historical(&self, index: u64) -> bool {
        let behind = distance(index, self.max, self.wrap);
        behind >= 1 && behind <= self.history
    }

    fn slot_for(&self, index: u64) -> usize {
        let p = self.position(index);
        self.contexts
            .partition_point(|c| self.position(c.from) <= p)
    }

    /// Context in effect at `index`.
    pub fn find(&self, index: u64) -> Option<&KeyContext> {
        match self.slot_for(index) {
            0 => None,
            n => self.contexts.get(n - 1),
        }
    }

    pub fn find_mut(&mut self, index: u64) -> Option<&mut KeyContext> {
        match self.slot_for(index) {
            0 => None,
            n => self.contexts.get_mut(n - 1),
        }
    }

    /// Key in effect at `index`.
    pub fn mki_at(&self, index: u64) -> Option<&Mki> {
        self.find(index).and_then(|c| c.mki.as_ref())
    }

    /// Contexts that start after the highest processed index.
    pub fn pending(&self) -> usize {
        let p = self.position(self.max);
        self.contexts
            .iter()
            .filter(|c| self.position(c.from) > p)
            .count()
    }

    /// Schedule `mki` to take effect from `from` onwards.
    pub fn add(
        &mut self,
        from: u64,
        mki: Option<Mki>,
        trigger: bool,
        pool: &mut Pool<ContextRecord>,
    ) -> Result<AddOutcome> {
        let from = from & self.wrap;
        if self.is_historical(from) {
            return Err(SrtpError::bad_param(format!(
                "index {} is behind the current index {}",
                from, self.max
            )));
        }

        let n = self.slot_for(from);
        if n > 0 && self.contexts[n - 1].from == from {
            let at = n - 1;
            let ctx = &mut self.contexts[at];
            if ctx.mki == mki && ctx.trigger == trigger {
                return Ok(AddOutcome::Unchanged);
            }
            ctx.mki = mki.clone();
            ctx.trigger = trigger;
            ctx.fired = false;
            ctx.takes_over = None;
            ctx.encrypt_count = 0;
            ctx.derived = None;
            if let Some(record) = pool.get_mut(ctx.slot) {
                record.mki = mki;
            }
            self.merge_around(at, pool);
            return Ok(AddOutcome::Replaced);
        }

        let previous = n.checked_sub(1).map(|i| &self.contexts[i].mki);
        match previous {
            Some(prev) if *prev == mki => return Ok(AddOutcome::Unchanged),
            None if mki.is_none() => return Ok(AddOutcome::Unchanged),
            _ => {}
        }

        let slot = pool.insert(ContextRecord { mki: mki.clone() })?;
        self.contexts.insert(
            n,
            KeyContext {
                from,
                mki,
                trigger,
                fired: false,
                takes_over: None,
                encrypt_count: 0,
                derived: None,
                slot,
            },
        );
        if self
            .contexts
            .get(n + 1)
            .is_some_and(|next| next.mki == self.contexts[n].mki)
        {
            let next = self.contexts.remove(n + 1);
            pool.remove(next.slot);
        }
        Ok(AddOutcome::Added)
    }

    /// Drop neighbours made redundant by a key change at `at`.
    fn merge_around(&mut self, at: usize, pool: &mut Pool<ContextRecord>) {
        if self
            .contexts
            .get(at + 1)
            .is_some_and(|next| next.mki == self.contexts[at].mki)
        {
            let next = self.contexts.remove(at + 1);
            pool.remove(next.slot);
        }
        let redundant = match at.checked_sub(1) {
            Some(prev) => self.contexts[prev].mki == self.contexts[at].mki,
            None => self.contexts[at].mki.is_none(),
        };
        if redundant {
            let ctx = self.contexts.remove(at);
            pool.remove(ctx.slot);
        }
    }

    /// Record `index` as processed. Returns `true` if it moved the highest
    /// index forward, after discarding contexts that fell out of history.
    ///
    /// An unfired trigger context that becomes active remembers the key
    /// before it in `takes_over`; that key may be pruned here.
    pub fn advance(&mut self, index: u64, pool: &mut Pool<ContextRecord>) -> bool {
        let index = index & self.wrap;
        let behind = distance(index, self.max, self.wrap);
        if behind <= self.history {
            return false;
        }

        let delta = distance(self.max, index, self.wrap);
        let old_start = self.start();
        let expired = self
            .contexts
            .partition_point(|c| distance(old_start, c.from, self.wrap) < delta);

        let reach = distance(old_start, index, self.wrap);
        let active = self
            .contexts
            .partition_point(|c| distance(old_start, c.from, self.wrap) <= reach);
        if let Some(at) = active.checked_sub(1) {
            let before = at.checked_sub(1).and_then(|i| self.contexts[i].mki.clone());
            let ctx = &mut self.contexts[at];
            if ctx.trigger && !ctx.fired {
                ctx.takes_over = before;
            }
        }
        self.max = index;

        if expired > 0 {
            let new_start = self.start();
            let superseded = self
                .contexts
                .get(expired)
                .is_some_and(|c| c.from == new_start);
            let keep = if superseded { expired } else { expired - 1 };
            for ctx in self.contexts.drain(..keep) {
                pool.remove(ctx.slot);
            }
            if !superseded {
                self.contexts[0].from = new_start;
            }
        }
        true
    }

    /// Forget every context and restart at `first`.
    pub fn reset(&mut self, first: u64, pool: &mut Pool<ContextRecord>) {
        self.clear(pool);
        self.max = first.wrapping_sub(1) & self.wrap;
    }

    pub fn clear(&mut self, pool: &mut Pool<ContextRecord>) {
        for ctx in self.contexts.drain(..) {
            pool.remove(ctx.slot);
        }
    }

    pub fn contexts(&self) -> impl Iterator<Item = &KeyContext> {
        self.contexts.iter()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srtp::pool::PoolPolicy;
    use crate::srtp::{RTCP_INDEX_MASK, RTP_INDEX_MASK};

    fn pool() -> Pool<ContextRecord> {
        Pool::new("context pool", PoolPolicy::with_page_items(40)).unwrap()
    }

    fn mki(b: u8) -> Option<Mki> {
        Some(Mki::new(vec![b; 4]))
    }

    #[test]
    fn test_empty_timeline_has_no_key() {
        let t = Timeline::new(RTP_INDEX_MASK, 1024, 100);
        assert!(t.find(100).is_none());
        assert_eq!(t.next_index(), 100);
    }

    #[test]
    fn test_add_and_find() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 100);
        assert_eq!(t.add(100, mki(1), false, &mut p).unwrap(), AddOutcome::Added);
        assert_eq!(t.add(150, mki(2), false, &mut p).unwrap(), AddOutcome::Added);
        assert_eq!(t.mki_at(100), mki(1).as_ref());
        assert_eq!(t.mki_at(149), mki(1).as_ref());
        assert_eq!(t.mki_at(150), mki(2).as_ref());
        assert_eq!(t.mki_at(10_000), mki(2).as_ref());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_same_index_replaces() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.add(50, mki(2), false, &mut p).unwrap();
        assert_eq!(t.add(50, mki(3), true, &mut p).unwrap(), AddOutcome::Replaced);
        assert_eq!(t.len(), 2);
        assert_eq!(t.mki_at(50), mki(3).as_ref());
        assert!(t.find(50).unwrap().trigger);
    }

    #[test]
    fn test_same_key_not_added() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        assert_eq!(t.add(20, mki(1), false, &mut p).unwrap(), AddOutcome::Unchanged);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_following_same_key_merged() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.add(40, mki(2), false, &mut p).unwrap();
        t.add(20, mki(2), false, &mut p).unwrap();
        let starts: Vec<u64> = t.contexts().map(|c| c.from).collect();
        assert_eq!(starts, vec![0, 20]);
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_no_key_at_start_is_noop() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        assert_eq!(t.add(0, None, false, &mut p).unwrap(), AddOutcome::Unchanged);
        assert!(t.is_empty());
    }

    #[test]
    fn test_past_index_rejected() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.advance(500, &mut p);
        assert!(matches!(
            t.add(499, mki(2), false, &mut p),
            Err(SrtpError::BadParam(_))
        ));
        // the current index itself is not in the past
        assert!(t.add(500, mki(2), false, &mut p).is_ok());
    }

    #[test]
    fn test_index_older_than_history_looks_like_future() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.advance(5000, &mut p);
        assert_eq!(t.add(100, mki(2), false, &mut p).unwrap(), AddOutcome::Added);
        assert_eq!(t.mki_at(5001), mki(1).as_ref());
    }

    #[test]
    fn test_advance_prunes_old_contexts() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 100, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.add(10, mki(2), false, &mut p).unwrap();
        t.add(20, mki(3), false, &mut p).unwrap();
        assert!(t.advance(500, &mut p));
        assert_eq!(t.len(), 1);
        assert_eq!(t.mki_at(450), mki(3).as_ref());
        assert_eq!(t.mki_at(500), mki(3).as_ref());
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_advance_keeps_history() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 100, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.add(60, mki(2), false, &mut p).unwrap();
        t.advance(120, &mut p);
        assert_eq!(t.mki_at(59), mki(1).as_ref());
        assert_eq!(t.mki_at(60), mki(2).as_ref());
    }

    #[test]
    fn test_advance_ignores_old_index() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 100, 0);
        t.advance(50, &mut p);
        assert!(!t.advance(40, &mut p));
        assert!(!t.advance(50, &mut p));
        assert_eq!(t.max_index(), 50);
    }

    #[test]
    fn test_pending_and_takes_over() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 1024, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.add(100, mki(2), true, &mut p).unwrap();
        t.advance(0, &mut p);
        assert_eq!(t.pending(), 1);
        assert_eq!(t.find(100).unwrap().takes_over, None);
        t.advance(100, &mut p);
        assert_eq!(t.pending(), 0);
        assert_eq!(t.find(100).unwrap().takes_over, mki(1));
    }

    #[test]
    fn test_jump_past_history_keeps_takes_over() {
        let mut p = pool();
        let mut t = Timeline::new(RTP_INDEX_MASK, 64, 0);
        t.add(0, mki(1), false, &mut p).unwrap();
        t.add(100, mki(2), true, &mut p).unwrap();
        t.advance(0, &mut p);
        assert!(t.advance(500, &mut p));
        assert_eq!(t.len(), 1);
        assert_eq!(t.mki_at(500), mki(2).as_ref());
        let ctx = t.find(500).unwrap();
        assert_eq!(ctx.from, 500 - 64);
        assert_eq!(ctx.takes_over, mki(1));
    }

    #[test]
    fn test_timeline_across_wrap() {
        let mut p = pool();
        let mut t = Timeline::new(RTCP_INDEX_MASK, 64, RTCP_INDEX_MASK - 2);
        t.add(RTCP_INDEX_MASK - 2, mki(1), false, &mut p).unwrap();
        t.add(3, mki(2), false, &mut p).unwrap();
        assert_eq!(t.mki_at(RTCP_INDEX_MASK), mki(1).as_ref());
        assert_eq!(t.mki_at(2), mki(1).as_ref());
        assert_eq!(t.mki_at(3), mki(2).as_ref());
        t.advance(10, &mut p);
        assert_eq!(t.mki_at(RTCP_INDEX_MASK), mki(1).as_ref());
        assert_eq!(t.mki_at(11), mki(2).as_ref());
    }
}
