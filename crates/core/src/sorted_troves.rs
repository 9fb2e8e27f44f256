//! Troves ordered by descending nominal collateral ratio (NICR).
//!
//! A doubly linked list stored in an arena keyed by owner address. The head is
//! the highest NICR, the tail the lowest (first to be redeemed against).
//! Callers pass neighbour hints to keep insertion cheap; hints are validated
//! and the list is re-scanned locally from the hint when they are stale, so a
//! bad hint only costs time.
//!
//! The index does not store ratios. Every operation takes a `nicr` lookup so
//! ordering is always checked against the live trove state.

use alloy::primitives::{Address, U256};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};

/// Neighbour hints for an insertion: `upper` should have a NICR at least as
/// high as the new entry, `lower` at most as high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    pub upper: Option<Address>,
    pub lower: Option<Address>,
}

impl Hints {
    pub fn new(upper: Option<Address>, lower: Option<Address>) -> Self {
        Self { upper, lower }
    }

    /// No hint; the whole list is scanned from the head.
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    prev: Option<Address>,
    next: Option<Address>,
}

/// Sorted trove index.
#[derive(Debug, Clone)]
pub struct SortedTroves {
    nodes: HashMap<Address, Node>,
    head: Option<Address>,
    tail: Option<Address>,
    max_size: usize,
}

impl SortedTroves {
    pub fn new(max_size: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            head: None,
            tail: None,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.max_size
    }

    pub fn contains(&self, id: &Address) -> bool {
        self.nodes.contains_key(id)
    }

    /// Highest NICR.
    pub fn first(&self) -> Option<Address> {
        self.head
    }

    /// Lowest NICR.
    pub fn last(&self) -> Option<Address> {
        self.tail
    }

    /// Neighbour with the next lower NICR.
    pub fn next(&self, id: &Address) -> Option<Address> {
        self.nodes.get(id).and_then(|n| n.next)
    }

    /// Neighbour with the next higher NICR.
    pub fn prev(&self, id: &Address) -> Option<Address> {
        self.nodes.get(id).and_then(|n| n.prev)
    }

    /// Walk from the lowest NICR upwards.
    pub fn iter_from_lowest(&self) -> impl Iterator<Item = Address> + '_ {
        std::iter::successors(self.tail, move |id| self.prev(id))
    }

    /// Walk from the highest NICR downwards.
    pub fn iter_from_highest(&self) -> impl Iterator<Item = Address> + '_ {
        std::iter::successors(self.head, move |id| self.next(id))
    }

    /// Insert `id` with ratio `ratio` near `hints`.
    pub fn insert<F>(&mut self, id: Address, ratio: U256, hints: Hints, nicr: F) -> Result<()>
    where
        F: Fn(&Address) -> U256,
    {
        if self.is_full() {
            return Err(ProtocolError::IndexFull { max_size: self.max_size });
        }
        if self.contains(&id) {
            return Err(ProtocolError::IndexContains(id));
        }
        if ratio.is_zero() {
            return Err(ProtocolError::ZeroNominalRatio);
        }

        let (prev, next) = if self.valid_insert_position(ratio, hints.upper, hints.lower, &nicr) {
            (hints.upper, hints.lower)
        } else {
            self.find_insert_position(ratio, hints.upper, hints.lower, &nicr)
        };

        self.link(id, prev, next);
        Ok(())
    }

    /// Unlink `id`.
    pub fn remove(&mut self, id: &Address) -> Result<()> {
        let node = self
            .nodes
            .remove(id)
            .ok_or(ProtocolError::IndexMissing(*id))?;

        match node.prev {
            Some(prev) => {
                if let Some(p) = self.nodes.get_mut(&prev) {
                    p.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.nodes.get_mut(&next) {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        Ok(())
    }

    /// Move `id` to the position matching its new ratio.
    pub fn reinsert<F>(&mut self, id: Address, ratio: U256, hints: Hints, nicr: F) -> Result<()>
    where
        F: Fn(&Address) -> U256,
    {
        if !self.contains(&id) {
            return Err(ProtocolError::IndexMissing(id));
        }
        if ratio.is_zero() {
            return Err(ProtocolError::ZeroNominalRatio);
        }
        self.remove(&id)?;
        self.insert(id, ratio, hints, nicr)
    }

    /// Whether inserting `ratio` between `prev` and `next` keeps the order.
    pub fn valid_insert_position<F>(
        &self,
        ratio: U256,
        prev: Option<Address>,
        next: Option<Address>,
        nicr: &F,
    ) -> bool
    where
        F: Fn(&Address) -> U256,
    {
        match (prev, next) {
            (None, None) => self.is_empty(),
            (None, Some(next)) => self.head == Some(next) && ratio >= nicr(&next),
            (Some(prev), None) => self.tail == Some(prev) && ratio <= nicr(&prev),
            (Some(prev), Some(next)) => {
                self.next(&prev) == Some(next) && nicr(&prev) >= ratio && ratio >= nicr(&next)
            }
        }
    }

    /// Resolve the exact neighbours for `ratio`, starting from possibly
    /// stale hints.
    pub fn find_insert_position<F>(
        &self,
        ratio: U256,
        prev: Option<Address>,
        next: Option<Address>,
        nicr: &F,
    ) -> (Option<Address>, Option<Address>)
    where
        F: Fn(&Address) -> U256,
    {
        // Drop hints that left the list or sit on the wrong side of `ratio`
        let prev = prev.filter(|p| self.contains(p) && ratio <= nicr(p));
        let next = next.filter(|n| self.contains(n) && ratio >= nicr(n));

        match (prev, next) {
            (None, None) => match self.head {
                Some(head) => self.descend_list(ratio, head, nicr),
                None => (None, None),
            },
            (None, Some(next)) => self.ascend_list(ratio, next, nicr),
            (Some(prev), _) => self.descend_list(ratio, prev, nicr),
        }
    }

    fn descend_list<F>(&self, ratio: U256, start: Address, nicr: &F) -> (Option<Address>, Option<Address>)
    where
        F: Fn(&Address) -> U256,
    {
        if self.head == Some(start) && ratio >= nicr(&start) {
            return (None, Some(start));
        }

        let mut prev = Some(start);
        let mut next = self.next(&start);
        while let Some(p) = prev {
            if self.valid_insert_position(ratio, prev, next, nicr) {
                break;
            }
            prev = self.next(&p);
            next = prev.and_then(|p| self.next(&p));
        }
        (prev, next)
    }

    fn ascend_list<F>(&self, ratio: U256, start: Address, nicr: &F) -> (Option<Address>, Option<Address>)
    where
        F: Fn(&Address) -> U256,
    {
        if self.tail == Some(start) && ratio <= nicr(&start) {
            return (Some(start), None);
        }

        let mut next = Some(start);
        let mut prev = self.prev(&start);
        while let Some(n) = next {
            if self.valid_insert_position(ratio, prev, next, nicr) {
                break;
            }
            next = self.prev(&n);
            prev = next.and_then(|n| self.prev(&n));
        }
        (prev, next)
    }

    fn link(&mut self, id: Address, prev: Option<Address>, next: Option<Address>) {
        self.nodes.insert(id, Node { prev, next });
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes.get_mut(&n) {
                    node.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn lookup(ratios: &HashMap<Address, U256>) -> impl Fn(&Address) -> U256 + '_ {
        move |a| ratios.get(a).copied().unwrap_or_default()
    }

    fn build(values: &[(u8, u64)]) -> (SortedTroves, HashMap<Address, U256>) {
        let mut list = SortedTroves::new(usize::MAX);
        let mut ratios = HashMap::new();
        for &(id, ratio) in values {
            ratios.insert(addr(id), U256::from(ratio));
            list.insert(addr(id), U256::from(ratio), Hints::none(), lookup(&ratios))
                .unwrap();
        }
        (list, ratios)
    }

    #[test]
    fn test_insert_keeps_descending_order() {
        let (list, ratios) = build(&[(1, 150), (2, 300), (3, 200), (4, 100)]);
        let order: Vec<_> = list.iter_from_highest().collect();
        assert_eq!(order, vec![addr(2), addr(3), addr(1), addr(4)]);
        assert_eq!(list.first(), Some(addr(2)));
        assert_eq!(list.last(), Some(addr(4)));

        let lowest: Vec<_> = list.iter_from_lowest().map(|a| ratios[&a]).collect();
        assert_eq!(lowest, vec![U256::from(100), U256::from(150), U256::from(200), U256::from(300)]);
    }

    #[test]
    fn test_stale_hints_are_corrected() {
        let (mut list, mut ratios) = build(&[(1, 100), (2, 200), (3, 300)]);
        ratios.insert(addr(4), U256::from(250));
        // Hints point at the wrong gap
        let hints = Hints::new(Some(addr(1)), Some(addr(9)));
        list.insert(addr(4), U256::from(250), hints, lookup(&ratios)).unwrap();
        assert_eq!(list.prev(&addr(4)), Some(addr(3)));
        assert_eq!(list.next(&addr(4)), Some(addr(2)));
    }

    #[test]
    fn test_exact_hint_is_used() {
        let (list, ratios) = build(&[(1, 100), (2, 200)]);
        let f = lookup(&ratios);
        assert!(list.valid_insert_position(U256::from(150), Some(addr(2)), Some(addr(1)), &f));
        assert!(!list.valid_insert_position(U256::from(250), Some(addr(2)), Some(addr(1)), &f));
        assert_eq!(
            list.find_insert_position(U256::from(50), None, Some(addr(2)), &f),
            (Some(addr(1)), None)
        );
    }

    #[test]
    fn test_remove_and_reinsert() {
        let (mut list, mut ratios) = build(&[(1, 100), (2, 200), (3, 300)]);
        list.remove(&addr(3)).unwrap();
        assert_eq!(list.first(), Some(addr(2)));
        assert_eq!(list.prev(&addr(2)), None);
        assert!(matches!(list.remove(&addr(3)), Err(ProtocolError::IndexMissing(_))));

        ratios.insert(addr(1), U256::from(500));
        list.reinsert(addr(1), U256::from(500), Hints::none(), lookup(&ratios)).unwrap();
        assert_eq!(list.first(), Some(addr(1)));
        assert_eq!(list.last(), Some(addr(2)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_rejections() {
        let mut list = SortedTroves::new(1);
        let ratios: HashMap<Address, U256> = HashMap::new();
        assert_eq!(
            list.insert(addr(1), U256::ZERO, Hints::none(), lookup(&ratios)),
            Err(ProtocolError::ZeroNominalRatio)
        );
        list.insert(addr(1), U256::from(1), Hints::none(), lookup(&ratios)).unwrap();
        assert_eq!(
            list.insert(addr(2), U256::from(1), Hints::none(), lookup(&ratios)),
            Err(ProtocolError::IndexFull { max_size: 1 })
        );
    }

    proptest! {
        #[test]
        fn prop_order_holds_for_any_hints(
            values in prop::collection::vec(1u64..1_000, 1..40),
            hint_seed in prop::collection::vec((0u8..50, 0u8..50), 40),
        ) {
            let mut list = SortedTroves::new(usize::MAX);
            let mut ratios = HashMap::new();
            for (i, v) in values.iter().enumerate() {
                let id = addr(i as u8 + 1);
                ratios.insert(id, U256::from(*v));
                let (u, l) = hint_seed[i];
                let hints = Hints::new(Some(addr(u)), Some(addr(l)));
                list.insert(id, U256::from(*v), hints, lookup(&ratios)).unwrap();
            }
            let ordered: Vec<U256> = list.iter_from_highest().map(|a| ratios[&a]).collect();
            prop_assert_eq!(ordered.len(), values.len());
            prop_assert!(ordered.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}
