// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Deduplication caches
//!
//! Canonicalize structurally identical subexpressions to one shared node.
//! Caches are passed explicitly: [`DeduplicationCache`] for a single
//! tree-building session, [`SharedDeduplicationCache`] for a process-wide
//! cache shared between threads.

use crate::expression::{Expression, OperationKind};
use ahash::{AHashMap, RandomState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hash key of a node whose operands are already canonical.
///
/// Operands are identified by the address of their canonical node, which the
/// cache keeps alive. Commutative kinds store their operand addresses sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    kind: OperationKind,
    num_dimensions: usize,
    num_parameters: usize,
    payload: Vec<u64>,
    operands: Vec<usize>,
}

impl NodeKey {
    /// Key of `expression`, assuming its operands are canonical
    pub fn of(expression: &Expression) -> Self {
        let kind = expression.kind();
        let mut operands: Vec<usize> = kind.operands().iter().map(|e| e.id()).collect();
        if kind.is_commutative() {
            operands.sort_unstable();
        }
        Self {
            kind: kind.operation_kind(),
            num_dimensions: expression.num_dimensions(),
            num_parameters: expression.num_parameters(),
            payload: kind.payload_bits(),
            operands,
        }
    }
}

/// Deduplication statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationStats {
    pub canonical_nodes: usize,
    pub hits: usize,
    pub misses: usize,
}

impl DeduplicationStats {
    /// Fraction of lookups that found an existing canonical node
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups > 0 {
            self.hits as f64 / lookups as f64
        } else {
            0.0
        }
    }
}

/// Mapping from structural keys to canonical nodes
pub trait ExpressionCache {
    /// Return the canonical node for `key`, registering `candidate` if there
    /// is none yet
    fn intern(&self, key: NodeKey, candidate: Expression) -> Expression;

    fn stats(&self) -> DeduplicationStats;

    fn clear(&self);
}

/// Single-threaded cache scoped to one tree-building session
#[derive(Default)]
pub struct DeduplicationCache {
    nodes: RefCell<AHashMap<NodeKey, Expression>>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl DeduplicationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExpressionCache for DeduplicationCache {
    fn intern(&self, key: NodeKey, candidate: Expression) -> Expression {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(existing) = nodes.get(&key) {
            self.hits.set(self.hits.get() + 1);
            return existing.clone();
        }
        self.misses.set(self.misses.get() + 1);
        nodes.insert(key, candidate.clone());
        candidate
    }

    fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            canonical_nodes: self.nodes.borrow().len(),
            hits: self.hits.get(),
            misses: self.misses.get(),
        }
    }

    fn clear(&self) {
        self.nodes.borrow_mut().clear();
        self.hits.set(0);
        self.misses.set(0);
    }
}

/// Thread-safe cache for process-wide canonicalization
pub struct SharedDeduplicationCache {
    nodes: DashMap<NodeKey, Expression, RandomState>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl SharedDeduplicationCache {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::with_hasher(RandomState::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }
}

impl Default for SharedDeduplicationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionCache for SharedDeduplicationCache {
    fn intern(&self, key: NodeKey, candidate: Expression) -> Expression {
        match self.nodes.entry(key) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                entry.insert(candidate.clone());
                candidate
            }
        }
    }

    fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            canonical_nodes: self.nodes.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        self.nodes.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl Expression {
    /// Canonical node for this subtree, deduplicating operands first
    pub fn deduplicated<C: ExpressionCache + ?Sized>(&self, cache: &C) -> Expression {
        let before = cache.stats();
        let mut memo = AHashMap::new();
        let canonical = self.deduplicate_in(cache, &mut memo);
        let after = cache.stats();
        tracing::trace!(
            visited = memo.len(),
            inserted = after.misses.saturating_sub(before.misses),
            reused = after.hits.saturating_sub(before.hits),
            "deduplicated expression"
        );
        canonical
    }

    fn deduplicate_in<C: ExpressionCache + ?Sized>(
        &self,
        cache: &C,
        memo: &mut AHashMap<usize, Expression>,
    ) -> Expression {
        if let Some(done) = memo.get(&self.id()) {
            return done.clone();
        }
        let operands = self.operands();
        let canonical_operands: Vec<Expression> = operands
            .iter()
            .map(|operand| operand.deduplicate_in(cache, memo))
            .collect();
        let unchanged = operands
            .iter()
            .zip(&canonical_operands)
            .all(|(original, canonical)| original.ptr_eq(canonical));
        let candidate = if unchanged {
            self.clone()
        } else {
            Expression::trusted(
                self.kind().with_operands(&canonical_operands),
                self.num_dimensions(),
                self.num_parameters(),
            )
        };
        let canonical = cache.intern(NodeKey::of(&candidate), candidate);
        memo.insert(self.id(), canonical.clone());
        canonical
    }
}
