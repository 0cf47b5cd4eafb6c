//! Stack shuffling: transforms a source stack into a target stack using
//! `SWAP*`, `DUP*`/`PUSH*` and `POP`.
//!
//! - Stack positions are offsets from the bottom of the stack, so a position
//!   stays valid while the stack above it changes. Swap depths are counted from
//!   the top: `swap(1)` exchanges the two topmost slots.
//! - Target positions holding `Junk` accept any value.
//! - The driver is greedy: each step applies the first rule that makes
//!   progress. The same driver runs over [`symbolic`] stacks for planning and
//!   over the materialised stack of the instruction emitter.
//! - `reach` is the deepest swap the machine supports; a `DUP*` reaches one
//!   slot less.

pub mod indexing;
pub mod symbolic;

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use stackify_ir::{DisplayStack, Stack, StackSlot};
use tracing::debug;

use crate::error::InternalError;

pub use indexing::{IndexingMap, FUNCTION_RETURN_LABEL_INDEX, JUNK_INDEX};
pub use symbolic::{plan_shuffle, replay, ShuffleOp, ShufflePlan};

/// Queries and primitive effects the shuffling driver is written against.
///
/// Implementations keep the source stack consistent with every primitive
/// they perform.
pub trait ShuffleOperations {
    /// Recomputes multiplicities after the source stack changed.
    fn update_multiplicity(&mut self);

    /// `true` if the slot at `source` may stay at position `target`.
    fn is_compatible(&self, source: usize, target: usize) -> bool;

    /// `true` if two source positions hold the same slot.
    fn source_is_same(&self, lhs: usize, rhs: usize) -> bool;

    /// Missing copies of the slot at `offset` in the source: positive if
    /// more copies are required, negative if this copy is surplus.
    fn source_multiplicity(&self, offset: usize) -> i32;

    /// Same as [`Self::source_multiplicity`] for the slot at a target
    /// position.
    fn target_multiplicity(&self, offset: usize) -> i32;

    /// `true` if any slot is acceptable at the target position.
    fn target_is_arbitrary(&self, offset: usize) -> bool;

    fn source_size(&self) -> usize;

    fn target_size(&self) -> usize;

    /// The source stack in index form. Each step depends on nothing else, so
    /// a repeated state means the shuffle cycles.
    fn source_state(&self) -> &[usize];

    /// Swaps the top with the slot `depth` positions below it.
    fn swap(&mut self, depth: usize);

    fn pop(&mut self);

    /// Pushes the slot required at target position `offset`, by `DUP*` or by
    /// regenerating it.
    fn push_or_dup_target(&mut self, offset: usize);
}

/// Runs shuffling steps until the source matches the target.
///
/// Within `reach` the greedy rules can cycle when a required slot sits
/// deeper than any swap. The shuffle then finishes from where it stopped
/// without the window, and the implementation reports every primitive
/// that reaches too deep.
pub fn shuffle<O: ShuffleOperations>(
    ops: &mut O,
    reach: usize,
    max_iterations: usize,
) -> Result<(), InternalError> {
    if run_steps(ops, reach, max_iterations)? {
        return Ok(());
    }

    debug!(reach, "shuffle does not converge within reach");
    if run_steps(ops, usize::MAX, max_iterations)? {
        return Ok(());
    }

    Err(InternalError::ShuffleDiverged(max_iterations))
}

/// Returns `false` if the source stack repeats or still differs from the
/// target after `max_iterations` steps.
fn run_steps<O: ShuffleOperations>(
    ops: &mut O,
    reach: usize,
    max_iterations: usize,
) -> Result<bool, InternalError> {
    let mut seen = FxHashSet::default();
    for _ in 0..max_iterations {
        if !seen.insert(ops.source_state().to_vec()) {
            return Ok(false);
        }
        if !shuffle_step(ops, reach)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Performs a single primitive. Returns `false` once the source stack already
/// matches the target.
fn shuffle_step<O: ShuffleOperations>(ops: &mut O, reach: usize) -> Result<bool, InternalError> {
    ops.update_multiplicity();

    let size = ops.source_size();
    let target_size = ops.target_size();

    if (0..size).all(|offset| ops.is_compatible(offset, offset)) {
        if size < target_size {
            if !dup_deep_slot_if_required(ops, reach) && !bring_up_target_slot(ops, size) {
                return Err(InternalError::ShuffleStuck("no source for a missing target slot"));
            }
            return Ok(true);
        }
        return Ok(false);
    }

    let top = size - 1;

    // Surplus top slot that no position wants.
    if ops.source_multiplicity(top) < 0 && !ops.target_is_arbitrary(top) {
        ops.pop();
        return Ok(true);
    }

    if target_size == 0 {
        return Err(InternalError::ShuffleStuck("required slot above an empty target"));
    }

    // Move the top down into a position that wants it.
    if !ops.is_compatible(top, top) || ops.target_is_arbitrary(top) {
        for offset in 0..size.min(target_size) {
            if ops.is_compatible(offset, offset)
                || ops.source_is_same(offset, top)
                || !ops.is_compatible(top, offset)
            {
                continue;
            }

            if size - offset - 1 > reach {
                // Out of reach: first dig up something that has to be popped
                // anyway.
                for swap_depth in (1..=reach).rev() {
                    if ops.source_multiplicity(size - 1 - swap_depth) < 0 {
                        ops.swap(swap_depth);
                        return Ok(true);
                    }
                }
            }
            ops.swap(size - offset - 1);
            return Ok(true);
        }
    }

    if size > target_size {
        return Err(InternalError::ShuffleStuck("source above the target is still required"));
    }

    // A slot in the way that is surplus needs to be popped eventually. Make
    // sure its position gets what it wants.
    for offset in 0..size {
        if !ops.is_compatible(offset, offset)
            && ops.source_multiplicity(offset) < 0
            && !ops.target_is_arbitrary(offset)
        {
            if !dup_deep_slot_if_required(ops, reach) && !bring_up_target_slot(ops, offset) {
                return Err(InternalError::ShuffleStuck("cannot replace a surplus slot"));
            }
            return Ok(true);
        }
    }

    // Every slot in the source is needed from here on.
    if (0..size).any(|offset| ops.source_multiplicity(offset) < 0) {
        return Err(InternalError::ShuffleStuck("surplus slot left after cleanup"));
    }

    if !ops.is_compatible(top, top) {
        for offset in 0..size {
            if !ops.is_compatible(offset, offset) && ops.is_compatible(offset, top) {
                ops.swap(size - offset - 1);
                return Ok(true);
            }
        }
    }

    if size < target_size {
        if !dup_deep_slot_if_required(ops, reach) && !bring_up_target_slot(ops, size) {
            return Err(InternalError::ShuffleStuck("no source for the next target slot"));
        }
        return Ok(true);
    }

    if !ops.is_compatible(top, top) {
        return Err(InternalError::ShuffleStuck("top slot cannot be placed"));
    }

    for offset in 0..size {
        if !ops.is_compatible(offset, offset) && ops.is_compatible(top, offset) {
            ops.swap(size - offset - 1);
            return Ok(true);
        }
    }

    for offset in 0..size {
        if !ops.is_compatible(offset, offset) && !ops.source_is_same(offset, top) {
            ops.swap(size - offset - 1);
            return Ok(true);
        }
    }

    Err(InternalError::ShuffleStuck("no rule applies"))
}

/// Deals with slots about to become unreachable by `DUP*`, before anything
/// else is pushed on top of them.
fn dup_deep_slot_if_required<O: ShuffleOperations>(ops: &mut O, reach: usize) -> bool {
    let size = ops.source_size();
    let dup_reach = reach - 1;
    if size < dup_reach {
        return false;
    }

    for source_offset in 0..(size - dup_reach) {
        if !ops.is_compatible(source_offset, source_offset) {
            if ops.is_compatible(size - 1, source_offset) {
                ops.swap(size - source_offset - 1);
                return true;
            }
            if bring_up_target_slot(ops, source_offset) {
                return true;
            }
            for offset in source_offset + 1..size {
                if ops.is_compatible(offset, source_offset) {
                    ops.swap(size - offset - 1);
                    return true;
                }
            }
        } else if ops.source_multiplicity(source_offset) > 0 {
            // A shallower copy stays reachable.
            if (source_offset + 1..size).any(|offset| ops.source_is_same(source_offset, offset)) {
                continue;
            }
            for target_offset in 0..ops.target_size() {
                if !ops.target_is_arbitrary(target_offset)
                    && ops.is_compatible(source_offset, target_offset)
                {
                    ops.push_or_dup_target(target_offset);
                    return true;
                }
            }
        }
    }

    false
}

/// Pushes a slot that is still missing and that either belongs at
/// `target_offset` or would let the slot there move on.
fn bring_up_target_slot<O: ShuffleOperations>(ops: &mut O, target_offset: usize) -> bool {
    let mut to_visit = VecDeque::from([target_offset]);
    let mut visited = FxHashSet::default();

    while let Some(offset) = to_visit.pop_front() {
        visited.insert(offset);
        if ops.target_multiplicity(offset) > 0 {
            ops.push_or_dup_target(offset);
            return true;
        }

        let bound = ops.source_size().min(ops.target_size());
        for next in 0..bound {
            if !ops.is_compatible(next, next)
                && ops.is_compatible(next, offset)
                && !visited.contains(&next)
            {
                to_visit.push_back(next);
            }
        }
    }

    false
}

/// Source and target stacks in index form, plus the multiplicity of every
/// index. Shared bookkeeping of the [`ShuffleOperations`] implementations.
#[derive(Debug, Clone)]
pub struct IndexedStacks {
    pub source: Vec<usize>,
    pub target: Vec<usize>,
    multiplicity: Vec<i32>,
}

impl IndexedStacks {
    pub fn new(map: &mut IndexingMap, source: &[StackSlot], target: &[StackSlot]) -> Self {
        Self {
            source: map.index_stack(source),
            target: map.index_stack(target),
            multiplicity: Vec::new(),
        }
    }

    pub fn update_multiplicity(&mut self) {
        let len = self
            .source
            .iter()
            .chain(self.target.iter())
            .max()
            .map_or(0, |max| max + 1);
        self.multiplicity.clear();
        self.multiplicity.resize(len, 0);

        for &slot in &self.source {
            self.multiplicity[slot] -= 1;
        }
        for (offset, &slot) in self.target.iter().enumerate() {
            if slot == JUNK_INDEX && offset < self.source.len() {
                self.multiplicity[self.source[offset]] += 1;
            } else {
                self.multiplicity[slot] += 1;
            }
        }
    }

    pub fn is_compatible(&self, source: usize, target: usize) -> bool {
        source < self.source.len()
            && target < self.target.len()
            && (self.target[target] == JUNK_INDEX || self.source[source] == self.target[target])
    }

    pub fn source_is_same(&self, lhs: usize, rhs: usize) -> bool {
        self.source[lhs] == self.source[rhs]
    }

    pub fn source_multiplicity(&self, offset: usize) -> i32 {
        self.multiplicity[self.source[offset]]
    }

    pub fn target_multiplicity(&self, offset: usize) -> i32 {
        self.multiplicity[self.target[offset]]
    }

    pub fn target_is_arbitrary(&self, offset: usize) -> bool {
        offset < self.target.len() && self.target[offset] == JUNK_INDEX
    }

    pub fn swap(&mut self, depth: usize) {
        let top = self.source.len() - 1;
        debug_assert!(depth > 0 && depth <= top, "invalid swap depth {depth}");
        self.source.swap(top, top - depth);
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.source.pop()
    }

    pub fn push_target(&mut self, offset: usize) -> usize {
        let slot = self.target[offset];
        self.source.push(slot);
        slot
    }

    /// Maps the shuffled source back to slots. Positions where the target
    /// accepts anything become `Junk`.
    pub fn materialize(
        &self,
        map: &IndexingMap,
        target: &[StackSlot],
    ) -> Result<Stack, InternalError> {
        let mut result: Stack = self.source.iter().map(|&i| map.slot(i).clone()).collect();

        let matches = result.len() == target.len()
            && result
                .iter_mut()
                .zip(target)
                .all(|(slot, expected)| match expected {
                    StackSlot::Junk => {
                        *slot = StackSlot::Junk;
                        true
                    }
                    _ => slot == expected,
                });

        if matches {
            Ok(result)
        } else {
            Err(InternalError::ShuffleMismatch {
                expected: DisplayStack(target).to_string(),
                found: DisplayStack(&result).to_string(),
            })
        }
    }
}
