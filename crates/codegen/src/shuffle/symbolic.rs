use stackify_ir::{Stack, StackSlot};
use tracing::trace;

use super::{shuffle, IndexedStacks, IndexingMap, ShuffleOperations};
use crate::{config::StackConfig, error::InternalError};

/// A primitive recorded by a symbolic shuffle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShuffleOp {
    /// Swap the top with the slot `n` positions below it.
    Swap(usize),
    PushOrDup(StackSlot),
    Pop,
}

impl ShuffleOp {
    pub fn apply(&self, stack: &mut Stack) {
        match self {
            Self::Swap(depth) => {
                let top = stack.len() - 1;
                stack.swap(top, top - depth);
            }
            Self::PushOrDup(slot) => stack.push(slot.clone()),
            Self::Pop => {
                stack.pop();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShufflePlan {
    pub ops: Vec<ShuffleOp>,

    /// The stack after the shuffle. Equal to the target, with `Junk` where
    /// the target accepts anything.
    pub result: Stack,
}

/// Computes the primitives that transform `source` into `target` without
/// emitting anything.
pub fn plan_shuffle(
    source: &[StackSlot],
    target: &[StackSlot],
    config: &StackConfig,
) -> Result<ShufflePlan, InternalError> {
    let mut map = IndexingMap::new();
    let stacks = IndexedStacks::new(&mut map, source, target);
    let mut shuffler = SymbolicShuffle {
        stacks,
        map: &map,
        ops: Vec::new(),
    };

    shuffle(
        &mut shuffler,
        config.swap_max_depth(),
        config.max_shuffle_iterations(),
    )?;

    let result = shuffler.stacks.materialize(&map, target)?;
    Ok(ShufflePlan {
        ops: shuffler.ops,
        result,
    })
}

/// Applies recorded primitives to `source`.
pub fn replay(source: &[StackSlot], ops: &[ShuffleOp]) -> Stack {
    let mut stack = source.to_vec();
    for op in ops {
        op.apply(&mut stack);
    }
    stack
}

struct SymbolicShuffle<'a> {
    stacks: IndexedStacks,
    map: &'a IndexingMap,
    ops: Vec<ShuffleOp>,
}

impl ShuffleOperations for SymbolicShuffle<'_> {
    fn update_multiplicity(&mut self) {
        self.stacks.update_multiplicity();
    }

    fn is_compatible(&self, source: usize, target: usize) -> bool {
        self.stacks.is_compatible(source, target)
    }

    fn source_is_same(&self, lhs: usize, rhs: usize) -> bool {
        self.stacks.source_is_same(lhs, rhs)
    }

    fn source_multiplicity(&self, offset: usize) -> i32 {
        self.stacks.source_multiplicity(offset)
    }

    fn target_multiplicity(&self, offset: usize) -> i32 {
        self.stacks.target_multiplicity(offset)
    }

    fn target_is_arbitrary(&self, offset: usize) -> bool {
        self.stacks.target_is_arbitrary(offset)
    }

    fn source_size(&self) -> usize {
        self.stacks.source.len()
    }

    fn target_size(&self) -> usize {
        self.stacks.target.len()
    }

    fn source_state(&self) -> &[usize] {
        &self.stacks.source
    }

    fn swap(&mut self, depth: usize) {
        trace!(depth, "swap");
        self.stacks.swap(depth);
        self.ops.push(ShuffleOp::Swap(depth));
    }

    fn pop(&mut self) {
        trace!("pop");
        self.stacks.pop();
        self.ops.push(ShuffleOp::Pop);
    }

    fn push_or_dup_target(&mut self, offset: usize) {
        let index = self.stacks.push_target(offset);
        let slot = self.map.slot(index).clone();
        trace!(%slot, "push or dup");
        self.ops.push(ShuffleOp::PushOrDup(slot));
    }
}
