//! Ordered stack layouts at every block boundary and before every operation.
//!
//! - The function entry layout is the calling convention: the return label
//!   (if the function returns) below the parameters, first parameter on top.
//!   Return variables live on entry follow, zero until assigned.
//! - Walking forward from the entry, each operation keeps the incoming slots
//!   that are still live after it, in their incoming order. Its entry layout
//!   is that stack plus its inputs; its live outputs are then appended.
//! - The first predecessor to reach a block decides its entry layout; later
//!   predecessors are shuffled into it.
//! - Branch targets get the post-branch stack, with slots they do not need
//!   replaced by `Junk`, so entering a branch never emits code.

mod direct;
mod report;

use std::collections::VecDeque;

use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashSet;
use stackify_ir::{
    cfg::ControlFlowGraph, BlockExit, BlockId, Function, OpId, Stack, StackSlot,
};
use tracing::instrument;

use crate::{
    error::InternalError,
    liveness::{Liveness, SlotSet},
};

pub use direct::DirectLayout;
pub use report::find_stack_too_deep;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub entry: Stack,
    /// For branching exits, the condition or selector is on top.
    pub exit: Stack,
}

#[derive(Default, Debug)]
pub struct StackLayout {
    blocks: SecondaryMap<BlockId, BlockLayout>,
    ops: SecondaryMap<OpId, Stack>,
}

impl StackLayout {
    #[instrument(level = "debug", skip_all, fields(func = func.name()))]
    pub fn generate(
        func: &Function,
        cfg: &ControlFlowGraph,
        liveness: &Liveness,
    ) -> Result<Self, InternalError> {
        let mut generator = LayoutGenerator {
            func,
            cfg,
            liveness,
            layout: StackLayout::default(),
        };

        if let Some(entry) = func.entry {
            generator.process_entry_point(entry)?;
            generator.stitch_branches(entry)?;
        }

        Ok(generator.layout)
    }

    pub fn block_entry(&self, block: BlockId) -> &Stack {
        &self.blocks[block].entry
    }

    pub fn block_exit(&self, block: BlockId) -> &Stack {
        &self.blocks[block].exit
    }

    /// The stack right before `op` executes. Its inputs are on top.
    pub fn op_entry(&self, op: OpId) -> &Stack {
        &self.ops[op]
    }
}

/// Returns `true` if `slot` may be missing from a layout because it can be
/// produced on demand.
///
/// Return variables are not: once assigned their value lives on the stack.
/// The only place they are produced as zero is the function entry.
pub(crate) fn is_regenerable(slot: &StackSlot) -> bool {
    slot.is_junk() || slot.can_be_freely_generated()
}

/// The calling convention followed by the return variables that may be read
/// before they are assigned.
fn function_entry_layout(func: &Function, entry_live: &SlotSet) -> Stack {
    let mut stack = func.entry_stack();
    stack.extend(
        func.return_slots()
            .into_iter()
            .filter(|slot| entry_live.contains(slot)),
    );
    stack
}

struct LayoutGenerator<'a> {
    func: &'a Function,
    cfg: &'a ControlFlowGraph,
    liveness: &'a Liveness,
    layout: StackLayout,
}

impl LayoutGenerator<'_> {
    fn process_entry_point(&mut self, entry: BlockId) -> Result<(), InternalError> {
        let func = self.func;
        let live = self.liveness.block_entry(entry);
        self.layout.blocks[entry].entry = function_entry_layout(func, live);

        let mut to_visit = VecDeque::from([entry]);
        let mut visited = FxHashSet::default();

        while let Some(block) = to_visit.pop_front() {
            if !visited.insert(block) {
                continue;
            }

            let entry = self.layout.blocks[block].entry.clone();
            let mut stack = self.propagate_through_block(entry, block);

            match &func.blocks[block].exit {
                BlockExit::MainExit | BlockExit::FunctionReturn { .. } | BlockExit::Terminated => {}

                BlockExit::Jump { target, .. } => {
                    self.enter_or_check(*target, &stack, &visited, &mut to_visit)?;
                }

                exit @ (BlockExit::ConditionalJump { .. } | BlockExit::JumpTable { .. }) => {
                    if let Some(control) = exit.control_slot() {
                        if stack.last() != Some(control) {
                            stack.push(control.clone());
                        }
                    }
                    let post_branch = &stack[..stack.len() - 1];
                    for succ in exit.successors() {
                        self.enter_or_check(succ, post_branch, &visited, &mut to_visit)?;
                    }
                }
            }

            self.layout.blocks[block].exit = stack;
        }

        Ok(())
    }

    /// Hands `stack` to an unvisited `target` as its entry layout, or checks
    /// that it covers the layout an earlier predecessor decided.
    fn enter_or_check(
        &mut self,
        target: BlockId,
        stack: &[StackSlot],
        visited: &FxHashSet<BlockId>,
        to_visit: &mut VecDeque<BlockId>,
    ) -> Result<(), InternalError> {
        if !visited.contains(&target) {
            self.layout.blocks[target].entry = stack.to_vec();
            to_visit.push_front(target);
            return Ok(());
        }

        let missing = self.layout.blocks[target]
            .entry
            .iter()
            .find(|slot| !stack.contains(slot) && !is_regenerable(slot));
        match missing {
            Some(slot) => Err(InternalError::MissingSlot {
                function: self.func.name().into(),
                block: target,
                slot: slot.clone(),
            }),
            None => Ok(()),
        }
    }

    fn propagate_through_block(&mut self, mut stack: Stack, block: BlockId) -> Stack {
        let (func, liveness) = (self.func, self.liveness);
        let ops = &func.blocks[block].ops;
        let block_exit = liveness.block_exit(block);

        for (idx, &op) in ops.iter().enumerate() {
            let exit_set = match ops.get(idx + 1) {
                Some(&next) => liveness.op_entry(next),
                None => block_exit,
            };
            stack = self.propagate_through_op(stack, exit_set, op);
        }

        stack.retain(|slot| block_exit.contains(slot));
        stack
    }

    fn propagate_through_op(&mut self, entry: Stack, exit_set: &SlotSet, op: OpId) -> Stack {
        let data = &self.func.ops[op];

        // Previous values of overwritten variables are dropped, not kept
        // below the new ones.
        let mut stack: Stack = entry
            .into_iter()
            .filter(|slot| exit_set.contains(slot) && !data.output.contains(slot))
            .collect();

        let mut op_entry = stack.clone();
        op_entry.extend(data.input.iter().cloned());
        self.layout.ops[op] = op_entry;

        stack.extend(
            data.output
                .iter()
                .filter(|slot| exit_set.contains(slot))
                .cloned(),
        );
        stack
    }

    fn stitch_branches(&mut self, entry: BlockId) -> Result<(), InternalError> {
        let mut queue = VecDeque::from([entry]);
        let mut seen = FxHashSet::default();

        while let Some(block) = queue.pop_front() {
            if !seen.insert(block) {
                continue;
            }

            let func = self.func;
            let exit = &func.blocks[block].exit;
            match exit {
                BlockExit::Jump { target, backwards } => {
                    if !backwards {
                        queue.push_back(*target);
                    }
                }

                BlockExit::ConditionalJump { .. } | BlockExit::JumpTable { .. } => {
                    let mut post_branch = self.layout.blocks[block].exit.clone();
                    debug_assert_eq!(post_branch.last(), exit.control_slot());
                    post_branch.pop();

                    for succ in exit.successors() {
                        if self.cfg.pred_num_of(succ) > 1 {
                            return Err(InternalError::CriticalEdge {
                                function: self.func.name().into(),
                                block: succ,
                            });
                        }
                        let entry = self.stitch_target(succ, &post_branch)?;
                        self.layout.blocks[succ].entry = entry;
                        queue.push_back(succ);
                    }
                }

                BlockExit::MainExit | BlockExit::FunctionReturn { .. } | BlockExit::Terminated => {}
            }
        }

        Ok(())
    }

    fn stitch_target(&self, target: BlockId, post_branch: &[StackSlot]) -> Result<Stack, InternalError> {
        let needed = self.liveness.block_entry(target);
        let stitched: Stack = post_branch
            .iter()
            .map(|slot| {
                if needed.contains(slot) {
                    slot.clone()
                } else {
                    StackSlot::Junk
                }
            })
            .collect();

        match needed
            .iter()
            .find(|slot| !stitched.contains(slot) && !is_regenerable(slot))
        {
            Some(slot) => Err(InternalError::MissingSlot {
                function: self.func.name().into(),
                block: target,
                slot: slot.clone(),
            }),
            None => Ok(stitched),
        }
    }
}
