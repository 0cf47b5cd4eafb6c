//! Compute the set of stack slots that must be on the stack at each block
//! boundary and before each operation.
//!
//! This is a backward dataflow analysis driven by a work list:
//!
//! - A block is processed once the entry sets of all its successors are
//!   known; otherwise its successors are staged first.
//! - A backward jump starts from the best currently known entry set of the
//!   loop header, which may still grow.
//! - After the work list drains, every back edge whose source exit set does
//!   not cover the header entry set causes the blocks between header and back
//!   edge to be revisited. Sets only ever grow and the slot universe of a
//!   function is finite, so this reaches a fixed point.
//!
//! Freely generated slots (literals and call return labels) are never kept
//! live across operations, but they do appear in the entry set of the
//! operation consuming them.

use std::collections::{BTreeSet, VecDeque};

use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashSet;
use stackify_ir::{cfg::ControlFlowGraph, BlockExit, BlockId, Function, OpId, StackSlot};
use tracing::{debug, instrument};

use crate::error::InternalError;

pub type SlotSet = BTreeSet<StackSlot>;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BlockLiveness {
    pub entry: SlotSet,
    pub exit: SlotSet,
}

#[derive(Default, Debug)]
pub struct Liveness {
    blocks: SecondaryMap<BlockId, BlockLiveness>,
    ops: SecondaryMap<OpId, SlotSet>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(level = "debug", skip_all, fields(func = func.name()))]
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) -> Result<(), InternalError> {
        self.clear();

        let Some(entry) = func.entry else {
            return Ok(());
        };

        for (block, data) in func.blocks.iter() {
            if data.exit == BlockExit::Terminated
                && !data.ops.last().is_some_and(|op| func.ops[*op].terminates())
            {
                return Err(InternalError::Unterminated {
                    function: func.name().into(),
                    block,
                });
            }
            for succ in data.exit.successors() {
                if !func.blocks.is_valid(succ) {
                    return Err(InternalError::UnknownBlock {
                        function: func.name().into(),
                        block: succ,
                    });
                }
            }
            if matches!(data.exit, BlockExit::FunctionReturn { .. }) && !func.sig.returns_to_caller()
            {
                return Err(InternalError::ReturnFromMain {
                    function: func.name().into(),
                });
            }
        }

        let backward_jumps = collect_backward_jumps(func, entry);
        let mut to_visit = VecDeque::from([entry]);
        let mut visited = FxHashSet::default();

        while !to_visit.is_empty() {
            while let Some(block) = to_visit.pop_front() {
                if visited.contains(&block) {
                    continue;
                }

                let Some(exit) = self.exit_or_stage(func, block, &visited, &mut to_visit) else {
                    continue;
                };

                visited.insert(block);
                let entry = self.propagate_through_block(func, block, exit.clone());
                self.blocks[block] = BlockLiveness { entry, exit };
                to_visit.extend(cfg.preds_of(block).copied());
            }

            for &(jumping, header) in &backward_jumps {
                if self.blocks[header].entry.is_subset(&self.blocks[jumping].exit) {
                    continue;
                }

                debug!(%jumping, %header, "revisiting loop");
                to_visit.push_front(jumping);
                for pred in cfg.preds_of(header) {
                    visited.remove(pred);
                }

                let mut queue = VecDeque::from([jumping]);
                let mut seen = FxHashSet::default();
                while let Some(block) = queue.pop_front() {
                    if !seen.insert(block) {
                        continue;
                    }
                    visited.remove(&block);
                    if block == header {
                        continue;
                    }
                    queue.extend(cfg.preds_of(block).copied());
                }
            }
        }

        Ok(())
    }

    pub fn block_entry(&self, block: BlockId) -> &SlotSet {
        &self.blocks[block].entry
    }

    pub fn block_exit(&self, block: BlockId) -> &SlotSet {
        &self.blocks[block].exit
    }

    /// Slots required immediately before `op` executes, including its inputs.
    pub fn op_entry(&self, op: OpId) -> &SlotSet {
        &self.ops[op]
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.ops.clear();
    }

    /// Returns the exit set of `block` if all successors it depends on are
    /// known. Otherwise stages the missing successors in front of the work
    /// list.
    fn exit_or_stage(
        &self,
        func: &Function,
        block: BlockId,
        visited: &FxHashSet<BlockId>,
        to_visit: &mut VecDeque<BlockId>,
    ) -> Option<SlotSet> {
        match &func.blocks[block].exit {
            BlockExit::MainExit | BlockExit::Terminated => Some(SlotSet::new()),

            BlockExit::Jump {
                target,
                backwards: true,
            } => Some(self.blocks[*target].entry.clone()),

            BlockExit::Jump { target, .. } => {
                if visited.contains(target) {
                    Some(self.blocks[*target].entry.clone())
                } else {
                    to_visit.push_front(*target);
                    None
                }
            }

            exit @ (BlockExit::ConditionalJump { .. } | BlockExit::JumpTable { .. }) => {
                let succs = exit.successors();
                let mut ready = true;
                for succ in succs.iter().rev() {
                    if !visited.contains(succ) {
                        to_visit.push_front(*succ);
                        ready = false;
                    }
                }
                if !ready {
                    return None;
                }

                let mut slots = SlotSet::new();
                for succ in succs {
                    slots.extend(self.blocks[succ].entry.iter().cloned());
                }
                slots.extend(exit.control_slot().cloned());
                Some(slots)
            }

            BlockExit::FunctionReturn { values } => {
                let mut slots: SlotSet = values.iter().cloned().collect();
                slots.insert(func.return_label());
                Some(slots)
            }
        }
    }

    fn propagate_through_block(&mut self, func: &Function, block: BlockId, exit: SlotSet) -> SlotSet {
        func.ops_of(block)
            .rev()
            .fold(exit, |live, op| self.propagate_through_op(func, op, live))
    }

    fn propagate_through_op(&mut self, func: &Function, op: OpId, mut live: SlotSet) -> SlotSet {
        let data = &func.ops[op];

        live.retain(|slot| !slot.can_be_freely_generated());
        // Outputs include the variables an assignment overwrites, so their
        // previous values die here.
        for output in &data.output {
            live.remove(output);
        }
        live.extend(data.input.iter().cloned());

        self.ops[op] = live.clone();
        live
    }
}

/// Collects `(jumping block, loop header)` pairs of every back edge reachable
/// from `entry`.
fn collect_backward_jumps(func: &Function, entry: BlockId) -> Vec<(BlockId, BlockId)> {
    let mut jumps = Vec::new();
    let mut queue = VecDeque::from([entry]);
    let mut seen = FxHashSet::default();

    while let Some(block) = queue.pop_front() {
        if !seen.insert(block) {
            continue;
        }
        let exit = &func.blocks[block].exit;
        if let BlockExit::Jump {
            target,
            backwards: true,
        } = exit
        {
            jumps.push((block, *target));
        }
        queue.extend(exit.successors());
    }

    jumps
}

#[cfg(test)]
mod tests {
    use stackify_ir::builder::test_util::*;

    use super::*;

    fn set(slots: &[StackSlot]) -> SlotSet {
        slots.iter().cloned().collect()
    }

    fn var(name: &str) -> StackSlot {
        StackSlot::var(name)
    }

    fn compute(func: &Function) -> Liveness {
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(func);
        let mut liveness = Liveness::new();
        liveness.compute(func, &cfg).unwrap();
        liveness
    }

    #[test]
    fn straight_line() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::new("f", &["a", "b"], &["r"]));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let sum = builder.builtin("add", &[var("a"), StackSlot::lit(1u64)], 1);
        let assign = builder.assign(&["r"], &sum);
        builder.ret();
        let func = builder.finish();

        let liveness = compute(&func);
        let ret = func.return_label();
        let add = func.blocks[b0].ops[0];

        assert_eq!(liveness.block_exit(b0), &set(&[var("r"), ret.clone()]));
        assert_eq!(liveness.op_entry(assign), &set(&[sum[0].clone(), ret.clone()]));
        assert_eq!(
            liveness.op_entry(add),
            &set(&[var("a"), StackSlot::lit(1u64), ret.clone()])
        );
        // `b` is never read; the literal is regenerated.
        assert_eq!(liveness.block_entry(b0), &set(&[var("a"), StackSlot::lit(1u64), ret]));
    }

    #[test]
    fn reassignment_ends_liveness() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::main("main"));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let x = builder.builtin("calldataload", &[StackSlot::lit(0u64)], 1);
        builder.assign(&["x"], &x);
        let y = builder.builtin("calldataload", &[StackSlot::lit(32u64)], 1);
        let reassign = builder.assign(&["x"], &y);
        builder.builtin("sstore", &[StackSlot::lit(0u64), var("x")], 0);
        builder.stop();
        let func = builder.finish();

        let liveness = compute(&func);
        assert!(!liveness.op_entry(reassign).contains(&var("x")));
        assert!(liveness.block_entry(b0).is_subset(&set(&[StackSlot::lit(0u64)])));
    }

    #[test]
    fn branch_union() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::new("f", &["c", "a", "b"], &[]));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        let b3 = builder.append_block();

        builder.switch_to_block(b0);
        builder.branch(var("c"), b1, b2);
        builder.switch_to_block(b1);
        builder.builtin("log0", &[var("a")], 0);
        builder.jump(b3);
        builder.switch_to_block(b2);
        builder.builtin("log0", &[var("b")], 0);
        builder.jump(b3);
        builder.switch_to_block(b3);
        builder.ret();
        let func = builder.finish();

        let liveness = compute(&func);
        let ret = func.return_label();
        assert_eq!(liveness.block_entry(b3), &set(&[ret.clone()]));
        assert_eq!(liveness.block_entry(b1), &set(&[var("a"), ret.clone()]));
        assert_eq!(liveness.block_entry(b2), &set(&[var("b"), ret.clone()]));
        assert_eq!(
            liveness.block_exit(b0),
            &set(&[var("a"), var("b"), var("c"), ret])
        );
    }

    /// ```text
    /// block0: i := 0; jump block1
    /// block1: branch lt(i, n) zero block3 nonzero block2
    /// block2: log(acc); i := add(i, 1); jump block1 backwards
    /// block3: return
    /// ```
    #[test]
    fn loop_fixpoint() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::new("f", &["n", "acc"], &[]));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        let b3 = builder.append_block();

        builder.switch_to_block(b0);
        builder.assign(&["i"], &[StackSlot::lit(0u64)]);
        builder.jump(b1);

        builder.switch_to_block(b1);
        let cond = builder.builtin("lt", &[var("i"), var("n")], 1);
        builder.branch(cond[0].clone(), b3, b2);

        builder.switch_to_block(b2);
        builder.builtin("log0", &[var("acc")], 0);
        let next = builder.builtin("add", &[var("i"), StackSlot::lit(1u64)], 1);
        builder.assign(&["i"], &next);
        builder.jump_back(b1);

        builder.switch_to_block(b3);
        builder.ret();
        let func = builder.finish();

        let liveness = compute(&func);
        let ret = func.return_label();
        let header = set(&[var("i"), var("n"), var("acc"), ret.clone()]);

        assert_eq!(liveness.block_entry(b1), &header);
        // The back edge provides everything the header needs.
        assert!(liveness.block_entry(b1).is_subset(liveness.block_exit(b2)));
        assert_eq!(liveness.block_exit(b0), &header);
        // The literal assigned to `i` is an input of the assignment.
        assert_eq!(
            liveness.block_entry(b0),
            &set(&[var("n"), var("acc"), StackSlot::lit(0u64), ret])
        );
    }

    #[test]
    fn jump_table() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::main("main"));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        let b3 = builder.append_block();

        builder.switch_to_block(b0);
        let sel = builder.builtin("calldataload", &[StackSlot::lit(0u64)], 1);
        let x = builder.builtin("caller", &[], 1);
        builder.assign(&["x"], &x);
        builder.jump_table(sel[0].clone(), &[(1u64.into(), b1), (2u64.into(), b2)], b3);
        builder.switch_to_block(b1);
        builder.builtin("log0", &[var("x")], 0);
        builder.stop();
        builder.switch_to_block(b2);
        builder.stop();
        builder.switch_to_block(b3);
        builder.terminate("revert", &[StackSlot::lit(0u64), StackSlot::lit(0u64)]);
        let func = builder.finish();

        let liveness = compute(&func);
        assert_eq!(
            liveness.block_exit(b0),
            &set(&[sel[0].clone(), var("x"), StackSlot::lit(0u64)])
        );
        assert!(liveness.block_entry(b2).is_empty());
    }

    #[test]
    fn unknown_jump_target() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::main("main"));
        let mut builder = mb.func_builder(func_ref);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        builder.jump(BlockId::from_u32(7));
        let func = builder.finish();

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);
        let err = Liveness::new().compute(&func, &cfg).unwrap_err();
        assert!(matches!(err, InternalError::UnknownBlock { .. }));
    }

    #[test]
    fn unterminated_block() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::main("main"));
        let mut builder = mb.func_builder(func_ref);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        builder.builtin("log0", &[StackSlot::lit(1u64)], 0);
        builder.stop();
        let mut func = builder.finish();
        func.blocks[b0].exit = BlockExit::Terminated;

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);
        let err = Liveness::new().compute(&func, &cfg).unwrap_err();
        assert!(matches!(err, InternalError::Unterminated { block, .. } if block == b0));
    }
}
