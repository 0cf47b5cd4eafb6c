use std::collections::BTreeSet;

use cranelift_entity::SecondaryMap;

use crate::{BlockId, Function};

/// Predecessors of every block, in block order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    preds: SecondaryMap<BlockId, BTreeSet<BlockId>>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, func: &Function) {
        self.clear();

        for (block, data) in func.blocks.iter() {
            for dest in data.exit.successors() {
                self.add_edge(block, dest);
            }
        }
    }

    pub fn preds_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.preds[block].iter()
    }

    pub fn pred_num_of(&self, block: BlockId) -> usize {
        self.preds[block].len()
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.preds[to].insert(from);
    }

    pub fn clear(&mut self) {
        self.preds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::test_util::*;

    #[test]
    fn diamond() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::new("f", &["c"], &["r"]));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        let b3 = builder.append_block();

        builder.switch_to_block(b0);
        builder.branch(StackSlot::var("c"), b1, b2);
        builder.switch_to_block(b1);
        builder.jump(b3);
        builder.switch_to_block(b2);
        builder.jump(b3);
        builder.switch_to_block(b3);
        builder.ret();

        let func = builder.finish();
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);

        assert_eq!(cfg.preds_of(b3).copied().collect::<Vec<_>>(), vec![b1, b2]);
        assert_eq!(cfg.preds_of(b1).copied().collect::<Vec<_>>(), vec![b0]);
        assert_eq!(cfg.pred_num_of(b0), 0);
        assert_eq!(cfg.pred_num_of(b3), 2);
    }

    #[test]
    fn loop_back_edge() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::main("main"));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        let b3 = builder.append_block();

        builder.switch_to_block(b0);
        builder.jump(b1);
        builder.switch_to_block(b1);
        builder.branch(StackSlot::lit(1u64), b3, b2);
        builder.switch_to_block(b2);
        builder.jump_back(b1);
        builder.switch_to_block(b3);
        builder.stop();

        let func = builder.finish();
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);

        assert_eq!(cfg.preds_of(b1).copied().collect::<Vec<_>>(), vec![b0, b2]);
        assert_eq!(cfg.pred_num_of(b3), 1);

        // Recomputing starts from scratch.
        cfg.compute(&func);
        assert_eq!(cfg.pred_num_of(b1), 2);
    }
}
