use cranelift_entity::entity_impl;
use primitive_types::U256;
use smallvec::SmallVec;

use crate::{
    operation::OpId,
    slot::{Stack, StackSlot},
};

/// A basic block reference, unique within its function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub ops: Vec<OpId>,
    pub exit: BlockExit,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            exit: BlockExit::Terminated,
        }
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockExit {
    /// End of the main function; the stack is discarded.
    MainExit,

    Jump {
        target: BlockId,
        /// Marks a loop back edge.
        backwards: bool,
    },

    ConditionalJump {
        condition: StackSlot,
        zero: BlockId,
        non_zero: BlockId,
    },

    JumpTable {
        selector: StackSlot,
        cases: SmallVec<[(U256, BlockId); 4]>,
        default: BlockId,
    },

    /// Return from the current function with `values` on the stack.
    FunctionReturn { values: Stack },

    /// The last operation of the block never continues.
    Terminated,
}

impl BlockExit {
    /// Successor blocks in the order they are declared, without duplicates.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        let mut succs = SmallVec::new();
        match self {
            Self::Jump { target, .. } => succs.push(*target),
            Self::ConditionalJump { zero, non_zero, .. } => {
                succs.push(*zero);
                if non_zero != zero {
                    succs.push(*non_zero);
                }
            }
            Self::JumpTable { cases, default, .. } => {
                for &(_, dest) in cases.iter() {
                    if !succs.contains(&dest) {
                        succs.push(dest);
                    }
                }
                if !succs.contains(default) {
                    succs.push(*default);
                }
            }
            Self::MainExit | Self::FunctionReturn { .. } | Self::Terminated => {}
        }
        succs
    }

    /// The slot a branching exit consumes from the top of the stack.
    pub fn control_slot(&self) -> Option<&StackSlot> {
        match self {
            Self::ConditionalJump { condition, .. } => Some(condition),
            Self::JumpTable { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;

    #[test]
    fn block_ids_format_by_name() {
        let block = BlockId::new(3);
        assert_eq!(block.to_string(), "block3");
        assert_eq!(format!("{block:?}"), "block3");
        assert_eq!(format!("{:?}", OpId::new(1)), "op1");
    }

    #[test]
    fn jump_table_successors_are_unique() {
        let (b1, b2) = (BlockId::new(1), BlockId::new(2));
        let exit = BlockExit::JumpTable {
            selector: StackSlot::var("s"),
            cases: [(U256::one(), b1), (U256::from(2u64), b1)].into_iter().collect(),
            default: b2,
        };
        assert_eq!(exit.successors().as_slice(), &[b1, b2]);
        assert_eq!(exit.control_slot(), Some(&StackSlot::var("s")));
    }
}
