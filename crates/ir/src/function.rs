use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
    block::{BasicBlock, BlockId},
    module::FuncRef,
    operation::{OpId, Operation},
    slot::{Stack, StackSlot},
};

#[derive(Debug, Clone)]
pub struct Function {
    pub func_ref: FuncRef,
    pub sig: Signature,

    /// Every operation of the function, regardless of its block.
    pub ops: PrimaryMap<OpId, Operation>,
    pub blocks: PrimaryMap<BlockId, BasicBlock>,

    /// The first appended block.
    pub entry: Option<BlockId>,
}

impl Function {
    pub fn new(func_ref: FuncRef, sig: Signature) -> Self {
        Self {
            func_ref,
            sig,
            ops: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            entry: None,
        }
    }

    pub fn name(&self) -> &str {
        self.sig.name()
    }

    pub fn is_main(&self) -> bool {
        self.sig.kind == FunctionKind::Main
    }

    pub fn return_label(&self) -> StackSlot {
        StackSlot::FunctionReturnLabel(self.func_ref)
    }

    /// The stack on function entry: the return label (if the function can
    /// return) below the parameters, with the first parameter on top.
    pub fn entry_stack(&self) -> Stack {
        let mut stack = Stack::with_capacity(self.sig.params.len() + 1);
        if self.sig.returns_to_caller() {
            stack.push(self.return_label());
        }
        stack.extend(self.sig.params.iter().rev().cloned().map(StackSlot::Variable));
        stack
    }

    /// The declared return variables in declaration order.
    pub fn return_slots(&self) -> Stack {
        self.sig
            .returns
            .iter()
            .cloned()
            .map(StackSlot::Variable)
            .collect()
    }

    /// Returns `true` if `slot` is one of the function's return variables.
    /// Return variables are zero until first assigned.
    pub fn is_return_variable(&self, slot: &StackSlot) -> bool {
        slot.as_variable()
            .is_some_and(|name| self.sig.returns.contains(name))
    }

    pub fn ops_of(&self, block: BlockId) -> impl DoubleEndedIterator<Item = OpId> + '_ {
        self.blocks[block].ops.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// The top level code of a module. Takes no arguments and never returns.
    Main,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    name: SmolStr,
    pub kind: FunctionKind,
    pub params: SmallVec<[SmolStr; 4]>,
    pub returns: SmallVec<[SmolStr; 2]>,

    /// `false` if no path through the function returns to the caller.
    pub can_continue: bool,
}

impl Signature {
    pub fn new(name: &str, params: &[&str], returns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: FunctionKind::Internal,
            params: params.iter().map(|p| SmolStr::new(p)).collect(),
            returns: returns.iter().map(|r| SmolStr::new(r)).collect(),
            can_continue: true,
        }
    }

    pub fn main(name: &str) -> Self {
        Self {
            name: name.into(),
            kind: FunctionKind::Main,
            params: SmallVec::new(),
            returns: SmallVec::new(),
            can_continue: false,
        }
    }

    pub fn noreturn(mut self) -> Self {
        self.can_continue = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn returns_to_caller(&self) -> bool {
        self.kind == FunctionKind::Internal && self.can_continue
    }
}
