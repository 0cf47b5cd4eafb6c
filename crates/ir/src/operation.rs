use cranelift_entity::entity_impl;
use smol_str::SmolStr;

use crate::{module::FuncRef, slot::Stack};

/// An operation reference, unique within its function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u32);
entity_impl!(OpId, "op");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,

    /// Slots consumed by the operation. The last element must be on the top
    /// of the stack when the operation executes.
    pub input: Stack,

    /// Slots produced by the operation, replacing the inputs.
    pub output: Stack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// A machine builtin with a fixed arity.
    Builtin { name: SmolStr, terminates: bool },

    /// A call to a function of the same module.
    Call { callee: FuncRef, can_continue: bool },

    /// Binds the input values to the variables in the output. Emits no
    /// instruction.
    Assignment,
}

impl Operation {
    pub fn is_assignment(&self) -> bool {
        matches!(self.kind, OpKind::Assignment)
    }

    /// Returns `true` if control never reaches the next operation.
    pub fn terminates(&self) -> bool {
        match &self.kind {
            OpKind::Builtin { terminates, .. } => *terminates,
            OpKind::Call { can_continue, .. } => !can_continue,
            OpKind::Assignment => false,
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            OpKind::Builtin { name, .. } => name,
            OpKind::Call { .. } => "call",
            OpKind::Assignment => "assign",
        }
    }
}
