use std::fmt;

use primitive_types::U256;
use smol_str::SmolStr;

use crate::{module::FuncRef, operation::OpId};

/// An abstract value that may reside on the operand stack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StackSlot {
    /// A named program variable.
    Variable(SmolStr),

    /// A constant. Literals never need to be kept live since they can be
    /// pushed again at any point.
    Literal(U256),

    /// The `index`-th output of the operation `op`.
    Temporary { op: OpId, index: u32 },

    /// The address a call to a continuing function returns to.
    CallReturnLabel(OpId),

    /// The address the function returns to.
    FunctionReturnLabel(FuncRef),

    /// Any value is acceptable at this position.
    Junk,
}

impl StackSlot {
    pub fn var(name: impl Into<SmolStr>) -> Self {
        Self::Variable(name.into())
    }

    pub fn lit(value: impl Into<U256>) -> Self {
        Self::Literal(value.into())
    }

    /// Returns `true` if the slot can be produced on demand without reading
    /// anything from the stack.
    pub fn can_be_freely_generated(&self) -> bool {
        matches!(self, Self::Literal(_) | Self::CallReturnLabel(_))
    }

    pub fn is_junk(&self) -> bool {
        matches!(self, Self::Junk)
    }

    pub fn as_variable(&self) -> Option<&SmolStr> {
        match self {
            Self::Variable(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "{name}"),
            Self::Literal(value) => {
                if value.bits() <= 64 {
                    write!(f, "0x{:x}", value.low_u64())
                } else {
                    write!(f, "0x{value:x}")
                }
            }
            Self::Temporary { op, index } => write!(f, "TMP[{op}, {index}]"),
            Self::CallReturnLabel(op) => write!(f, "RET[{op}]"),
            Self::FunctionReturnLabel(_) => write!(f, "RET"),
            Self::Junk => write!(f, "JUNK"),
        }
    }
}

/// An ordered sequence of slots. The top of the stack is the last element.
pub type Stack = Vec<StackSlot>;

/// Displays a stack as `[ a b c ]` with the top at the right.
pub struct DisplayStack<'a>(pub &'a [StackSlot]);

impl fmt::Display for DisplayStack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ ")?;
        for slot in self.0 {
            write!(f, "{slot} ")?;
        }
        write!(f, "]")
    }
}
