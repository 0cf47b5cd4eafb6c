use stackify_ir::{BlockId, DisplayStack, OpId, SmolStr, StackSlot};
use thiserror::Error;

/// A slot that cannot be brought within reach of the top of the stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stack too deep in `{function}`: {message}")]
pub struct StackTooDeep {
    pub function: SmolStr,

    /// The unreachable slot, if a single one is responsible.
    pub slot: Option<StackSlot>,

    /// Number of slots beyond the reachable window.
    pub deficit: usize,

    /// Variables between the unreachable slot and the top. Moving any of
    /// them out of the stack resolves the error.
    pub variables: Vec<SmolStr>,

    pub message: String,
}

impl StackTooDeep {
    /// A `slot` found `depth` slots below the top of `stack`, `deficit`
    /// slots beyond the reachable window.
    pub fn unreachable(
        function: &str,
        stack: &[StackSlot],
        slot: StackSlot,
        depth: usize,
        deficit: usize,
    ) -> Self {
        let mut variables: Vec<SmolStr> = Vec::new();
        let start = stack.len().saturating_sub(depth + 1);
        for name in stack[start..].iter().filter_map(StackSlot::as_variable) {
            if !variables.contains(name) {
                variables.push(name.clone());
            }
        }

        let message = format!(
            "`{slot}` is {deficit} slot(s) too deep in {}",
            DisplayStack(stack)
        );
        Self {
            function: function.into(),
            slot: Some(slot),
            deficit,
            variables,
            message,
        }
    }

    /// The stack grew beyond `max_depth` slots.
    pub fn overflow(function: &str, depth: usize, max_depth: usize) -> Self {
        Self {
            function: function.into(),
            slot: None,
            deficit: depth - max_depth,
            variables: Vec::new(),
            message: format!("stack of {depth} slots exceeds the limit of {max_depth}"),
        }
    }
}

/// An impossible state reached while analysing or lowering a function. These
/// indicate malformed input IR, never a problem in the user's program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("`{function}`: jump to unknown block `{block}`")]
    UnknownBlock { function: SmolStr, block: BlockId },

    #[error("`{function}`: `{op}` expects {expected} on top of the stack, found {found}")]
    OperandMismatch {
        function: SmolStr,
        op: OpId,
        expected: String,
        found: String,
    },

    #[error("`{function}`: layout of `{block}` requires `{slot}`, which is not available")]
    MissingSlot {
        function: SmolStr,
        block: BlockId,
        slot: StackSlot,
    },

    #[error("`{function}`: branch target `{block}` has more than one predecessor")]
    CriticalEdge { function: SmolStr, block: BlockId },

    #[error("`{function}`: `{slot}` cannot be produced on demand")]
    Unproducible { function: SmolStr, slot: StackSlot },

    #[error("`{function}`: `{block}` is terminated but its last operation continues")]
    Unterminated { function: SmolStr, block: BlockId },

    #[error("`{function}`: an argument of `{op}` produces no value")]
    VoidArgument { function: SmolStr, op: OpId },

    #[error("`{function}`: function return outside of an internal function")]
    ReturnFromMain { function: SmolStr },

    #[error("stack shuffling did not converge after {0} steps")]
    ShuffleDiverged(usize),

    #[error("stack shuffling reached an inconsistent state: {0}")]
    ShuffleStuck(&'static str),

    #[error("shuffled stack {found} does not match target {expected}")]
    ShuffleMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// Fails only the affected function.
    #[error("{} stack too deep error(s) in `{function}`", .errors.len())]
    StackTooDeep {
        function: SmolStr,
        errors: Vec<StackTooDeep>,
    },

    /// Aborts the whole compilation run.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl CodegenError {
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
