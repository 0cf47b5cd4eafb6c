/// Machine limits the stack code generator works within.
///
/// Built with [`StackConfig::evm`] and the `with_*` setters, which keep the
/// reach in `1..=16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Number of slots reachable from the top by `DUP*`. `SWAP*` reaches one
    /// slot further.
    reach: usize,

    /// Deepest operand stack the machine accepts.
    max_stack_depth: usize,

    /// Upper bound on steps of a single shuffle.
    max_shuffle_iterations: usize,
}

impl StackConfig {
    /// `DUP16` duplicates stack[15] and `SWAP16` swaps stack[0] and stack[16].
    pub const EVM_REACH: usize = 16;
    pub const EVM_MAX_STACK_DEPTH: usize = 1024;
    pub const DEFAULT_MAX_SHUFFLE_ITERATIONS: usize = 1000;

    pub fn evm() -> Self {
        Self {
            reach: Self::EVM_REACH,
            max_stack_depth: Self::EVM_MAX_STACK_DEPTH,
            max_shuffle_iterations: Self::DEFAULT_MAX_SHUFFLE_ITERATIONS,
        }
    }

    /// Narrows the addressable window, e.g. to exercise stack-too-deep
    /// handling with small functions.
    pub fn with_reach(mut self, reach: usize) -> Self {
        assert!(
            (1..=Self::EVM_REACH).contains(&reach),
            "stack reach must be in 1..={}",
            Self::EVM_REACH
        );
        self.reach = reach;
        self
    }

    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn reach(&self) -> usize {
        self.reach
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn max_shuffle_iterations(&self) -> usize {
        self.max_shuffle_iterations
    }

    /// Deepest slot a `DUP*` can copy, counted from the top starting at 0.
    pub fn dup_max_depth(&self) -> usize {
        self.reach - 1
    }

    /// Deepest slot a `SWAP*` can exchange with the top.
    pub fn swap_max_depth(&self) -> usize {
        self.reach
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::evm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_limits() {
        let config = StackConfig::default();
        assert_eq!(config.dup_max_depth(), 15);
        assert_eq!(config.swap_max_depth(), 16);
        assert_eq!(config.max_stack_depth(), 1024);
        assert_eq!(config.max_shuffle_iterations(), 1000);

        let narrow = config.with_reach(4);
        assert_eq!(narrow.dup_max_depth(), 3);
        assert_eq!(narrow.swap_max_depth(), 4);
        assert_eq!(narrow.reach(), 4);
        assert_eq!(narrow.max_stack_depth(), 1024);
    }

    #[test]
    #[should_panic]
    fn zero_reach() {
        let _ = StackConfig::evm().with_reach(0);
    }
}
