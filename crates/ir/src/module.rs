use cranelift_entity::{entity_impl, PrimaryMap};

use crate::Function;

#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Holds all functions declared in the module.
    pub funcs: PrimaryMap<FuncRef, Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `func_ref` in the module.
    pub fn iter_functions(&self) -> impl Iterator<Item = FuncRef> {
        self.funcs.keys()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "func");
