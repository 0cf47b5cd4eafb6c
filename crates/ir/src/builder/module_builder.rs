use super::FunctionBuilder;
use crate::{module::FuncRef, Function, Module, Signature};

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a function. Its body is empty until [`Self::define`] is
    /// called with the result of [`FunctionBuilder::finish`].
    pub fn declare_function(&mut self, sig: Signature) -> FuncRef {
        let func_ref = self.module.funcs.next_key();
        self.module.funcs.push(Function::new(func_ref, sig))
    }

    pub fn sig(&self, func_ref: FuncRef) -> &Signature {
        &self.module.funcs[func_ref].sig
    }

    pub fn func_builder(&self, func_ref: FuncRef) -> FunctionBuilder<'_> {
        FunctionBuilder::new(self, func_ref)
    }

    pub fn define(&mut self, func: Function) {
        let func_ref = func.func_ref;
        self.module.funcs[func_ref] = func;
    }

    pub fn build(self) -> Module {
        self.module
    }
}
