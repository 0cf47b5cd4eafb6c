mod func_builder;
mod module_builder;

pub use func_builder::FunctionBuilder;
pub use module_builder::ModuleBuilder;

pub mod test_util {
    pub use super::*;

    pub use crate::{
        ir_writer::FuncWriter, BlockExit, BlockId, FuncRef, Function, Module, OpId, OpKind,
        Signature, StackSlot,
    };

    pub fn test_module_builder() -> ModuleBuilder {
        ModuleBuilder::new()
    }

    pub fn dump_func(func: &Function) -> String {
        let mut writer = FuncWriter::new(func);
        writer.dump_string().unwrap()
    }
}
