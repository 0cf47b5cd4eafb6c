use std::io;

use crate::{
    slot::DisplayStack, BasicBlock, BlockExit, BlockId, Function, Module, OpId, OpKind,
};

pub struct ModuleWriter<'a> {
    module: &'a Module,
}

impl<'a> ModuleWriter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        for func in self.module.funcs.values() {
            FuncWriter::new(func).write(&mut w)?;
            writeln!(w)?;
        }

        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub struct FuncWriter<'a> {
    func: &'a Function,
    level: u8,
}

impl<'a> FuncWriter<'a> {
    pub fn new(func: &'a Function) -> Self {
        Self { func, level: 0 }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        let sig = &self.func.sig;
        if self.func.is_main() {
            write!(w, "main %{}", sig.name())?;
        } else {
            write!(
                w,
                "func %{}({}) -> ({})",
                sig.name(),
                sig.params.join(", "),
                sig.returns.join(", ")
            )?;
            if !sig.can_continue {
                write!(w, " noreturn")?;
            }
        }

        writeln!(w, " {{")?;
        self.level += 1;

        let func = self.func;
        for (block, data) in func.blocks.iter() {
            self.write_block(block, data, &mut w)?;
        }

        self.level -= 1;
        writeln!(w, "}}")?;

        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_block(
        &mut self,
        block: BlockId,
        data: &BasicBlock,
        mut w: impl io::Write,
    ) -> io::Result<()> {
        self.indent(&mut w)?;
        writeln!(w, "{block}:")?;
        self.level += 1;

        for &op in &data.ops {
            self.indent(&mut w)?;
            self.write_op(op, &mut w)?;
            writeln!(w)?;
        }

        self.indent(&mut w)?;
        self.write_exit(&data.exit, &mut w)?;
        writeln!(w)?;

        self.level -= 1;
        Ok(())
    }

    fn write_op(&self, op: OpId, mut w: impl io::Write) -> io::Result<()> {
        let data = &self.func.ops[op];
        write!(w, "{op}: ")?;
        match &data.kind {
            OpKind::Builtin { name, .. } => write!(w, "{name}")?,
            OpKind::Call { callee, .. } => write!(w, "call {callee}")?,
            OpKind::Assignment => write!(w, "assign")?,
        }
        write!(w, " {}", DisplayStack(&data.input))?;
        if !data.output.is_empty() {
            write!(w, " -> {}", DisplayStack(&data.output))?;
        }
        Ok(())
    }

    fn write_exit(&self, exit: &BlockExit, mut w: impl io::Write) -> io::Result<()> {
        match exit {
            BlockExit::MainExit => write!(w, "stop"),
            BlockExit::Jump { target, backwards } => {
                write!(w, "jump {target}")?;
                if *backwards {
                    write!(w, " backwards")?;
                }
                Ok(())
            }
            BlockExit::ConditionalJump {
                condition,
                zero,
                non_zero,
            } => write!(w, "branch {condition} zero {zero} nonzero {non_zero}"),
            BlockExit::JumpTable {
                selector,
                cases,
                default,
            } => {
                write!(w, "switch {selector}")?;
                for (value, dest) in cases {
                    write!(w, " {} {dest}", crate::StackSlot::Literal(*value))?;
                }
                write!(w, " default {default}")
            }
            BlockExit::FunctionReturn { values } => write!(w, "return {}", DisplayStack(values)),
            BlockExit::Terminated => write!(w, "terminated"),
        }
    }

    fn indent(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(" ".repeat(self.level as usize * 4).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::test_util::*;

    #[test]
    fn module_with_switch() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::main("main"));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        builder.switch_to_block(b0);
        let sel = builder.builtin("calldataload", &[StackSlot::lit(0u64)], 1);
        builder.jump_table(sel[0].clone(), &[(1u64.into(), b1)], b2);
        builder.switch_to_block(b1);
        builder.jump_back(b0);
        builder.switch_to_block(b2);
        builder.stop();
        let func = builder.finish();
        mb.define(func);

        let module = mb.build();
        assert_eq!(
            ModuleWriter::new(&module).dump_string().unwrap(),
            "main %main {
    block0:
        op0: calldataload [ 0x0 ] -> [ TMP[op0, 0] ]
        switch TMP[op0, 0] 0x1 block1 default block2
    block1:
        jump block0 backwards
    block2:
        stop
}

"
        );
    }
}
