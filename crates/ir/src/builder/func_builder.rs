use primitive_types::U256;
use smallvec::SmallVec;

use super::ModuleBuilder;
use crate::{
    module::FuncRef, BasicBlock, BlockExit, BlockId, Function, OpId, OpKind, Operation, Stack,
    StackSlot,
};

pub struct FunctionBuilder<'a> {
    module_builder: &'a ModuleBuilder,
    pub func: Function,
    current: Option<BlockId>,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(module_builder: &'a ModuleBuilder, func_ref: FuncRef) -> Self {
        let func = Function::new(func_ref, module_builder.sig(func_ref).clone());
        Self {
            module_builder,
            func,
            current: None,
        }
    }

    pub fn finish(self) -> Function {
        if cfg!(debug_assertions) {
            for (block, data) in self.func.blocks.iter() {
                if data.exit == BlockExit::Terminated {
                    debug_assert!(
                        data.ops
                            .last()
                            .is_some_and(|op| self.func.ops[*op].terminates()),
                        "`{block}` is not terminated by its last operation"
                    );
                }
            }
        }

        self.func
    }

    pub fn append_block(&mut self) -> BlockId {
        let block = self.func.blocks.push(BasicBlock::new());
        if self.func.entry.is_none() {
            self.func.entry = Some(block);
        }
        block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> BlockId {
        self.current
            .expect("builder must be positioned at a block before inserting operations")
    }

    /// Inserts a builtin taking `args` (first argument on top) and producing
    /// `results` temporaries.
    pub fn builtin(&mut self, name: &str, args: &[StackSlot], results: u32) -> Stack {
        let kind = OpKind::Builtin {
            name: name.into(),
            terminates: false,
        };
        let op = self.func.ops.next_key();
        let output = (0..results)
            .map(|index| StackSlot::Temporary { op, index })
            .collect();
        self.insert_op(Operation {
            kind,
            input: args.iter().rev().cloned().collect(),
            output,
        });
        self.func.ops[op].output.clone()
    }

    /// Inserts a builtin that never continues, e.g. `revert`, and terminates
    /// the current block.
    pub fn terminate(&mut self, name: &str, args: &[StackSlot]) -> OpId {
        let op = self.insert_op(Operation {
            kind: OpKind::Builtin {
                name: name.into(),
                terminates: true,
            },
            input: args.iter().rev().cloned().collect(),
            output: Stack::new(),
        });
        self.set_exit(BlockExit::Terminated);
        op
    }

    /// Inserts a call to `callee` and returns its results. A call to a
    /// function that never returns terminates the current block.
    pub fn call(&mut self, callee: FuncRef, args: &[StackSlot]) -> Stack {
        let sig = self.module_builder.sig(callee);
        let can_continue = sig.can_continue;
        let op = self.func.ops.next_key();

        let mut input = Stack::with_capacity(args.len() + 1);
        let mut output = Stack::new();
        if can_continue {
            input.push(StackSlot::CallReturnLabel(op));
            output.extend(
                (0..sig.returns.len() as u32).map(|index| StackSlot::Temporary { op, index }),
            );
        }
        input.extend(args.iter().rev().cloned());

        self.insert_op(Operation {
            kind: OpKind::Call {
                callee,
                can_continue,
            },
            input,
            output: output.clone(),
        });

        if !can_continue {
            self.set_exit(BlockExit::Terminated);
        }
        output
    }

    /// Binds `values` to `vars` pairwise.
    pub fn assign(&mut self, vars: &[&str], values: &[StackSlot]) -> OpId {
        debug_assert_eq!(vars.len(), values.len());
        self.insert_op(Operation {
            kind: OpKind::Assignment,
            input: values.to_vec(),
            output: vars.iter().map(|&var| StackSlot::var(var)).collect(),
        })
    }

    pub fn jump(&mut self, target: BlockId) {
        self.set_exit(BlockExit::Jump {
            target,
            backwards: false,
        });
    }

    /// Jumps back to a loop header.
    pub fn jump_back(&mut self, target: BlockId) {
        self.set_exit(BlockExit::Jump {
            target,
            backwards: true,
        });
    }

    pub fn branch(&mut self, condition: StackSlot, zero: BlockId, non_zero: BlockId) {
        self.set_exit(BlockExit::ConditionalJump {
            condition,
            zero,
            non_zero,
        });
    }

    pub fn jump_table(&mut self, selector: StackSlot, cases: &[(U256, BlockId)], default: BlockId) {
        self.set_exit(BlockExit::JumpTable {
            selector,
            cases: SmallVec::from_slice(cases),
            default,
        });
    }

    /// Returns the declared return variables to the caller.
    pub fn ret(&mut self) {
        let values = self.func.return_slots();
        self.set_exit(BlockExit::FunctionReturn { values });
    }

    pub fn stop(&mut self) {
        self.set_exit(BlockExit::MainExit);
    }

    fn insert_op(&mut self, op: Operation) -> OpId {
        let block = self.current_block();
        let op = self.func.ops.push(op);
        self.func.blocks[block].ops.push(op);
        op
    }

    fn set_exit(&mut self, exit: BlockExit) {
        let block = self.current_block();
        self.func.blocks[block].exit = exit;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;

    #[test]
    fn straight_line() {
        let mut mb = test_module_builder();
        let func_ref = mb.declare_function(Signature::new("add3", &["a", "b"], &["r"]));
        let mut builder = mb.func_builder(func_ref);

        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let sum = builder.builtin("add", &[StackSlot::var("a"), StackSlot::var("b")], 1);
        let sum = builder.builtin("add", &[sum[0].clone(), StackSlot::lit(3u64)], 1);
        builder.assign(&["r"], &sum);
        builder.ret();

        let func = builder.finish();
        mb.define(func);
        let module = mb.build();

        assert_eq!(
            dump_func(&module.funcs[func_ref]),
            "func %add3(a, b) -> (r) {
    block0:
        op0: add [ b a ] -> [ TMP[op0, 0] ]
        op1: add [ 0x3 TMP[op0, 0] ] -> [ TMP[op1, 0] ]
        op2: assign [ TMP[op1, 0] ] -> [ r ]
        return [ r ]
}
"
        );
    }

    #[test]
    fn calls() {
        let mut mb = test_module_builder();
        let callee = mb.declare_function(Signature::new("g", &["x"], &["y", "z"]));
        let abort = mb.declare_function(Signature::new("abort", &[], &[]).noreturn());
        let main = mb.declare_function(Signature::main("main"));

        let mut builder = mb.func_builder(main);
        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();

        builder.switch_to_block(b0);
        let results = builder.call(callee, &[StackSlot::lit(1u64)]);
        assert_eq!(results.len(), 2);
        builder.branch(results[1].clone(), b1, b2);

        builder.switch_to_block(b1);
        builder.stop();

        builder.switch_to_block(b2);
        assert!(builder.call(abort, &[]).is_empty());

        let func = builder.finish();
        assert_eq!(func.blocks[b2].exit, BlockExit::Terminated);
        assert_eq!(
            dump_func(&func),
            "main %main {
    block0:
        op0: call func0 [ RET[op0] 0x1 ] -> [ TMP[op0, 0] TMP[op0, 1] ]
        branch TMP[op0, 1] zero block1 nonzero block2
    block1:
        stop
    block2:
        op1: call func1 [ ]
        terminated
}
"
        );
    }

    #[test]
    fn entry_stack() {
        let mut mb = test_module_builder();
        let f = mb.declare_function(Signature::new("f", &["a", "b"], &["r"]));
        let g = mb.declare_function(Signature::new("g", &["a"], &[]).noreturn());
        let module = mb.build();

        assert_eq!(
            module.funcs[f].entry_stack(),
            vec![
                StackSlot::FunctionReturnLabel(f),
                StackSlot::var("b"),
                StackSlot::var("a")
            ]
        );
        assert_eq!(module.funcs[g].entry_stack(), vec![StackSlot::var("a")]);
        assert!(module.funcs[f].is_return_variable(&StackSlot::var("r")));
        assert!(!module.funcs[f].is_return_variable(&StackSlot::var("a")));
    }
}
