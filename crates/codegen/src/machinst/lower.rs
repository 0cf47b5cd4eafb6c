use rustc_hash::FxHashSet;
use stackify_ir::{BlockExit, BlockId, DisplayStack, Function, OpId, OpKind, Stack, StackSlot, U256};
use tracing::{debug, instrument, trace};

use super::vcode::{Inst, Label, VCode};
use crate::{
    config::StackConfig,
    error::{CodegenError, InternalError, StackTooDeep},
    layout::StackLayout,
    shuffle::{shuffle, IndexedStacks, IndexingMap, ShuffleOperations, JUNK_INDEX},
};

/// Lowers a function to an instruction stream following its stack layout.
///
/// Slots beyond reach are recorded as [`StackTooDeep`] and lowering carries
/// on with consistent bookkeeping, so that every such slot of the function is
/// reported at once.
pub struct Lower<'a> {
    func: &'a Function,
    layout: &'a StackLayout,
    config: StackConfig,
    vcode: VCode,

    /// The stack as it is at the current emission point.
    stack: Stack,
    cur_op: Option<OpId>,
    cur_block: Option<BlockId>,

    errors: Vec<StackTooDeep>,
    overflow_reported: bool,
}

impl<'a> Lower<'a> {
    pub fn new(func: &'a Function, layout: &'a StackLayout, config: &StackConfig) -> Self {
        Self {
            func,
            layout,
            config: *config,
            vcode: VCode::new(func.func_ref),
            stack: Stack::new(),
            cur_op: None,
            cur_block: None,
            errors: Vec::new(),
            overflow_reported: false,
        }
    }

    #[instrument(level = "debug", skip_all, fields(func = self.func.name()))]
    pub fn lower(mut self) -> Result<VCode, CodegenError> {
        let func = self.func;
        let Some(entry) = func.entry else {
            return Ok(self.vcode);
        };

        self.push(Inst::Label(Label::Function(func.func_ref)));
        // Return variables live on entry start out as zero.
        self.stack = func.entry_stack();
        let entry_layout = self.layout.block_entry(entry).clone();
        self.emit_shuffle(&entry_layout, true)?;

        let mut to_emit = vec![entry];
        let mut emitted = FxHashSet::default();
        while let Some(block) = to_emit.pop() {
            if !emitted.insert(block) {
                continue;
            }
            self.lower_block(block)?;

            let succs = func.blocks[block].exit.successors();
            to_emit.extend(succs.into_iter().rev().filter(|succ| !emitted.contains(succ)));
        }

        if self.errors.is_empty() {
            Ok(self.vcode)
        } else {
            Err(CodegenError::StackTooDeep {
                function: func.name().into(),
                errors: self.errors,
            })
        }
    }

    fn lower_block(&mut self, block: BlockId) -> Result<(), InternalError> {
        let func = self.func;
        self.vcode.block_order.push(block);
        self.cur_block = Some(block);
        self.cur_op = None;
        self.push(Inst::Label(Label::Block(block)));
        self.stack = self.layout.block_entry(block).clone();

        for op in func.ops_of(block) {
            self.lower_op(op)?;
        }
        self.cur_op = None;

        match &func.blocks[block].exit {
            BlockExit::MainExit => {
                self.push(Inst::Stop);
            }

            BlockExit::Jump { target, .. } => {
                let target_layout = self.layout.block_entry(*target).clone();
                self.shuffle_to(&target_layout)?;
                self.push(Inst::Jump(*target));
            }

            BlockExit::ConditionalJump { zero, non_zero, .. } => {
                let exit_layout = self.layout.block_exit(block).clone();
                self.shuffle_to(&exit_layout)?;
                self.push(Inst::Branch {
                    condition_depth: 0,
                    zero: *zero,
                    non_zero: *non_zero,
                });
                self.stack.pop();
            }

            BlockExit::JumpTable { cases, default, .. } => {
                let exit_layout = self.layout.block_exit(block).clone();
                self.shuffle_to(&exit_layout)?;
                self.push(Inst::JumpTable {
                    selector_depth: 0,
                    cases: cases.clone(),
                    default: *default,
                });
                self.stack.pop();
            }

            BlockExit::FunctionReturn { values } => {
                let mut target = values.clone();
                target.push(func.return_label());
                self.shuffle_to(&target)?;
                self.push(Inst::Return { label_depth: 0 });
            }

            BlockExit::Terminated => {}
        }

        Ok(())
    }

    fn lower_op(&mut self, op: OpId) -> Result<(), InternalError> {
        let func = self.func;
        let data = &func.ops[op];
        self.cur_op = Some(op);

        let op_layout = self.layout.op_entry(op).clone();
        self.shuffle_to(&op_layout)?;

        let arity = data.input.len();
        let base = self.stack.len().checked_sub(arity);
        if base.map_or(true, |base| self.stack[base..] != data.input[..]) {
            return Err(InternalError::OperandMismatch {
                function: func.name().into(),
                op,
                expected: DisplayStack(&data.input).to_string(),
                found: DisplayStack(&self.stack).to_string(),
            });
        }
        let base = self.stack.len() - arity;

        match &data.kind {
            OpKind::Assignment => {
                if data.output.len() != arity {
                    return Err(InternalError::OperandMismatch {
                        function: func.name().into(),
                        op,
                        expected: DisplayStack(&data.output).to_string(),
                        found: DisplayStack(&data.input).to_string(),
                    });
                }
                // Earlier values of the assigned variables are stale.
                for slot in &mut self.stack[..base] {
                    if data.output.contains(slot) {
                        *slot = StackSlot::Junk;
                    }
                }
                for (slot, var) in self.stack[base..].iter_mut().zip(&data.output) {
                    *slot = var.clone();
                }
            }

            kind => {
                self.push(Inst::Op(op));
                self.stack.truncate(base);
                if let OpKind::Call {
                    can_continue: true, ..
                } = kind
                {
                    self.push(Inst::Label(Label::CallReturn(op)));
                }
                self.stack.extend(data.output.iter().cloned());
                self.check_overflow(self.stack.len());
            }
        }

        Ok(())
    }

    fn push(&mut self, inst: Inst) {
        self.vcode.add_inst(inst, self.cur_op, self.cur_block);
    }

    fn check_overflow(&mut self, depth: usize) {
        if depth > self.config.max_stack_depth() && !self.overflow_reported {
            self.overflow_reported = true;
            self.record(StackTooDeep::overflow(
                self.func.name(),
                depth,
                self.config.max_stack_depth(),
            ));
        }
    }

    fn record(&mut self, error: StackTooDeep) {
        debug!(error = %error, "stack too deep");
        self.errors.push(error);
    }

    /// Emits the shuffle from the current stack to `target`. Afterwards the
    /// current stack equals `target`, with `Junk` where `target` has it.
    fn shuffle_to(&mut self, target: &[StackSlot]) -> Result<(), InternalError> {
        self.emit_shuffle(target, false)
    }

    fn emit_shuffle(
        &mut self,
        target: &[StackSlot],
        zero_return_variables: bool,
    ) -> Result<(), InternalError> {
        let config = self.config;
        let mut map = IndexingMap::new();
        let stacks = IndexedStacks::new(&mut map, &self.stack, target);

        let mut emitter = EmitShuffle {
            lower: self,
            map: &map,
            stacks,
            zero_return_variables,
            fault: None,
        };
        shuffle(
            &mut emitter,
            config.swap_max_depth(),
            config.max_shuffle_iterations(),
        )?;

        if let Some(fault) = emitter.fault {
            return Err(fault);
        }
        let result = emitter.stacks.materialize(&map, target)?;
        self.stack = result;
        Ok(())
    }
}

/// Shuffles the current stack of a [`Lower`] by emitting instructions.
struct EmitShuffle<'a, 'l> {
    lower: &'a mut Lower<'l>,
    map: &'a IndexingMap,
    stacks: IndexedStacks,

    /// Set for the function prologue only. Anywhere else a return variable
    /// may hold an assigned value.
    zero_return_variables: bool,
    fault: Option<InternalError>,
}

impl EmitShuffle<'_, '_> {
    fn current_stack(&self) -> Stack {
        self.stacks
            .source
            .iter()
            .map(|&index| self.map.slot(index).clone())
            .collect()
    }

    /// The instruction producing `slot` without reading the stack.
    fn regenerate(&self, slot: &StackSlot) -> Option<Inst> {
        match slot {
            StackSlot::Literal(value) => Some(Inst::Push(*value)),
            StackSlot::CallReturnLabel(op) => Some(Inst::PushLabel(Label::CallReturn(*op))),
            StackSlot::Junk => Some(Inst::PushJunk),
            StackSlot::Variable(_)
                if self.zero_return_variables && self.lower.func.is_return_variable(slot) =>
            {
                Some(Inst::Push(U256::zero()))
            }
            _ => None,
        }
    }
}

impl ShuffleOperations for EmitShuffle<'_, '_> {
    fn update_multiplicity(&mut self) {
        self.stacks.update_multiplicity();
    }

    fn is_compatible(&self, source: usize, target: usize) -> bool {
        self.stacks.is_compatible(source, target)
    }

    fn source_is_same(&self, lhs: usize, rhs: usize) -> bool {
        self.stacks.source_is_same(lhs, rhs)
    }

    fn source_multiplicity(&self, offset: usize) -> i32 {
        self.stacks.source_multiplicity(offset)
    }

    fn target_multiplicity(&self, offset: usize) -> i32 {
        self.stacks.target_multiplicity(offset)
    }

    fn target_is_arbitrary(&self, offset: usize) -> bool {
        self.stacks.target_is_arbitrary(offset)
    }

    fn source_size(&self) -> usize {
        self.stacks.source.len()
    }

    fn target_size(&self) -> usize {
        self.stacks.target.len()
    }

    fn source_state(&self) -> &[usize] {
        &self.stacks.source
    }

    fn swap(&mut self, depth: usize) {
        let max = self.lower.config.swap_max_depth();
        if depth > max {
            let stack = self.current_stack();
            let slot = stack[stack.len() - 1 - depth].clone();
            let error = StackTooDeep::unreachable(
                self.lower.func.name(),
                &stack,
                slot,
                depth,
                depth - max,
            );
            self.lower.record(error);
        } else {
            trace!(depth, "swap");
            self.lower.push(Inst::Swap(depth as u8));
        }
        self.stacks.swap(depth);
    }

    fn pop(&mut self) {
        trace!("pop");
        self.lower.push(Inst::Pop);
        self.stacks.pop();
    }

    fn push_or_dup_target(&mut self, offset: usize) {
        let index = self.stacks.target[offset];
        let slot = self.map.slot(index).clone();
        let max = self.lower.config.dup_max_depth();

        let depth = if index == JUNK_INDEX {
            None
        } else {
            self.stacks.source.iter().rev().position(|&i| i == index)
        };

        match depth {
            Some(depth) if depth <= max => {
                trace!(%slot, depth, "dup");
                self.lower.push(Inst::Dup(depth as u8 + 1));
            }
            _ => {
                if let Some(inst) = self.regenerate(&slot) {
                    trace!(%slot, "push");
                    self.lower.push(inst);
                } else if let Some(depth) = depth {
                    let stack = self.current_stack();
                    let error = StackTooDeep::unreachable(
                        self.lower.func.name(),
                        &stack,
                        slot,
                        depth,
                        depth - max,
                    );
                    self.lower.record(error);
                } else if self.fault.is_none() {
                    self.fault = Some(InternalError::Unproducible {
                        function: self.lower.func.name().into(),
                        slot,
                    });
                }
            }
        }

        self.stacks.push_target(offset);
        self.lower.check_overflow(self.stacks.source.len());
    }
}
