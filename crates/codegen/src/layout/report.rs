use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use stackify_ir::{BlockExit, Function, StackSlot};
use tracing::{debug, instrument};

use super::{is_regenerable, StackLayout};
use crate::{
    config::StackConfig,
    error::{InternalError, StackTooDeep},
    shuffle::{plan_shuffle, ShuffleOp},
};

/// Replays every stack transition of `func` through the symbolic shuffler
/// and collects each swap or dup that reaches beyond the configured reach.
///
/// Transitions are the function prologue, block entry to the first
/// operation, operation to operation, the last operation to a jump target or to the branching exit
/// layout, the post-branch stack to each branch target, and the final stack
/// to the return layout.
#[instrument(level = "debug", skip_all, fields(func = func.name()))]
pub fn find_stack_too_deep(
    func: &Function,
    layout: &StackLayout,
    config: &StackConfig,
) -> Result<Vec<StackTooDeep>, InternalError> {
    let mut errors = Vec::new();
    let Some(entry) = func.entry else {
        return Ok(errors);
    };

    errors.extend(transition(func, &func.entry_stack(), layout.block_entry(entry), config)?);

    let mut queue = VecDeque::from([entry]);
    let mut seen = FxHashSet::default();

    while let Some(block) = queue.pop_front() {
        if !seen.insert(block) {
            continue;
        }

        let mut current = layout.block_entry(block).clone();
        for op in func.ops_of(block) {
            let op_entry = layout.op_entry(op);
            errors.extend(transition(func, &current, op_entry, config)?);

            let data = &func.ops[op];
            current = op_entry[..op_entry.len() - data.input.len()].to_vec();
            current.extend(data.output.iter().cloned());
        }

        let exit = &func.blocks[block].exit;
        match exit {
            BlockExit::Jump { target, backwards } => {
                errors.extend(transition(func, &current, layout.block_entry(*target), config)?);
                if !backwards {
                    queue.push_back(*target);
                }
            }

            BlockExit::ConditionalJump { .. } | BlockExit::JumpTable { .. } => {
                let exit_layout = layout.block_exit(block);
                errors.extend(transition(func, &current, exit_layout, config)?);

                let post_branch = &exit_layout[..exit_layout.len().saturating_sub(1)];
                for succ in exit.successors() {
                    errors.extend(transition(func, post_branch, layout.block_entry(succ), config)?);
                    queue.push_back(succ);
                }
            }

            BlockExit::FunctionReturn { values } => {
                let mut target = values.clone();
                target.push(func.return_label());
                errors.extend(transition(func, &current, &target, config)?);
            }

            BlockExit::MainExit | BlockExit::Terminated => {}
        }
    }

    Ok(errors)
}

fn too_deep(
    func: &Function,
    stack: &[StackSlot],
    slot: StackSlot,
    depth: usize,
    deficit: usize,
) -> StackTooDeep {
    debug!(%slot, depth, deficit, "stack too deep");
    StackTooDeep::unreachable(func.name(), stack, slot, depth, deficit)
}

fn transition(
    func: &Function,
    source: &[StackSlot],
    target: &[StackSlot],
    config: &StackConfig,
) -> Result<Vec<StackTooDeep>, InternalError> {
    let plan = plan_shuffle(source, target, config)?;
    let mut stack = source.to_vec();
    let mut errors = Vec::new();

    for op in &plan.ops {
        match op {
            ShuffleOp::Swap(depth) if *depth > config.swap_max_depth() => {
                let slot = stack[stack.len() - 1 - depth].clone();
                errors.push(too_deep(
                    func,
                    &stack,
                    slot,
                    *depth,
                    depth - config.swap_max_depth(),
                ));
            }

            ShuffleOp::PushOrDup(slot) if !is_regenerable(slot) => {
                if let Some(depth) = stack.iter().rev().position(|s| s == slot) {
                    if depth > config.dup_max_depth() {
                        errors.push(too_deep(
                            func,
                            &stack,
                            slot.clone(),
                            depth,
                            depth - config.dup_max_depth(),
                        ));
                    }
                }
            }

            _ => {}
        }
        op.apply(&mut stack);
    }

    Ok(errors)
}
