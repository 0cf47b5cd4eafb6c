//! Layouts for structured function bodies, computed in a single backward pass
//! over the statement tree without building a control flow graph.
//!
//! Each visit takes the stack required after a construct and returns the
//! stack required before it. Both branches of a conditional start from the
//! same post stack; their requirements are merged with the post order first
//! and newly introduced slots appended.

use cranelift_entity::SecondaryMap;
use stackify_ir::{Expr, OpId, SmolStr, Stack, StackSlot, Stmt, StmtId, StructuredFunction};
use tracing::instrument;

use crate::error::InternalError;

#[derive(Debug, Default)]
pub struct DirectLayout {
    entry: Stack,
    stmts: SecondaryMap<StmtId, Stack>,
    calls: SecondaryMap<OpId, Stack>,
}

impl DirectLayout {
    #[instrument(level = "debug", skip_all, fields(func = func.name()))]
    pub fn generate(func: &StructuredFunction) -> Result<Self, InternalError> {
        let mut exit = Stack::new();
        if func.sig.returns_to_caller() {
            exit.extend(func.sig.returns.iter().cloned().map(StackSlot::Variable));
            exit.push(StackSlot::FunctionReturnLabel(func.func_ref));
        }

        let mut generator = DirectGenerator {
            func,
            layout: DirectLayout::default(),
        };
        generator.layout.entry = generator.visit_block(&func.body, exit)?;
        Ok(generator.layout)
    }

    /// Slots the body requires on entry, in order.
    pub fn entry(&self) -> &Stack {
        &self.entry
    }

    pub fn stmt_entry(&self, stmt: StmtId) -> &Stack {
        &self.stmts[stmt]
    }

    /// The stack right before the call executes: return label (if any) and
    /// arguments on top, first argument topmost.
    pub fn call_entry(&self, op: OpId) -> &Stack {
        &self.calls[op]
    }
}

struct DirectGenerator<'a> {
    func: &'a StructuredFunction,
    layout: DirectLayout,
}

impl DirectGenerator<'_> {
    fn visit_block(&mut self, stmts: &[StmtId], post: Stack) -> Result<Stack, InternalError> {
        stmts
            .iter()
            .rev()
            .try_fold(post, |post, &stmt| self.visit_stmt(stmt, post))
    }

    fn visit_stmt(&mut self, id: StmtId, post: Stack) -> Result<Stack, InternalError> {
        let func = self.func;

        let pre = match &func.stmts[id] {
            Stmt::Let { vars, value } => {
                let base = without_vars(post, vars);
                match value {
                    Some(value) => self.visit_expr(value, base)?,
                    None => base,
                }
            }

            Stmt::Assign { vars, value } => {
                let base = without_vars(post, vars);
                self.visit_expr(value, base)?
            }

            Stmt::Expr(expr) => self.visit_expr(expr, post)?,

            Stmt::If { cond, body } => {
                let taken = self.visit_block(body, post.clone())?;
                let merged = merge(post, &taken);
                self.visit_control(cond, merged)?
            }

            Stmt::Switch {
                selector,
                cases,
                default,
            } => {
                let mut merged = post.clone();
                for body in cases.iter().map(|(_, body)| body).chain(default) {
                    let taken = self.visit_block(body, post.clone())?;
                    merged = merge(merged, &taken);
                }
                self.visit_control(selector, merged)?
            }

            Stmt::For { cond, post: step, body } => {
                let mut reads = Stack::new();
                let mut declared = Vec::new();
                expr_reads(func, cond, &mut reads);
                block_reads(func, body, &mut reads, &mut declared);
                block_reads(func, step, &mut reads, &mut declared);

                // Loop locals do not exist at the head.
                let mut head = post;
                for slot in reads {
                    let local = slot
                        .as_variable()
                        .is_some_and(|name| declared.contains(name));
                    if !local && !head.contains(&slot) {
                        head.push(slot);
                    }
                }

                let step_entry = self.visit_block(step, head.clone())?;
                let body_entry = self.visit_block(body, step_entry)?;
                let head = merge(head, &body_entry);
                self.visit_control(cond, head)?
            }
        };

        self.layout.stmts[id] = pre.clone();
        Ok(pre)
    }

    /// Like [`Self::visit_expr`] for the condition of `if` and `for` or the
    /// selector of `switch`. The jump consumes it from the top, so a variable
    /// is copied there even when it stays live below.
    fn visit_control(&mut self, expr: &Expr, base: Stack) -> Result<Stack, InternalError> {
        match expr {
            Expr::Var(name) => {
                let mut pre = base;
                pre.push(StackSlot::Variable(name.clone()));
                Ok(pre)
            }
            _ => self.visit_expr(expr, base),
        }
    }

    /// Returns the stack required before evaluating `expr` so that `base`
    /// and the value of `expr` are available afterwards.
    fn visit_expr(&mut self, expr: &Expr, base: Stack) -> Result<Stack, InternalError> {
        let func = self.func;

        match expr {
            Expr::Literal(_) => Ok(base),

            Expr::Var(name) => {
                let mut pre = base;
                push_unique(&mut pre, StackSlot::Variable(name.clone()));
                Ok(pre)
            }

            Expr::Call(op) => {
                let call = &func.calls[*op];

                // Variables read by the arguments stay below the operands.
                let mut reads = Stack::new();
                expr_reads(func, expr, &mut reads);
                let mut prefix = base;
                for slot in reads {
                    push_unique(&mut prefix, slot);
                }

                let mut stack = prefix.clone();
                stack.extend(call.return_label(*op));
                for arg in call.args.iter().rev() {
                    self.visit_expr(arg, stack.clone())?;
                    let slot = func.expr_slot(arg).ok_or_else(|| InternalError::VoidArgument {
                        function: func.name().into(),
                        op: *op,
                    })?;
                    stack.push(slot);
                }

                self.layout.calls[*op] = stack;
                Ok(prefix)
            }
        }
    }
}

fn push_unique(stack: &mut Stack, slot: StackSlot) {
    if !stack.contains(&slot) {
        stack.push(slot);
    }
}

fn merge(mut stack: Stack, other: &[StackSlot]) -> Stack {
    for slot in other {
        push_unique(&mut stack, slot.clone());
    }
    stack
}

fn without_vars(stack: Stack, vars: &[SmolStr]) -> Stack {
    stack
        .into_iter()
        .filter(|slot| slot.as_variable().map_or(true, |name| !vars.contains(name)))
        .collect()
}

/// Collects variables read by `expr` in evaluation order. Arguments are
/// evaluated last to first.
fn expr_reads(func: &StructuredFunction, expr: &Expr, reads: &mut Stack) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var(name) => push_unique(reads, StackSlot::Variable(name.clone())),
        Expr::Call(op) => {
            for arg in func.calls[*op].args.iter().rev() {
                expr_reads(func, arg, reads);
            }
        }
    }
}

fn block_reads(
    func: &StructuredFunction,
    stmts: &[StmtId],
    reads: &mut Stack,
    declared: &mut Vec<SmolStr>,
) {
    for &stmt in stmts {
        match &func.stmts[stmt] {
            Stmt::Let { vars, value } => {
                if let Some(value) = value {
                    expr_reads(func, value, reads);
                }
                declared.extend(vars.iter().cloned());
            }
            Stmt::Assign { value, .. } | Stmt::Expr(value) => expr_reads(func, value, reads),
            Stmt::If { cond, body } => {
                expr_reads(func, cond, reads);
                block_reads(func, body, reads, declared);
            }
            Stmt::Switch {
                selector,
                cases,
                default,
            } => {
                expr_reads(func, selector, reads);
                for (_, body) in cases {
                    block_reads(func, body, reads, declared);
                }
                if let Some(body) = default {
                    block_reads(func, body, reads, declared);
                }
            }
            Stmt::For { cond, post, body } => {
                expr_reads(func, cond, reads);
                block_reads(func, body, reads, declared);
                block_reads(func, post, reads, declared);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use stackify_ir::{
        builder::test_util::*,
        tree::{lit, var},
        TreeBuilder,
    };

    use super::*;

    fn slot(name: &str) -> StackSlot {
        StackSlot::var(name)
    }

    fn op_of(expr: &Expr) -> OpId {
        match expr {
            Expr::Call(op) => *op,
            _ => panic!("not a call"),
        }
    }

    #[test]
    fn if_merges_branch_requirements() {
        let mut mb = test_module_builder();
        let main = mb.declare_function(Signature::main("main"));
        let mut tb = TreeBuilder::new(&mb, main);

        let load_a = tb.builtin("calldataload", vec![lit(0)], 1);
        let s0 = tb.let_(&["a"], Some(load_a));
        let load_b = tb.builtin("calldataload", vec![lit(32)], 1);
        let s1 = tb.let_(&["b"], Some(load_b));
        let value = tb.builtin("callvalue", vec![], 1);
        let s2 = tb.let_(&["c"], Some(value));
        let store_a = tb.builtin("sstore", vec![lit(0), var("a")], 0);
        let s3 = tb.stmt(Stmt::Expr(store_a));
        let s4 = tb.stmt(Stmt::If {
            cond: var("c"),
            body: vec![s3],
        });
        let store_b = tb.builtin("sstore", vec![lit(1), var("b")], 0);
        let store_b_op = op_of(&store_b);
        let s5 = tb.stmt(Stmt::Expr(store_b));
        let func = tb.finish(vec![s0, s1, s2, s4, s5]);

        let layout = DirectLayout::generate(&func).unwrap();

        assert_eq!(layout.stmt_entry(s5), &vec![slot("b")]);
        assert_eq!(
            layout.call_entry(store_b_op),
            &vec![slot("b"), slot("b"), StackSlot::lit(1u64)]
        );
        assert_eq!(layout.stmt_entry(s3), &vec![slot("b"), slot("a")]);
        // The post-if order comes first, the slot only the taken branch
        // needs is appended, the condition is on top.
        assert_eq!(
            layout.stmt_entry(s4),
            &vec![slot("b"), slot("a"), slot("c")]
        );
        assert_eq!(layout.stmt_entry(s1), &vec![slot("a")]);
        assert!(layout.entry().is_empty());
    }

    #[test]
    fn call_operands() {
        let mut mb = test_module_builder();
        let g = mb.declare_function(Signature::new("g", &["x", "y"], &["r"]));
        let f = mb.declare_function(Signature::new("f", &["p"], &["q"]));
        let mut tb = TreeBuilder::new(&mb, f);

        let call = tb.call(g, vec![var("p"), lit(7)]);
        let call_op = op_of(&call);
        let s0 = tb.assign(&["q"], call);
        let func = tb.finish(vec![s0]);

        let layout = DirectLayout::generate(&func).unwrap();
        let ret = StackSlot::FunctionReturnLabel(f);

        assert_eq!(
            layout.call_entry(call_op),
            &vec![
                ret.clone(),
                slot("p"),
                StackSlot::CallReturnLabel(call_op),
                StackSlot::lit(7u64),
                slot("p"),
            ]
        );
        assert_eq!(layout.entry(), &vec![ret, slot("p")]);
    }

    #[test]
    fn for_head_holds_loop_reads() {
        let mut mb = test_module_builder();
        let f = mb.declare_function(Signature::new("f", &["n"], &["s"]));
        let mut tb = TreeBuilder::new(&mb, f);

        let s0 = tb.let_(&["i"], Some(lit(0)));
        let cond = tb.builtin("lt", vec![var("i"), var("n")], 1);
        let next = tb.builtin("add", vec![var("i"), lit(1)], 1);
        let step = tb.assign(&["i"], next);
        let sum = tb.builtin("add", vec![var("s"), var("i")], 1);
        let accumulate = tb.assign(&["s"], sum);
        let double = tb.builtin("mul", vec![var("i"), lit(2)], 1);
        let local = tb.let_(&["t"], Some(double));
        let store = tb.builtin("sstore", vec![lit(0), var("t")], 0);
        let store = tb.stmt(Stmt::Expr(store));
        let s1 = tb.stmt(Stmt::For {
            cond,
            post: vec![step],
            body: vec![accumulate, local, store],
        });
        let func = tb.finish(vec![s0, s1]);

        let layout = DirectLayout::generate(&func).unwrap();
        let ret = StackSlot::FunctionReturnLabel(f);

        assert_eq!(
            layout.stmt_entry(s1),
            &vec![slot("s"), ret.clone(), slot("n"), slot("i")]
        );
        assert!(!layout.stmt_entry(s1).contains(&slot("t")));
        assert_eq!(layout.entry(), &vec![slot("s"), ret, slot("n")]);
    }

    #[test]
    fn switch_merges_in_case_order() {
        let mut mb = test_module_builder();
        let f = mb.declare_function(Signature::new("f", &["sel", "a", "b", "c"], &[]));
        let mut tb = TreeBuilder::new(&mb, f);

        let store_a = tb.builtin("sstore", vec![lit(0), var("a")], 0);
        let case_a = tb.stmt(Stmt::Expr(store_a));
        let store_b = tb.builtin("sstore", vec![lit(0), var("b")], 0);
        let case_b = tb.stmt(Stmt::Expr(store_b));
        let store_a = tb.builtin("sstore", vec![lit(0), var("a")], 0);
        let fallback = tb.stmt(Stmt::Expr(store_a));
        let s0 = tb.stmt(Stmt::Switch {
            selector: var("sel"),
            cases: vec![(1u64.into(), vec![case_a]), (2u64.into(), vec![case_b])],
            default: Some(vec![fallback]),
        });
        let store_c = tb.builtin("sstore", vec![lit(1), var("c")], 0);
        let s1 = tb.stmt(Stmt::Expr(store_c));
        let func = tb.finish(vec![s0, s1]);

        let layout = DirectLayout::generate(&func).unwrap();
        let ret = StackSlot::FunctionReturnLabel(f);

        assert_eq!(
            layout.stmt_entry(s0),
            &vec![ret, slot("c"), slot("a"), slot("b"), slot("sel")]
        );
    }

    #[test]
    fn live_condition_is_copied_on_top() {
        let mut mb = test_module_builder();
        let f = mb.declare_function(Signature::new("f", &["c", "a"], &[]));
        let mut tb = TreeBuilder::new(&mb, f);

        let store = tb.builtin("sstore", vec![lit(0), var("a")], 0);
        let store = tb.stmt(Stmt::Expr(store));
        let s0 = tb.stmt(Stmt::If {
            cond: var("c"),
            body: vec![store],
        });
        let log = tb.builtin("log0", vec![var("c")], 0);
        let s1 = tb.stmt(Stmt::Expr(log));
        let sel = tb.stmt(Stmt::Switch {
            selector: var("c"),
            cases: vec![(1u64.into(), vec![])],
            default: None,
        });
        let func = tb.finish(vec![s0, s1, sel]);

        let layout = DirectLayout::generate(&func).unwrap();
        let ret = StackSlot::FunctionReturnLabel(f);

        // `c` is read again after the `if`, so one copy stays below the
        // condition consumed by the jump.
        assert_eq!(
            layout.stmt_entry(s0),
            &vec![ret.clone(), slot("c"), slot("a"), slot("c")]
        );
        assert_eq!(layout.stmt_entry(sel), &vec![ret, slot("c")]);
    }

    #[test]
    fn void_argument() {
        let mut mb = test_module_builder();
        let main = mb.declare_function(Signature::main("main"));
        let mut tb = TreeBuilder::new(&mb, main);

        let stop = tb.builtin("stop", vec![], 0);
        let outer = tb.builtin("not", vec![stop], 1);
        let outer_op = op_of(&outer);
        let s0 = tb.stmt(Stmt::Expr(outer));
        let func = tb.finish(vec![s0]);

        let err = DirectLayout::generate(&func).unwrap_err();
        assert!(matches!(err, InternalError::VoidArgument { op, .. } if op == outer_op));
    }
}
