//! Structured (non-CFG) function bodies, translated straight from a statement
//! tree without building basic blocks first.

use cranelift_entity::{entity_impl, PrimaryMap};
use primitive_types::U256;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{builder::ModuleBuilder, module::FuncRef, OpId, OpKind, Signature, StackSlot};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtId(u32);
entity_impl!(StmtId, "stmt");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(U256),
    Var(SmolStr),
    /// A call expression; see [`StructuredFunction::calls`].
    Call(OpId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpr {
    /// Either [`OpKind::Builtin`] or [`OpKind::Call`].
    pub kind: OpKind,
    pub args: Vec<Expr>,
    pub results: u32,
}

impl CallExpr {
    /// The return label the call pushes below its arguments, if any.
    pub fn return_label(&self, op: OpId) -> Option<StackSlot> {
        match self.kind {
            OpKind::Call {
                can_continue: true, ..
            } => Some(StackSlot::CallReturnLabel(op)),
            _ => None,
        }
    }

    pub fn outputs(&self, op: OpId) -> impl Iterator<Item = StackSlot> {
        (0..self.results).map(move |index| StackSlot::Temporary { op, index })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// Declares `vars`, initialized by `value` or zero.
    Let {
        vars: SmallVec<[SmolStr; 2]>,
        value: Option<Expr>,
    },
    Assign {
        vars: SmallVec<[SmolStr; 2]>,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        body: Vec<StmtId>,
    },
    Switch {
        selector: Expr,
        cases: Vec<(U256, Vec<StmtId>)>,
        default: Option<Vec<StmtId>>,
    },
    /// Loop initializers are ordinary statements preceding the loop.
    For {
        cond: Expr,
        post: Vec<StmtId>,
        body: Vec<StmtId>,
    },
}

#[derive(Debug, Clone)]
pub struct StructuredFunction {
    pub func_ref: FuncRef,
    pub sig: Signature,
    pub stmts: PrimaryMap<StmtId, Stmt>,
    pub calls: PrimaryMap<OpId, CallExpr>,
    pub body: Vec<StmtId>,
}

impl StructuredFunction {
    pub fn name(&self) -> &str {
        self.sig.name()
    }

    /// The slot an expression evaluates to. A call with several results
    /// evaluates to its first one.
    pub fn expr_slot(&self, expr: &Expr) -> Option<StackSlot> {
        match expr {
            Expr::Literal(value) => Some(StackSlot::Literal(*value)),
            Expr::Var(name) => Some(StackSlot::Variable(name.clone())),
            Expr::Call(op) => self.calls[*op].outputs(*op).next(),
        }
    }
}

pub struct TreeBuilder<'a> {
    module_builder: &'a ModuleBuilder,
    func: StructuredFunction,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(module_builder: &'a ModuleBuilder, func_ref: FuncRef) -> Self {
        let func = StructuredFunction {
            func_ref,
            sig: module_builder.sig(func_ref).clone(),
            stmts: PrimaryMap::new(),
            calls: PrimaryMap::new(),
            body: Vec::new(),
        };
        Self {
            module_builder,
            func,
        }
    }

    pub fn builtin(&mut self, name: &str, args: Vec<Expr>, results: u32) -> Expr {
        let op = self.func.calls.push(CallExpr {
            kind: OpKind::Builtin {
                name: name.into(),
                terminates: false,
            },
            args,
            results,
        });
        Expr::Call(op)
    }

    pub fn call(&mut self, callee: FuncRef, args: Vec<Expr>) -> Expr {
        let sig = self.module_builder.sig(callee);
        let can_continue = sig.can_continue;
        let results = if can_continue {
            sig.returns.len() as u32
        } else {
            0
        };
        let op = self.func.calls.push(CallExpr {
            kind: OpKind::Call {
                callee,
                can_continue,
            },
            args,
            results,
        });
        Expr::Call(op)
    }

    pub fn stmt(&mut self, stmt: Stmt) -> StmtId {
        self.func.stmts.push(stmt)
    }

    pub fn let_(&mut self, vars: &[&str], value: Option<Expr>) -> StmtId {
        let vars = vars.iter().map(|&v| SmolStr::new(v)).collect();
        self.stmt(Stmt::Let { vars, value })
    }

    pub fn assign(&mut self, vars: &[&str], value: Expr) -> StmtId {
        let vars = vars.iter().map(|&v| SmolStr::new(v)).collect();
        self.stmt(Stmt::Assign { vars, value })
    }

    pub fn finish(mut self, body: Vec<StmtId>) -> StructuredFunction {
        self.func.body = body;
        self.func
    }
}

pub fn var(name: &str) -> Expr {
    Expr::Var(name.into())
}

pub fn lit(value: u64) -> Expr {
    Expr::Literal(value.into())
}
