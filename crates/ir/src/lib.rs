pub mod block;
pub mod builder;
pub mod cfg;
pub mod function;
pub mod ir_writer;
pub mod module;
pub mod operation;
pub mod slot;
pub mod tree;

pub use block::{BasicBlock, BlockExit, BlockId};
pub use cfg::ControlFlowGraph;
pub use function::{Function, FunctionKind, Signature};
pub use module::{FuncRef, Module};
pub use operation::{OpId, OpKind, Operation};
pub use slot::{DisplayStack, Stack, StackSlot};
pub use tree::{CallExpr, Expr, Stmt, StmtId, StructuredFunction, TreeBuilder};

pub use primitive_types::U256;
pub use smol_str::SmolStr;
