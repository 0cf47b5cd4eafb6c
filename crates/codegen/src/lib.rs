//! Stack layout generation and stack shuffling for stack machine backends.
//!
//! A function is compiled in three steps: [`Liveness`] computes which slots
//! must survive each operation, [`StackLayout`] assigns an ordered stack to
//! every block boundary and operation, and [`Lower`] emits the shuffles and
//! operations that realise those layouts.

pub mod config;
pub mod dump;
pub mod error;
pub mod layout;
pub mod liveness;
pub mod machinst;
pub mod shuffle;

pub use config::StackConfig;
pub use error::{CodegenError, InternalError, StackTooDeep};
pub use layout::{find_stack_too_deep, DirectLayout, StackLayout};
pub use liveness::Liveness;
pub use machinst::{Inst, Label, Lower, VCode};

use rayon::prelude::*;
use stackify_ir::{cfg::ControlFlowGraph, FuncRef, Function, Module};
use tracing::instrument;

/// Compiles a single function.
///
/// Every unreachable slot is reported in one [`CodegenError::StackTooDeep`].
pub fn compile_function(func: &Function, config: &StackConfig) -> Result<VCode, CodegenError> {
    let mut cfg = ControlFlowGraph::new();
    cfg.compute(func);

    let mut liveness = Liveness::new();
    liveness.compute(func, &cfg)?;
    let layout = StackLayout::generate(func, &cfg, &liveness)?;

    let errors = find_stack_too_deep(func, &layout, config)?;
    if !errors.is_empty() {
        return Err(CodegenError::StackTooDeep {
            function: func.name().into(),
            errors,
        });
    }

    Lower::new(func, &layout, config).lower()
}

/// Per-function results of [`compile_module`], ordered by [`FuncRef`].
#[derive(Debug, Default)]
pub struct ModuleCode {
    pub funcs: Vec<(FuncRef, Result<VCode, CodegenError>)>,
}

impl ModuleCode {
    pub fn get(&self, func_ref: FuncRef) -> Option<&Result<VCode, CodegenError>> {
        self.funcs
            .binary_search_by_key(&func_ref, |(f, _)| *f)
            .ok()
            .map(|idx| &self.funcs[idx].1)
    }

    pub fn vcode(&self, func_ref: FuncRef) -> Option<&VCode> {
        self.get(func_ref)?.as_ref().ok()
    }

    pub fn has_errors(&self) -> bool {
        self.funcs.iter().any(|(_, result)| result.is_err())
    }

    /// Failed functions with their errors.
    pub fn errors(&self) -> impl Iterator<Item = (FuncRef, &CodegenError)> + '_ {
        self.funcs
            .iter()
            .filter_map(|(func_ref, result)| result.as_ref().err().map(|err| (*func_ref, err)))
    }
}

/// Compiles every function of `module` in parallel.
///
/// A function that runs out of stack fails on its own. An internal error in
/// any function aborts the whole run.
#[instrument(level = "debug", skip_all)]
pub fn compile_module(module: &Module, config: &StackConfig) -> Result<ModuleCode, InternalError> {
    let func_refs: Vec<_> = module.iter_functions().collect();

    let mut results: Vec<_> = func_refs
        .into_par_iter()
        .map(|func_ref| (func_ref, compile_function(&module.funcs[func_ref], config)))
        .collect();
    results.sort_by_key(|(func_ref, _)| *func_ref);

    let mut code = ModuleCode::default();
    for (func_ref, result) in results {
        match result {
            Err(CodegenError::Internal(err)) => return Err(err),
            result => code.funcs.push((func_ref, result)),
        }
    }

    Ok(code)
}
