use stackify_ir::{builder::test_util::*, Module};

/// `helper(x) -> (y) { y := add(x, 1) }`, called by `main` which stores the
/// result.
pub fn call_module() -> (Module, FuncRef, FuncRef) {
    let mut mb = test_module_builder();
    let helper = mb.declare_function(Signature::new("helper", &["x"], &["y"]));
    let main = mb.declare_function(Signature::main("main"));

    let mut builder = mb.func_builder(helper);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let sum = builder.builtin("add", &[StackSlot::var("x"), StackSlot::lit(1u64)], 1);
    builder.assign(&["y"], &sum);
    builder.ret();
    let func = builder.finish();
    mb.define(func);

    let mut builder = mb.func_builder(main);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    let result = builder.call(helper, &[StackSlot::lit(3u64)]);
    builder.builtin("sstore", &[StackSlot::lit(0u64), result[0].clone()], 0);
    builder.stop();
    let func = builder.finish();
    mb.define(func);

    (mb.build(), helper, main)
}

/// Declares a function that logs its last parameter while all `count`
/// parameters stay live.
pub fn define_deep(mb: &mut ModuleBuilder, name: &str, count: usize) -> FuncRef {
    let names: Vec<String> = (0..count).map(|i| format!("p{i}")).collect();
    let params: Vec<&str> = names.iter().map(String::as_str).collect();
    let func_ref = mb.declare_function(Signature::new(name, &params, &[]));

    let mut builder = mb.func_builder(func_ref);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    builder.builtin("log0", &[StackSlot::var(params[count - 1])], 0);
    let all: Vec<StackSlot> = params.iter().map(|&p| StackSlot::var(p)).collect();
    builder.builtin("consume", &all, 0);
    builder.ret();
    let func = builder.finish();
    mb.define(func);

    func_ref
}
