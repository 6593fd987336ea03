//! Helpers for assembling modules in tests

use crate::consts::KERNELS_METADATA;
use crate::ir::{AddressSpace, FuncId, InstBuilder, Linkage, Module, TypeId};

/// Register a void kernel with the given parameters, an empty entry block and
/// the matching `opencl.kernels` metadata entry. The body still needs a
/// terminator.
pub fn add_kernel(module: &mut Module, name: &str, params: Vec<TypeId>) -> FuncId {
    let void = module.types.void();
    let ty = module.types.func(void, params, false);
    let kernel = module.add_function(name, ty, Linkage::External);
    module.add_block(kernel);

    let value = module.function(kernel).value();
    module.add_metadata_entry(KERNELS_METADATA, vec![value]);

    kernel
}

/// `global i32*` in one step.
pub fn global_i32_ptr(module: &mut Module) -> TypeId {
    let i32_ty = module.types.int(32);
    module.types.ptr(i32_ty, AddressSpace::Global)
}

/// Close every unterminated block of a function with `ret void`.
pub fn seal_with_ret(module: &mut Module, func: FuncId) {
    for block in module.function(func).blocks.clone() {
        let terminated = module
            .block(block)
            .insts
            .last()
            .and_then(|v| module.inst(*v))
            .is_some_and(crate::ir::Inst::is_terminator);

        if !terminated {
            let mut b = InstBuilder::at_end(module, block);
            b.ret_void();
        }
    }
}
