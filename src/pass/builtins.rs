//! Unsafe builtin retargeting
//!
//! Calls to the fixed unsafe builtin set move to safe twins taking fat
//! pointers: user-linked implementations when the module carries one under
//! the `__safe__` symbol, synthesized declarations otherwise (the safe
//! builtin library supplies the body at link time). Forbidden half-precision
//! builtins abort; so do unresolved externals in strict mode.

use tracing::{debug, warn};

use crate::consts::{FORBIDDEN_BUILTINS, POINTERLESS_BUILTINS, SAFE_DISCRIMINATOR, UNSAFE_BUILTINS};
use crate::context::Mode;
use crate::error::{PassError, PassResult};
use crate::ir::{FuncId, Inst, ValueKind};
use crate::mangle;

use super::Clamper;

impl Clamper<'_> {
    /// Run the builtin-retargeting phase.
    pub(crate) fn retarget_builtins(&mut self) -> PassResult<()> {
        for func in self.module.func_ids() {
            let f = self.module.function(func);
            if !f.is_declaration {
                continue;
            }

            let name = f.name.clone();
            let base = mangle::demangle(&name);

            if FORBIDDEN_BUILTINS.contains(&base) {
                if self.has_call_to(func) {
                    return Err(PassError::ForbiddenBuiltin(base.to_owned()));
                }
                continue;
            }

            if UNSAFE_BUILTINS.contains(&base) && self.has_pointer_param(func) {
                self.resolve_safe_twin(func)?;
            }
        }

        let mut retargeted = 0usize;

        for func in self.bodied_functions() {
            for block in self.module.function(func).blocks.clone() {
                for v in self.module.block(block).insts.clone() {
                    let Some(Inst::Call { callee, .. }) = self.module.inst(v) else {
                        continue;
                    };
                    let ValueKind::Func(decl) = self.module.value(*callee).kind else {
                        continue;
                    };
                    let Some(&twin) = self.safe_twins.get(&decl) else {
                        continue;
                    };

                    let plan = self.param_plans[&decl].clone();
                    self.retarget_call(func, v, &plan, twin)?;
                    retargeted += 1;
                }
            }
        }

        debug!("retargeted {retargeted} builtin calls");

        self.audit_externals()
    }

    /// Locate or synthesize the safe twin of one unsafe builtin declaration.
    fn resolve_safe_twin(&mut self, decl: FuncId) -> PassResult<()> {
        let name = self.module.function(decl).name.clone();
        let expected = mangle::safe_twin_symbol(&name);

        let plan = self.plan_parameters(decl);
        let signature = self.fat_signature(decl, &plan);

        let twin = match self.module.function_by_name(&expected) {
            Some(twin) if self.module.function(twin).ty == signature => twin,
            Some(_) => return Err(PassError::UnresolvedExternal(expected)),
            None => {
                debug!("synthesizing safe twin `{expected}` for `{name}`");
                self.module.declare_function(&expected, signature, true)
            }
        };

        self.safe_twins.insert(decl, twin);
        self.param_plans.insert(decl, plan);

        Ok(())
    }

    fn has_call_to(&self, func: FuncId) -> bool {
        let target = self.module.function(func).value();

        self.bodied_functions().into_iter().any(|f| {
            self.module.function(f).blocks.iter().any(|block| {
                self.module.block(*block).insts.iter().any(|v| {
                    matches!(
                        self.module.inst(*v),
                        Some(Inst::Call { callee, .. }) if *callee == target
                    )
                })
            })
        })
    }

    fn has_pointer_param(&self, func: FuncId) -> bool {
        let ty = self.module.function(func).ty;

        self.module
            .types
            .fn_params(ty)
            .iter()
            .any(|p| self.module.types.is_pointer(*p))
    }

    /// Strict mode rejects surviving calls into unknown external territory;
    /// permissive mode downgrades them to warnings.
    fn audit_externals(&mut self) -> PassResult<()> {
        for func in self.bodied_functions() {
            for block in self.module.function(func).blocks.clone() {
                for v in self.module.block(block).insts.clone() {
                    let Some(Inst::Call { callee, .. }) = self.module.inst(v) else {
                        continue;
                    };
                    let ValueKind::Func(target) = self.module.value(*callee).kind else {
                        continue;
                    };

                    let f = self.module.function(target);
                    if !f.is_declaration || f.is_builtin {
                        continue;
                    }

                    let name = f.name.clone();
                    let base = mangle::demangle(&name);

                    if POINTERLESS_BUILTINS.contains(&base)
                        || UNSAFE_BUILTINS.contains(&base)
                        || name.contains(SAFE_DISCRIMINATOR)
                    {
                        continue;
                    }

                    match self.config.mode {
                        Mode::Strict => {
                            return Err(PassError::UnresolvedExternal(name));
                        }
                        Mode::Permissive => {
                            warn!("call to unresolved external `{name}` left in place");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Final step: the shells die and the wrappers take the host-visible
    /// kernel names.
    pub(crate) fn finish(&mut self) {
        for (old, _) in self.fn_list.clone() {
            self.module.remove_function(old);
        }

        for (wrapper, host_name) in self.wrappers.clone() {
            self.module.function_mut(wrapper).name = host_name;
        }

        debug!(
            "pass complete: {} functions, {} wrappers, {} space aggregates, {} frames",
            self.module.func_ids().len(),
            self.wrappers.len(),
            self.space_aggregates.len(),
            self.frame_aggregates.len()
        );
    }
}
